//! TCP listener for order clients.
//!
//! Accepts connections and runs one handler task per connection. The accept
//! loop never waits on a handler; it only waits for a free connection slot.

use crate::config::Config;
use crate::connection::{handle_connection, ConnectionError};
use crate::dispatch::Dispatcher;
use crate::framing::FrameError;
use crate::store::OrderStore;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{AcquireError, Semaphore};
use tracing::{debug, error, info, warn};

/// Listener errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("connection limiter closed")]
    Limiter(#[from] AcquireError),
}

/// Server instance
pub struct Server {
    config: Config,
    dispatcher: Arc<Dispatcher>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Create a new server instance
    pub fn new(config: Config, store: Arc<dyn OrderStore>) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(store, config.payment_base_url.clone()));
        let connection_limit = Arc::new(Semaphore::new(config.max_connections));

        Server {
            config,
            dispatcher,
            connection_limit,
        }
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(&self.config.listen)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.config.listen.clone(),
                source,
            })?;
        info!(address = %self.config.listen, "Server listening");

        tokio::select! {
            result = self.serve(listener) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                Ok(())
            }
        }
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let limits = self.config.connection_limits();

        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");

                    let dispatcher = Arc::clone(&self.dispatcher);

                    tokio::spawn(async move {
                        match handle_connection(stream, dispatcher, limits).await {
                            Ok(()) => debug!(peer = %addr, "Disconnected"),
                            Err(e) => log_connection_error(&e, &addr.to_string()),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

fn log_connection_error(e: &ConnectionError, peer: &str) {
    match e {
        ConnectionError::Frame(FrameError::Timeout) => {
            debug!(peer, "Connection idle too long")
        }
        ConnectionError::Frame(FrameError::Io(io)) => {
            debug!(peer, error = %io, "Connection error")
        }
        _ => warn!(peer, error = %e, "Protocol error, closing connection"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::dispatch::ACCESS_DENIED;
    use crate::framing::{encode_frame, HEADER_SIZE};
    use crate::request::OrderLine;
    use crate::store::SqliteStore;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn start(config: Config) -> SocketAddr {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_menu_item("Burger", 10.0, true).unwrap();
        store.add_menu_item("Salad", 8.0, false).unwrap();
        store.create_account("diner@test", "pw", false).unwrap();
        store.ensure_staff_account("chef@test", "kitchen").unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Server::new(config, Arc::new(store));
        tokio::spawn(async move { server.serve(listener).await });
        addr
    }

    fn test_config() -> Config {
        Config {
            payment_base_url: "https://pay.test".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_server_creation() {
        let config = Config {
            read_timeout: 0,
            ..Config::default()
        };
        let store = SqliteStore::open_in_memory().unwrap();
        let server = Server::new(config, Arc::new(store));
        assert_eq!(server.config.connection_limits().read_timeout, None);
    }

    #[tokio::test]
    async fn test_end_to_end_order_flow() {
        let addr = start(test_config()).await;

        let mut diner = Client::connect(addr).await.unwrap();
        let login = diner
            .send_json(&json!({"action": "login", "email": "diner@test", "password": "pw"}))
            .await
            .unwrap();
        assert_eq!(login, json!({"status": "success"}));

        let quote = diner
            .send_json(&json!([{"item_id": 1, "item_quantity": 2}]))
            .await
            .unwrap();
        assert_eq!(quote["total_price"], json!(20.0));
        assert_eq!(quote["payment_link"], json!("https://pay.test?amount=20.00"));
        assert_eq!(quote["order_details"].as_array().unwrap().len(), 2);

        let receipt = diner
            .send_json(&json!({"payment_complete": true}))
            .await
            .unwrap();
        assert_eq!(receipt["total_price"], json!(20.0));
        assert_eq!(receipt["items_ordered"].as_array().unwrap().len(), 2);
        let order_id = receipt["order_id"].clone();

        // Customers cannot see the kitchen queue.
        let denied = diner
            .send_json(&json!({"action": "view_pending_orders"}))
            .await
            .unwrap();
        assert_eq!(denied, json!(ACCESS_DENIED));
        diner.disconnect().await.unwrap();

        let mut chef = Client::connect(addr).await.unwrap();
        chef.send_json(&json!({"action": "login", "email": "chef@test", "password": "kitchen"}))
            .await
            .unwrap();
        let pending = chef
            .send_json(&json!({"action": "view_pending_orders"}))
            .await
            .unwrap();
        assert_eq!(pending[0]["order_id"], order_id);

        let remaining = chef
            .send_json(&json!({"order_id": order_id, "status": true}))
            .await
            .unwrap();
        assert_eq!(remaining, json!([]));

        let pending = chef
            .send_json(&json!({"action": "view_pending_orders"}))
            .await
            .unwrap();
        assert_eq!(pending, json!([]));
        chef.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_sessions_are_per_connection() {
        let addr = start(test_config()).await;

        let mut first = Client::connect(addr).await.unwrap();
        let mut second = Client::connect(addr).await.unwrap();

        first.create_order(&[OrderLine::new(1, 1)]).await.unwrap();
        let paid = second
            .send_json(&json!({"payment_complete": true}))
            .await
            .unwrap();
        assert_eq!(paid, json!({"error": "no order to complete"}));

        let paid = first
            .send_json(&json!({"payment_complete": true}))
            .await
            .unwrap();
        assert_eq!(paid["total_price"], json!(10.0));
    }

    #[tokio::test]
    async fn test_menu_over_the_wire() {
        let addr = start(test_config()).await;
        let mut client = Client::connect(addr).await.unwrap();

        let first = client.request("Get Menu").await.unwrap();
        let second = client.request("Get Menu").await.unwrap();
        assert_eq!(first, second);

        let menu = client.get_menu().await.unwrap();
        assert_eq!(menu, serde_json::from_str::<serde_json::Value>(&first).unwrap());
        assert_eq!(menu[1]["item_name"], json!("Salad"));
        assert_eq!(menu[1]["enabled"], json!(false));
    }

    #[tokio::test]
    async fn test_disconnect_writes_no_response() {
        let addr = start(test_config()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(&encode_frame("!DISCONNECT").unwrap())
            .await
            .unwrap();

        let mut rest = Vec::new();
        stream.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_affect_other_connections() {
        let addr = start(test_config()).await;
        let mut healthy = Client::connect(addr).await.unwrap();

        let mut broken = TcpStream::connect(addr).await.unwrap();
        broken.write_all(&[b'x'; HEADER_SIZE]).await.unwrap();
        let mut rest = Vec::new();
        broken.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());

        let reply = healthy.request("Hello World!").await.unwrap();
        assert_eq!(reply, r#"{"error":"Invalid request"}"#);
    }
}
