//! Protocol client.
//!
//! Speaks the same framing as the server: one request frame, one response
//! frame, except for the disconnect sentinel which gets no reply.

use crate::framing::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_SIZE};
use crate::request::{OrderLine, DISCONNECT, GET_MENU};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, ToSocketAddrs};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("malformed response: {0}")]
    Json(#[from] serde_json::Error),
}

/// A connection to an order server
pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await.map_err(FrameError::from)?;
        Ok(Self { stream })
    }

    /// Send a raw payload and wait for the response payload.
    pub async fn request(&mut self, payload: &str) -> Result<String, ClientError> {
        write_frame(&mut self.stream, payload).await?;
        match read_frame(&mut self.stream, DEFAULT_MAX_FRAME_SIZE).await? {
            Some(response) => Ok(response),
            None => Err(FrameError::UnexpectedEof.into()),
        }
    }

    /// Send a JSON request and decode the JSON response.
    pub async fn send_json(&mut self, request: &Value) -> Result<Value, ClientError> {
        let response = self.request(&request.to_string()).await?;
        Ok(serde_json::from_str(&response)?)
    }

    pub async fn get_menu(&mut self) -> Result<Value, ClientError> {
        let response = self.request(GET_MENU).await?;
        Ok(serde_json::from_str(&response)?)
    }

    pub async fn create_order(&mut self, lines: &[OrderLine]) -> Result<Value, ClientError> {
        let response = self.request(&serde_json::to_string(lines)?).await?;
        Ok(serde_json::from_str(&response)?)
    }

    /// Send the disconnect sentinel and close the socket.
    pub async fn disconnect(mut self) -> Result<(), ClientError> {
        write_frame(&mut self.stream, DISCONNECT).await?;
        self.stream.shutdown().await.map_err(FrameError::from)?;
        Ok(())
    }
}
