use order_desk::config::Config;
use order_desk::server::Server;
use order_desk::store::SqliteStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        database = %config.database,
        max_connections = config.max_connections,
        read_timeout = config.read_timeout,
        "Starting order-desk server"
    );

    let store = SqliteStore::open(&config.database)?;
    if config.seed_menu {
        let seeded = store.seed_menu_if_empty()?;
        if seeded > 0 {
            info!(items = seeded, "Seeded demonstration menu");
        }
    }
    for staff in &config.staff {
        store.ensure_staff_account(&staff.email, &staff.password)?;
    }

    let server = Server::new(config, Arc::new(store));
    server.run().await?;
    Ok(())
}
