//! Tunnel server binary.
//!
//! Loads an optional TOML config (first CLI argument), binds the listener
//! and serves until Ctrl+C.

use std::path::Path;

use tokio::net::TcpListener;

use bare_proxy::config::{load_config, BareConfig};
use bare_proxy::observability::{logging, metrics};
use bare_proxy::BareServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(Path::new(&path))?,
        None => BareConfig::default(),
    };

    logging::init(&config.observability.log_level);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        bind_address = %config.listener.bind_address,
        mount_prefix = %config.server.mount_prefix,
        block_local = config.ssrf.block_local,
        "bare-proxy starting"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let server = BareServer::new(config);
    server.shutdown_handle().trigger_on_ctrl_c();
    server.run(listener).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
