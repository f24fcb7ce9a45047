//! Peerboard broker binary.
//!
//! Listens on `PEERBOARD_ADDR` (default `0.0.0.0:3030`).

use std::io;
use std::net::SocketAddr;
use tracing::info;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[tokio::main]
async fn main() -> io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "peerboard_broker=info,tower_http=info".into()),
        )
        .init();

    let raw = std::env::var("PEERBOARD_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let addr: SocketAddr = raw
        .parse()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("{}: {}", raw, e)))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Peerboard broker listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, peerboard_broker::router()).await
}
