use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

mod config;
mod dashboard;
mod db;
mod error;
mod race;
mod signature;

use config::Config;
use dashboard::AppState;
use db::Database;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;
    let tz = config.display_tz()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);
    info!(
        "Display zone: UTC{}{:02}:{:02}",
        if config.tz_offset_minutes < 0 { "-" } else { "+" },
        config.tz_offset_minutes.abs() / 60,
        config.tz_offset_minutes.abs() % 60
    );

    // Start the board HTTP server (blocks until shutdown)
    let app = dashboard::router(AppState { db, tz });
    let addr: SocketAddr = config.listen_addr.parse()?;
    info!("Race board listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
