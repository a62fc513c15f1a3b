//! Giga Chat server
//!
//! Entry point: load configuration, set up logging, serve.

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tracing::{info, warn};

use giga_chat::config::AppConfig;
use giga_chat::{server, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present) before config reads the environment.
    let _ = dotenv();

    let config = AppConfig::load().context("Configuration error")?;
    telemetry::init(&config.logging);

    for warning in config.warnings() {
        warn!(name: "config.warning", "{warning}");
    }

    info!(
        name: "app.starting",
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        "Starting Giga Chat"
    );

    server::start_server(Arc::new(config)).await
}
