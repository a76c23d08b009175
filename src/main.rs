// src/main.rs

//! The entry point for the HA manager process. Run standalone, pointed at a
//! TOML config file, with logging already carrying a reload handle so
//! `LogLevelUp`/`LogLevelDown` frames can adjust verbosity at runtime.

use anyhow::Result;
use ignis_ha::core::logging::LogLevelHandle;
use ignis_ha::manager;
use std::env;
use std::sync::Arc;
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let args: Vec<String> = env::args().collect();

    if args.contains(&"--version".to_string()) {
        println!("ignis-ha version {VERSION}");
        return Ok(());
    }

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("ha.toml");

    let initial_log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_handle = Arc::new(LogLevelHandle::init(&initial_log_level));

    if let Err(e) = manager::run(config_path, Some(log_handle)).await {
        error!("HA manager runtime error: {e}");
        std::process::exit(1);
    }

    Ok(())
}
