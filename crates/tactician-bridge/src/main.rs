//! Host bridge for the Tactician decision core.
//!
//! Serves the host's IPC channel: newline-delimited JSON frames over TCP,
//! one `state_update`/`heartbeat` in, one `decision`/`heartbeat_ack`/`error`
//! out.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `tactician-config.yaml` (or the path given as
//!    the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Build the tick processor and construct coordinators
//! 4. Serve until Ctrl-C
//! 5. Shut the engine down and log final statistics

mod error;
mod server;

use std::path::{Path, PathBuf};

use tactician_core::config::LoggingConfig;
use tactician_core::{AgentConfig, CoordinatorCatalog, TickProcessor};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::BridgeError;
use crate::server::BridgeServer;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "tactician-config.yaml";

/// Application entry point for the bridge.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the listener cannot be
/// bound.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config = %config_path.display(),
        config_found = config_path.exists(),
        engine = ?config.decision.engine,
        fallback_mode = %config.decision.fallback_mode,
        budget_ms = config.tick.budget_ms,
        history_size = config.tick.history_size,
        "tactician-bridge starting"
    );

    // 3. Build the processor. No coordinator implementations ship with the
    //    bridge, so enabled slots report as unavailable.
    let mut processor = TickProcessor::from_config(&config, CoordinatorCatalog::new());
    processor.initialize();

    // 4. Serve.
    let server =
        BridgeServer::bind(&config.bridge.listen_addr, config.bridge.max_frame_bytes).await?;
    server.run(&mut processor, shutdown_signal()).await?;

    // 5. Shut down.
    processor.shutdown();
    let stats = processor.snapshot_stats();
    info!(
        ticks_processed = stats.stats.ticks_processed,
        average_processing_ms = stats.average_processing_ms,
        max_processing_ms = stats.stats.max_processing_ms,
        budget_exceeded = stats.stats.budget_exceeded,
        tick_regressions = stats.stats.tick_regressions,
        processing_errors = stats.stats.processing_errors,
        "tactician-bridge stopped"
    );
    Ok(())
}

/// Load configuration from `path`, or defaults (plus environment
/// overrides) if the file does not exist.
fn load_config(path: &Path) -> Result<AgentConfig, BridgeError> {
    if path.exists() {
        Ok(AgentConfig::from_file(path)?)
    } else {
        Ok(AgentConfig::parse("")?)
    }
}

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C. If the handler cannot be installed, never resolves.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
