//! Ctrl+C handling for indexing runs.

use std::sync::Arc;
use tracing::{info, warn};

use crate::run_controller::RunController;

/// First Ctrl+C stops the active run; sites still indexing end FAILED once the
/// task pool is torn down. Second Ctrl+C exits immediately.
pub fn setup_shutdown_handler(controller: Arc<RunController>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("Received Ctrl+C, stopping the indexing run...");
        eprintln!("Press Ctrl+C again to force quit");

        if let Err(e) = controller.stop_run() {
            warn!("Nothing to stop: {}", e);
        }

        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nForce quit requested, exiting immediately...");
            std::process::exit(1);
        }
    })
}
