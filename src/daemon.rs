use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::orchestrator::Orchestrator;

/// Run the orchestrator until SIGINT or SIGTERM arrives, then shut down
/// cleanly: cancel in-flight work, persist, release the lock.
pub async fn run(config: Arc<Config>) -> Result<()> {
    let mut orchestrator = Orchestrator::new(config)?;
    orchestrator.start().await?;

    wait_for_shutdown().await;

    orchestrator.stop().await;
    Ok(())
}

async fn wait_for_shutdown() {
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            error!("Failed to install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received interrupt signal"),
        _ = term.recv() => info!("Received termination signal"),
    }
}
