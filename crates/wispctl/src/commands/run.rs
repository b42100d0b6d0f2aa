use tracing::info;

use crate::error::CliError;
use crate::services::Services;

/// Foreground mode: start both schedulers and hold until Ctrl-C, then
/// stop them cleanly (in-flight ticks finish; their results are
/// discarded).
pub async fn handle(services: &Services) -> Result<(), CliError> {
    services.expiry.start();
    services.monitoring.start();
    info!("schedulers running; press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| CliError::Operation {
            message: format!("could not listen for shutdown signal: {e}"),
        })?;

    info!("shutting down");
    services.expiry.stop().await;
    services.monitoring.stop().await;
    services.pool.disconnect().await;
    Ok(())
}
