//! Periodic sweep of the live-log registry and durable job logs.
//!
//! Drops registry entries nobody listens to and deletes log files older
//! than the hub's retention window, whatever the job's outcome was.

use std::sync::Arc;
use std::time::Duration;

use sourcepin_events::LogHub;
use tokio_util::sync::CancellationToken;

/// Run the sweep every `interval` until `cancel` is triggered.
pub async fn run(logs: Arc<LogHub>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_secs = logs.retention().as_secs(),
        interval_secs = interval.as_secs(),
        "Log retention job started"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Log retention job stopping");
                break;
            }
            _ = ticker.tick() => {
                let report = logs.sweep().await;
                if report.deleted_files > 0 || report.dropped_entries > 0 {
                    tracing::info!(
                        deleted_files = report.deleted_files,
                        dropped_entries = report.dropped_entries,
                        "Log retention: swept"
                    );
                } else {
                    tracing::debug!("Log retention: nothing to sweep");
                }
            }
        }
    }
}
