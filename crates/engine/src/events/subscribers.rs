//! Operational event subscribers.

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

use common::types::UserId;

use crate::events::OperationalEvent;

fn log_event(event: &OperationalEvent) {
    match event {
        OperationalEvent::JobStarted {
            job_name,
            started_at,
        } => {
            tracing::info!(
                event_type = "job_started",
                %job_name,
                %started_at,
                "Operational event: JobStarted"
            );
        }
        OperationalEvent::JobCompleted {
            job_name,
            duration_ms,
            completed_at,
        } => {
            tracing::info!(
                event_type = "job_completed",
                %job_name,
                duration_ms,
                %completed_at,
                "Operational event: JobCompleted"
            );
        }
        OperationalEvent::JobFailed {
            job_name,
            error,
            failed_at,
        } => {
            tracing::warn!(
                event_type = "job_failed",
                %job_name,
                %error,
                %failed_at,
                "Operational event: JobFailed"
            );
        }
        OperationalEvent::LeaderboardComputed {
            entries,
            coldest_user_id,
            computed_at,
        } => {
            tracing::info!(
                event_type = "leaderboard_computed",
                entries,
                coldest_user_id = coldest_user_id.as_ref().map(UserId::as_str),
                %computed_at,
                "Operational event: LeaderboardComputed"
            );
        }
        OperationalEvent::BackpressureWarning {
            queue_name,
            current_size,
            capacity,
            warned_at,
        } => {
            tracing::warn!(
                event_type = "backpressure_warning",
                %queue_name,
                current_size,
                capacity,
                %warned_at,
                "Operational event: BackpressureWarning"
            );
        }
    }
}

/// Log operational events until cancelled or the feed is dropped.
/// Returns how many events were logged.
pub async fn run_logging_subscriber(
    mut rx: broadcast::Receiver<OperationalEvent>,
    cancel: CancellationToken,
) -> u64 {
    let mut logged = 0;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = rx.recv() => match res {
                Ok(event) => {
                    log_event(&event);
                    logged += 1;
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "logging subscriber lagged behind operational events");
                }
                Err(RecvError::Closed) => {
                    tracing::info!("Logging subscriber shutting down (change feed closed)");
                    break;
                }
            },
        }
    }
    logged
}
