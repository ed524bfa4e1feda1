use std::time::Instant;

use chrono::Utc;
use engine::events::OperationalEvent;
use engine::leaderboard::{try_weekly_leaderboard, LeaderboardEntry};
use engine::{ChangeFeed, FadeStore};
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct LeaderboardJob {
    pub store: FadeStore,
    pub feed: ChangeFeed,
    pub tz: chrono_tz::Tz,
    pub min_bets: u32,
}

const JOB_NAME: &str = "leaderboard";

impl LeaderboardJob {
    /// One scheduled run. Returns the board on success.
    pub async fn run_once(&self) -> anyhow::Result<Vec<LeaderboardEntry>> {
        let started = Instant::now();
        self.feed.publish_operational(OperationalEvent::JobStarted {
            job_name: JOB_NAME.to_string(),
            started_at: Utc::now(),
        });
        metrics::counter!("fade_leaderboard_runs_total").increment(1);
        metrics::gauge!("fade_feed_subscribers").set(self.feed.subscriber_count() as f64);

        let res = try_weekly_leaderboard(&self.store, Utc::now(), &self.tz, None, self.min_bets).await;
        match &res {
            Ok(entries) => {
                metrics::gauge!("fade_leaderboard_entries").set(entries.len() as f64);
                let coldest = entries.first();
                tracing::info!(
                    entries = entries.len(),
                    coldest_user_id = coldest.map(|e| e.id.as_str()),
                    coldest_win_rate = coldest.map(|e| e.win_rate),
                    "weekly leaderboard computed"
                );
                self.feed
                    .publish_operational(OperationalEvent::LeaderboardComputed {
                        entries: entries.len() as u64,
                        coldest_user_id: coldest.map(|e| e.id.clone()),
                        computed_at: Utc::now(),
                    });
                self.feed.publish_operational(OperationalEvent::JobCompleted {
                    job_name: JOB_NAME.to_string(),
                    duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                    completed_at: Utc::now(),
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "weekly leaderboard failed");
                self.feed.publish_operational(OperationalEvent::JobFailed {
                    job_name: JOB_NAME.to_string(),
                    error: format!("{e:#}"),
                    failed_at: Utc::now(),
                });
            }
        }
        res
    }
}

/// Run the leaderboard on every scheduler tick until the scheduler stops.
pub async fn run_leaderboard_worker(job: LeaderboardJob, mut ticks: mpsc::Receiver<()>) {
    while ticks.recv().await.is_some() {
        // Failures are reported through events and logs; the next tick retries.
        let _ = job.run_once().await;
    }
}
