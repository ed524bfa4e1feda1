//! Event types carried by the [`ChangeFeed`](crate::change_feed::ChangeFeed).
//!
//! - Row changes: the new state of a row after a committed write, delivered to
//!   every subscriber whose [`ChangeFilter`] matches.
//! - Operational events: job lifecycle and queue health, for logging/monitoring.

pub mod subscribers;

use chrono::{DateTime, Utc};
use common::types::{FadeMembership, PublicFadeTally, PublicWagerId, UserId, WagerId};
use serde::{Deserialize, Serialize};

/// New row state after a committed write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "table", rename_all = "snake_case")]
pub enum RowChange {
    /// `wagers.fade_counter` was recomputed.
    WagerCounter {
        wager_id: WagerId,
        fade_counter: i64,
    },

    /// A `fade_memberships` row was inserted or its tombstone flipped.
    Membership(FadeMembership),

    /// A `public_fade_tallies` row changed. `wager_total` is the re-summed
    /// total across all users, taken in the same transaction.
    PublicTally {
        tally: PublicFadeTally,
        wager_total: i64,
    },
}

/// Equality filter on one column (or the wager+user compound key).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChangeFilter {
    Wager { wager_id: WagerId },
    Membership { wager_id: WagerId, user_id: UserId },
    PublicTallies { public_wager_id: PublicWagerId },
}

impl ChangeFilter {
    pub fn matches(&self, change: &RowChange) -> bool {
        match (self, change) {
            (Self::Wager { wager_id }, RowChange::WagerCounter { wager_id: changed, .. }) => {
                wager_id == changed
            }
            (Self::Membership { wager_id, user_id }, RowChange::Membership(m)) => {
                *wager_id == m.wager_id && *user_id == m.user_id
            }
            (Self::PublicTallies { public_wager_id }, RowChange::PublicTally { tally, .. }) => {
                *public_wager_id == tally.public_wager_id
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationalEvent {
    JobStarted {
        job_name: String,
        started_at: DateTime<Utc>,
    },

    JobCompleted {
        job_name: String,
        duration_ms: u64,
        completed_at: DateTime<Utc>,
    },

    JobFailed {
        job_name: String,
        error: String,
        failed_at: DateTime<Utc>,
    },

    /// Weekly leaderboard recomputed. Entries themselves are not retained.
    LeaderboardComputed {
        entries: u64,
        coldest_user_id: Option<UserId>,
        computed_at: DateTime<Utc>,
    },

    /// Row-change queue approaching capacity.
    BackpressureWarning {
        queue_name: String,
        current_size: usize,
        capacity: usize,
        warned_at: DateTime<Utc>,
    },
}
