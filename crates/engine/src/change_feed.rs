//! In-process change feed: push-based, eventually consistent row notifications.
//!
//! Writers publish the new state of every row they commit; readers subscribe
//! with a [`ChangeFilter`] and receive only matching changes. Publishing never
//! blocks on readers. A reader that falls more than `capacity` events behind
//! gets [`FeedItem::Lagged`] and is expected to re-read the authoritative
//! values from the store, which is how delivery stays at-least-once in effect.
//!
//! Operational events (job lifecycle, backpressure) share the feed on a
//! separate broadcast channel so monitoring never competes with row delivery.

use crate::events::{ChangeFilter, OperationalEvent, RowChange};
use chrono::Utc;
use tokio::sync::broadcast;

#[derive(Clone)]
pub struct ChangeFeed {
    rows_tx: broadcast::Sender<RowChange>,
    operational_tx: broadcast::Sender<OperationalEvent>,
    capacity: usize,
    /// Threshold percentage [0, 100] at which to emit BackpressureWarning
    warn_threshold_pct: u8,
}

/// What a [`Subscription`] yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedItem {
    Change(RowChange),
    /// The subscriber missed this many events; local state may be stale.
    Lagged(u64),
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (rows_tx, _) = broadcast::channel(capacity);
        let (operational_tx, _) = broadcast::channel(capacity);
        Self {
            rows_tx,
            operational_tx,
            capacity,
            warn_threshold_pct: 90,
        }
    }

    pub fn with_warn_threshold_pct(mut self, pct: u8) -> Self {
        self.warn_threshold_pct = pct;
        self
    }

    /// Live row subscriptions. Drops back when viewers tear down.
    pub fn subscriber_count(&self) -> usize {
        self.rows_tx.receiver_count()
    }

    /// Publish a committed row change. Returns how many subscribers were
    /// reached; zero subscribers is normal and not an error.
    pub fn publish(&self, change: RowChange) -> usize {
        let current_len = self.rows_tx.len();
        let threshold = (self.capacity as u64 * u64::from(self.warn_threshold_pct) / 100) as usize;
        if threshold > 0 && current_len >= threshold {
            let _ = self
                .operational_tx
                .send(OperationalEvent::BackpressureWarning {
                    queue_name: "row_changes".to_string(),
                    current_size: current_len,
                    capacity: self.capacity,
                    warned_at: Utc::now(),
                });
        }

        self.rows_tx.send(change).unwrap_or(0)
    }

    pub fn subscribe(&self, filter: ChangeFilter) -> Subscription {
        Subscription {
            filter,
            rx: self.rows_tx.subscribe(),
        }
    }

    pub fn publish_operational(&self, event: OperationalEvent) -> usize {
        self.operational_tx.send(event).unwrap_or(0)
    }

    pub fn subscribe_operational(&self) -> broadcast::Receiver<OperationalEvent> {
        self.operational_tx.subscribe()
    }
}

/// A filtered view of the row-change stream. Dropping it unsubscribes.
pub struct Subscription {
    filter: ChangeFilter,
    rx: broadcast::Receiver<RowChange>,
}

impl Subscription {
    /// Next matching change. `None` once the feed is gone.
    pub async fn recv(&mut self) -> Option<FeedItem> {
        loop {
            match self.rx.recv().await {
                Ok(change) if self.filter.matches(&change) => return Some(FeedItem::Change(change)),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => return Some(FeedItem::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {}
}
