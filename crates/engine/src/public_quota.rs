//! Public fade quota: each user may fade a public wager at most
//! `PUBLIC_FADE_LIMIT` times. Unlike the ledger counter, the wager total is
//! re-summed from every tally row after each mutation.

use std::sync::Arc;

use common::types::{PublicWagerId, UserId, PUBLIC_FADE_LIMIT};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::change_feed::FeedItem;
use crate::error::Result;
use crate::events::{ChangeFilter, RowChange};
use crate::store::{FadeStore, PublicFadeWrite};
use crate::sync::Listener;
use crate::toggle_guard::ToggleGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublicFadeOutcome {
    Faded { user_count: i64, wager_total: i64 },
    LimitReached { wager_total: i64 },
    SignInRequired,
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicFadeView {
    pub total: i64,
    pub your_count: i64,
    pub limit: i64,
}

#[derive(Clone)]
pub struct PublicFadeQuota {
    store: FadeStore,
    guard: ToggleGuard<(UserId, PublicWagerId)>,
}

impl PublicFadeQuota {
    pub fn new(store: FadeStore) -> Self {
        Self {
            store,
            guard: ToggleGuard::new(),
        }
    }

    pub async fn load(
        &self,
        public_wager_id: &PublicWagerId,
        session: Option<&UserId>,
    ) -> Result<PublicFadeView> {
        let total = self.store.public_total(public_wager_id).await?;
        let your_count = match session {
            Some(user_id) => self
                .store
                .public_tally(public_wager_id, user_id)
                .await?
                .map_or(0, |t| t.fade_count),
            None => 0,
        };
        Ok(PublicFadeView {
            total,
            your_count,
            limit: PUBLIC_FADE_LIMIT,
        })
    }

    pub async fn fade(
        &self,
        public_wager_id: &PublicWagerId,
        session: Option<&UserId>,
    ) -> Result<PublicFadeOutcome> {
        let Some(user_id) = session else {
            metrics::counter!("fade_public_fades_total", "outcome" => "sign_in_required")
                .increment(1);
            return Ok(PublicFadeOutcome::SignInRequired);
        };
        let Some(_permit) = self
            .guard
            .try_acquire((user_id.clone(), public_wager_id.clone()))
        else {
            metrics::counter!("fade_public_fades_total", "outcome" => "busy").increment(1);
            return Ok(PublicFadeOutcome::Busy);
        };

        let write = match self.store.record_public_fade(public_wager_id, user_id).await {
            Ok(write) => write,
            Err(e) => {
                metrics::counter!("fade_public_fades_total", "outcome" => "error").increment(1);
                return Err(e.into());
            }
        };

        match write {
            PublicFadeWrite::Recorded { tally, wager_total } => {
                metrics::counter!("fade_public_fades_total", "outcome" => "faded").increment(1);
                Ok(PublicFadeOutcome::Faded {
                    user_count: tally.fade_count,
                    wager_total,
                })
            }
            PublicFadeWrite::LimitReached { wager_total } => {
                metrics::counter!("fade_public_fades_total", "outcome" => "limit_reached")
                    .increment(1);
                debug!(
                    public_wager_id = %public_wager_id,
                    user_id = %user_id,
                    "public fade limit reached"
                );
                Ok(PublicFadeOutcome::LimitReached { wager_total })
            }
        }
    }

    pub async fn watch(
        &self,
        public_wager_id: PublicWagerId,
        session: Option<UserId>,
    ) -> Result<PublicFadeViewer> {
        let mut sub = self.store.feed().subscribe(ChangeFilter::PublicTallies {
            public_wager_id: public_wager_id.clone(),
        });
        let initial = self.load(&public_wager_id, session.as_ref()).await?;
        let (view_tx, _) = watch::channel(initial);
        let view_tx = Arc::new(view_tx);

        let listener = {
            let view_tx = Arc::clone(&view_tx);
            let quota = self.clone();
            Listener::spawn(move |cancel| async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = sub.recv() => item,
                    };
                    match item {
                        Some(FeedItem::Change(RowChange::PublicTally { tally, wager_total })) => {
                            view_tx.send_modify(|v| {
                                v.total = wager_total;
                                if session.as_ref() == Some(&tally.user_id) {
                                    v.your_count = tally.fade_count;
                                }
                            });
                        }
                        Some(FeedItem::Change(_)) => {}
                        Some(FeedItem::Lagged(_)) => {
                            metrics::counter!("fade_feed_resyncs_total", "viewer" => "public")
                                .increment(1);
                            match quota.load(&public_wager_id, session.as_ref()).await {
                                Ok(fresh) => {
                                    view_tx.send_replace(fresh);
                                }
                                Err(e) => warn!(
                                    public_wager_id = %public_wager_id,
                                    error = %e,
                                    "public tally resync failed"
                                ),
                            }
                        }
                        None => {
                            info!(public_wager_id = %public_wager_id, "change feed closed");
                            break;
                        }
                    }
                }
            })
        };

        Ok(PublicFadeViewer {
            view_tx,
            listener,
        })
    }
}

pub struct PublicFadeViewer {
    view_tx: Arc<watch::Sender<PublicFadeView>>,
    listener: Listener,
}

impl PublicFadeViewer {
    pub fn view(&self) -> PublicFadeView {
        *self.view_tx.borrow()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<PublicFadeView> {
        self.view_tx.subscribe()
    }

    pub async fn close(mut self) {
        self.listener.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{execute_unpublished, memory_store, memory_store_with_capacity};
    use common::types::PublicFadeTally;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fourth_fade_hits_the_limit() {
        let quota = PublicFadeQuota::new(memory_store().await);
        let (p, u) = (PublicWagerId::new("p1"), UserId::new("u1"));

        for n in 1..=3 {
            assert_eq!(
                quota.fade(&p, Some(&u)).await.unwrap(),
                PublicFadeOutcome::Faded {
                    user_count: n,
                    wager_total: n
                }
            );
        }
        assert_eq!(
            quota.fade(&p, Some(&u)).await.unwrap(),
            PublicFadeOutcome::LimitReached { wager_total: 3 }
        );
    }

    #[tokio::test]
    async fn test_total_is_sum_of_all_users() {
        let quota = PublicFadeQuota::new(memory_store().await);
        let p = PublicWagerId::new("p1");
        let (a, b) = (UserId::new("a"), UserId::new("b"));

        quota.fade(&p, Some(&a)).await.unwrap();
        quota.fade(&p, Some(&a)).await.unwrap();
        let last = quota.fade(&p, Some(&b)).await.unwrap();
        assert_eq!(
            last,
            PublicFadeOutcome::Faded {
                user_count: 1,
                wager_total: 3
            }
        );

        let view = quota.load(&p, Some(&a)).await.unwrap();
        assert_eq!(
            view,
            PublicFadeView {
                total: 3,
                your_count: 2,
                limit: 3
            }
        );
    }

    #[tokio::test]
    async fn test_no_session_is_refused() {
        let quota = PublicFadeQuota::new(memory_store().await);
        let p = PublicWagerId::new("p1");
        assert_eq!(
            quota.fade(&p, None).await.unwrap(),
            PublicFadeOutcome::SignInRequired
        );
        assert_eq!(quota.load(&p, None).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_fade_while_in_flight_is_busy() {
        let quota = PublicFadeQuota::new(memory_store().await);
        let (p, u) = (PublicWagerId::new("p1"), UserId::new("u1"));
        let _permit = quota.guard.try_acquire((u.clone(), p.clone())).unwrap();
        assert_eq!(
            quota.fade(&p, Some(&u)).await.unwrap(),
            PublicFadeOutcome::Busy
        );
    }

    #[tokio::test]
    async fn test_viewer_tracks_total_and_own_count() {
        let quota = PublicFadeQuota::new(memory_store().await);
        let p = PublicWagerId::new("p1");
        let (me, other) = (UserId::new("me"), UserId::new("other"));

        let viewer = quota.watch(p.clone(), Some(me.clone())).await.unwrap();
        let mut rx = viewer.subscribe_view();

        quota.fade(&p, Some(&other)).await.unwrap();
        quota.fade(&p, Some(&me)).await.unwrap();

        let seen = *tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|v| v.total == 2 && v.your_count == 1),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(seen.limit, PUBLIC_FADE_LIMIT);

        viewer.close().await;
    }

    #[tokio::test]
    async fn test_lagged_viewer_rereads_tallies() {
        let store = memory_store_with_capacity(1).await;
        let quota = PublicFadeQuota::new(store.clone());
        let p = PublicWagerId::new("p1");
        let viewer = quota.watch(p.clone(), Some(UserId::new("me"))).await.unwrap();
        let mut rx = viewer.subscribe_view();

        execute_unpublished(
            &store,
            "INSERT INTO public_fade_tallies (public_wager_id, user_id, fade_count)
             VALUES ('p1', 'me', 2), ('p1', 'other', 1)",
        )
        .await;
        for _ in 0..3 {
            store.feed().publish(RowChange::PublicTally {
                tally: PublicFadeTally {
                    public_wager_id: p.clone(),
                    user_id: UserId::new("other"),
                    fade_count: 1,
                },
                wager_total: 3,
            });
        }

        // Only a re-read can learn this session's own count.
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|v| v.total == 3 && v.your_count == 2),
        )
        .await
        .unwrap()
        .unwrap();

        viewer.close().await;
    }
}
