//! Realtime counter synchronizer.
//!
//! A [`WagerViewer`] keeps one session's [`FadeView`] of one wager in step with
//! the store. It subscribes to the change feed before the initial load, then
//! replaces each field wholesale from every pushed row. Optimistic toggles are
//! overwritten by the next push; a lagged feed triggers a full re-read.

use std::future::Future;
use std::sync::{Arc, Mutex};

use common::types::{UserId, WagerId};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::change_feed::{FeedItem, Subscription};
use crate::error::{FadeError, Result};
use crate::events::{ChangeFilter, RowChange};
use crate::ledger::{FadeLedger, FadeView, ToggleOutcome};
use crate::toggle_guard::ToggleGuard;

/// A background listener that stops on `close()` or drop.
pub(crate) struct Listener {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    pub(crate) fn spawn<F, Fut>(body: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(body(cancel.clone()));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Cancel and wait until the task (and the subscriptions it owns) is gone.
    pub(crate) async fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    warn!(error = %e, "feed listener panicked");
                }
            }
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Next item from an optional subscription; never resolves when absent.
pub(crate) async fn recv_opt(sub: &mut Option<Subscription>) -> Option<FeedItem> {
    match sub {
        Some(sub) => sub.recv().await,
        None => std::future::pending().await,
    }
}

/// One client session: identity plus its per-wager toggle slots.
#[derive(Clone)]
pub struct FadeClient {
    ledger: FadeLedger,
    session: Option<UserId>,
    guard: ToggleGuard<WagerId>,
}

impl FadeClient {
    pub fn new(ledger: FadeLedger, session: Option<UserId>) -> Self {
        Self {
            ledger,
            session,
            guard: ToggleGuard::new(),
        }
    }

    pub async fn watch(&self, wager_id: WagerId) -> Result<WagerViewer> {
        WagerViewer::open(
            self.ledger.clone(),
            wager_id,
            self.session.clone(),
            self.guard.clone(),
        )
        .await
    }
}

pub struct WagerViewer {
    wager_id: WagerId,
    session: Option<UserId>,
    ledger: FadeLedger,
    guard: ToggleGuard<WagerId>,
    view_tx: Arc<watch::Sender<FadeView>>,
    /// Last state confirmed by the store; restored when a toggle fails.
    confirmed: Arc<Mutex<FadeView>>,
    listener: Listener,
}

impl WagerViewer {
    async fn open(
        ledger: FadeLedger,
        wager_id: WagerId,
        session: Option<UserId>,
        guard: ToggleGuard<WagerId>,
    ) -> Result<Self> {
        let feed = ledger.store().feed().clone();
        let mut counter_sub = feed.subscribe(ChangeFilter::Wager {
            wager_id: wager_id.clone(),
        });
        let mut membership_sub = session.as_ref().map(|user_id| {
            feed.subscribe(ChangeFilter::Membership {
                wager_id: wager_id.clone(),
                user_id: user_id.clone(),
            })
        });

        let initial = ledger.load(&wager_id, session.as_ref()).await?;
        let (view_tx, _) = watch::channel(initial);
        let view_tx = Arc::new(view_tx);
        let confirmed = Arc::new(Mutex::new(initial));

        let listener = {
            let view_tx = Arc::clone(&view_tx);
            let confirmed = Arc::clone(&confirmed);
            let ledger = ledger.clone();
            let wager_id = wager_id.clone();
            let session = session.clone();
            Listener::spawn(move |cancel| async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = counter_sub.recv() => item,
                        item = recv_opt(&mut membership_sub) => item,
                    };
                    match item {
                        Some(FeedItem::Change(change)) => {
                            apply_change(&view_tx, &confirmed, change);
                        }
                        Some(FeedItem::Lagged(missed)) => {
                            metrics::counter!("fade_feed_resyncs_total", "viewer" => "wager")
                                .increment(1);
                            debug!(wager_id = %wager_id, missed, "feed lagged; re-reading view");
                            match ledger.load(&wager_id, session.as_ref()).await {
                                Ok(fresh) => {
                                    *lock(&confirmed) = fresh;
                                    view_tx.send_modify(|v| {
                                        v.canonical_count = fresh.canonical_count;
                                        v.is_fading = fresh.is_fading;
                                    });
                                }
                                Err(e) => warn!(wager_id = %wager_id, error = %e, "resync failed"),
                            }
                        }
                        None => {
                            info!(wager_id = %wager_id, "change feed closed; viewer stops listening");
                            break;
                        }
                    }
                }
            })
        };

        Ok(Self {
            wager_id,
            session,
            ledger,
            guard,
            view_tx,
            confirmed,
            listener,
        })
    }

    pub fn view(&self) -> FadeView {
        *self.view_tx.borrow()
    }

    /// Receiver that observes every view update.
    pub fn subscribe_view(&self) -> watch::Receiver<FadeView> {
        self.view_tx.subscribe()
    }

    /// Toggle the session's fade. The view flips optimistically and is then
    /// corrected by pushes; on a store failure it reverts to the last
    /// confirmed state and the error is returned.
    pub async fn toggle(&self) -> Result<ToggleOutcome> {
        let Some(user_id) = self.session.clone() else {
            return self.ledger.toggle(&self.wager_id, None).await;
        };
        let Some(permit) = self.guard.try_acquire(self.wager_id.clone()) else {
            metrics::counter!("fade_toggles_total", "outcome" => "busy").increment(1);
            return Ok(ToggleOutcome::Busy);
        };

        self.view_tx.send_modify(|v| {
            v.canonical_count = if v.is_fading {
                (v.canonical_count - 1).max(0)
            } else {
                v.canonical_count + 1
            };
            v.is_fading = !v.is_fading;
            v.busy = true;
        });

        // The write owns its task so it finishes even if this viewer goes away.
        let ledger = self.ledger.clone();
        let wager_id = self.wager_id.clone();
        let write = tokio::spawn(async move {
            let _permit = permit;
            ledger.toggle(&wager_id, Some(&user_id)).await
        });

        let res = match write.await {
            Ok(res) => res,
            Err(e) => Err(FadeError::Store(anyhow::anyhow!("toggle task failed: {e}"))),
        };

        match res {
            Ok(outcome) => {
                self.view_tx.send_modify(|v| v.busy = false);
                Ok(outcome)
            }
            Err(e) => {
                warn!(wager_id = %self.wager_id, error = %e, "fade toggle failed; restoring last confirmed view");
                let restored = FadeView {
                    busy: false,
                    ..*lock(&self.confirmed)
                };
                self.view_tx.send_replace(restored);
                Err(e)
            }
        }
    }

    /// Stop listening and release the feed subscriptions.
    pub async fn close(mut self) {
        self.listener.close().await;
    }
}

fn lock(confirmed: &Mutex<FadeView>) -> std::sync::MutexGuard<'_, FadeView> {
    confirmed.lock().unwrap_or_else(|p| p.into_inner())
}

fn apply_change(view_tx: &watch::Sender<FadeView>, confirmed: &Mutex<FadeView>, change: RowChange) {
    match change {
        RowChange::WagerCounter { fade_counter, .. } => {
            lock(confirmed).canonical_count = fade_counter;
            view_tx.send_modify(|v| v.canonical_count = fade_counter);
        }
        RowChange::Membership(m) => {
            let fading = m.state.is_active();
            lock(confirmed).is_fading = fading;
            view_tx.send_modify(|v| v.is_fading = fading);
        }
        RowChange::PublicTally { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{
        execute_unpublished, memory_store_with_capacity, spread_wager, store_with_wager,
    };
    use std::time::Duration;

    async fn wait_for_view(
        rx: &mut watch::Receiver<FadeView>,
        pred: impl FnMut(&FadeView) -> bool,
    ) -> FadeView {
        *tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("timed out waiting for view")
            .expect("view sender dropped")
    }

    #[tokio::test]
    async fn test_viewer_sees_other_sessions_toggle() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let alice = FadeClient::new(ledger.clone(), Some(UserId::new("alice")));
        let bob = FadeClient::new(ledger.clone(), Some(UserId::new("bob")));

        let a = alice.watch(WagerId::new("w1")).await.unwrap();
        let b = bob.watch(WagerId::new("w1")).await.unwrap();
        let mut a_rx = a.subscribe_view();

        b.toggle().await.unwrap();

        let seen = wait_for_view(&mut a_rx, |v| v.canonical_count == 1).await;
        assert!(!seen.is_fading);
        assert!(b.view().is_fading);
    }

    #[tokio::test]
    async fn test_own_toggle_increments_exactly_once() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let client = FadeClient::new(ledger, Some(UserId::new("alice")));
        let viewer = client.watch(WagerId::new("w1")).await.unwrap();
        let mut rx = viewer.subscribe_view();

        let outcome = viewer.toggle().await.unwrap();
        assert_eq!(
            outcome,
            ToggleOutcome::Toggled {
                fading: true,
                fade_counter: 1
            }
        );

        // Optimistic +1 and the pushed counter must not stack.
        let mut max_seen = 0;
        loop {
            let v = *rx.borrow_and_update();
            max_seen = max_seen.max(v.canonical_count);
            if !v.busy && v.canonical_count == 1 && v.is_fading {
                break;
            }
            tokio::time::timeout(Duration::from_secs(5), rx.changed())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(max_seen, 1);
    }

    #[tokio::test]
    async fn test_no_session_gets_sign_in_required() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let client = FadeClient::new(ledger.clone(), None);
        let viewer = client.watch(WagerId::new("w1")).await.unwrap();

        assert_eq!(viewer.toggle().await.unwrap(), ToggleOutcome::SignInRequired);
        assert_eq!(viewer.view(), FadeView::default());
        assert_eq!(
            ledger
                .store()
                .count_active_memberships(&WagerId::new("w1"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_toggle_while_in_flight_is_busy() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let client = FadeClient::new(ledger, Some(UserId::new("alice")));
        let viewer = client.watch(WagerId::new("w1")).await.unwrap();

        // Hold the slot the way an in-flight toggle would.
        let _permit = client.guard.try_acquire(WagerId::new("w1")).unwrap();
        assert_eq!(viewer.toggle().await.unwrap(), ToggleOutcome::Busy);
        assert_eq!(viewer.view().canonical_count, 0);
    }

    #[tokio::test]
    async fn test_close_releases_subscriptions() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let feed = ledger.store().feed().clone();
        let before = feed.subscriber_count();

        let client = FadeClient::new(ledger, Some(UserId::new("alice")));
        let viewer = client.watch(WagerId::new("w1")).await.unwrap();
        assert_eq!(feed.subscriber_count(), before + 2);

        viewer.close().await;
        assert_eq!(feed.subscriber_count(), before);
    }

    #[tokio::test]
    async fn test_failed_write_restores_last_confirmed_view() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let w = WagerId::new("w1");
        ledger.toggle(&w, Some(&UserId::new("bob"))).await.unwrap();

        let client = FadeClient::new(ledger.clone(), Some(UserId::new("alice")));
        let viewer = client.watch(w.clone()).await.unwrap();
        let confirmed = viewer.view();
        assert_eq!(
            confirmed,
            FadeView {
                canonical_count: 1,
                is_fading: false,
                busy: false
            }
        );

        execute_unpublished(
            ledger.store(),
            "CREATE TRIGGER reject_new_fades BEFORE INSERT ON fade_memberships
             BEGIN SELECT RAISE(ABORT, 'fades disabled'); END;",
        )
        .await;

        let res = viewer.toggle().await;
        assert!(matches!(res, Err(FadeError::Store(_))), "{res:?}");
        assert_eq!(viewer.view(), confirmed);
        assert_eq!(ledger.store().fade_counter(&w).await.unwrap(), Some(1));
        assert_eq!(ledger.store().count_active_memberships(&w).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_lagged_viewer_rereads_from_store() {
        let store = memory_store_with_capacity(1).await;
        store.upsert_wager(&spread_wager("w1", "owner")).await.unwrap();
        let ledger = FadeLedger::new(store.clone());
        let client = FadeClient::new(ledger, Some(UserId::new("alice")));
        let viewer = client.watch(WagerId::new("w1")).await.unwrap();
        let mut rx = viewer.subscribe_view();

        // The row changes without a membership notification...
        execute_unpublished(
            &store,
            "INSERT INTO fade_memberships (wager_id, user_id) VALUES ('w1', 'alice')",
        )
        .await;
        // ...and a burst overruns the one-slot feed before the listener runs.
        for _ in 0..3 {
            store.feed().publish(RowChange::WagerCounter {
                wager_id: WagerId::new("w1"),
                fade_counter: 1,
            });
        }

        let seen = wait_for_view(&mut rx, |v| v.is_fading).await;
        assert_eq!(seen.canonical_count, 1);
        assert!(!seen.busy);
    }

    #[tokio::test]
    async fn test_watch_unknown_wager_fails() {
        let ledger = FadeLedger::new(store_with_wager("w1").await);
        let client = FadeClient::new(ledger, None);
        assert!(matches!(
            client.watch(WagerId::new("ghost")).await,
            Err(FadeError::WagerNotFound(_))
        ));
    }
}
