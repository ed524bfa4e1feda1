//! Fade membership toggling against the store.
//!
//! The ledger only ever touches `fade_memberships`. `wagers.fade_counter` is
//! recomputed by the membership triggers inside the same write, so concurrent
//! toggles from many users cannot lose updates.

use chrono::Utc;
use common::types::{MembershipState, UserId, WagerId};
use serde::Serialize;

use crate::error::{FadeError, Result};
use crate::store::FadeStore;

/// What one viewer sees for one wager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FadeView {
    pub canonical_count: i64,
    pub is_fading: bool,
    /// A toggle is in flight for this viewer.
    pub busy: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleOutcome {
    /// `fading` is the caller's membership state after the write;
    /// `fade_counter` the counter read back in the same store call.
    Toggled { fading: bool, fade_counter: i64 },
    SignInRequired,
    /// A toggle for this wager is already in flight; this one was dropped.
    Busy,
}

#[derive(Clone)]
pub struct FadeLedger {
    store: FadeStore,
}

impl FadeLedger {
    pub fn new(store: FadeStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FadeStore {
        &self.store
    }

    /// Authoritative view for `session` on `wager_id`. Without a session the
    /// viewer is never fading.
    pub async fn load(&self, wager_id: &WagerId, session: Option<&UserId>) -> Result<FadeView> {
        let canonical_count = self
            .store
            .fade_counter(wager_id)
            .await?
            .ok_or_else(|| FadeError::WagerNotFound(wager_id.clone()))?;

        let is_fading = match session {
            Some(user_id) => self
                .store
                .membership(wager_id, user_id)
                .await?
                .is_some_and(|m| m.state.is_active()),
            None => false,
        };

        Ok(FadeView {
            canonical_count,
            is_fading,
            busy: false,
        })
    }

    /// Flip the caller's membership. Does not guard against concurrent
    /// toggles from the same caller; see `ToggleGuard`.
    pub async fn toggle(
        &self,
        wager_id: &WagerId,
        session: Option<&UserId>,
    ) -> Result<ToggleOutcome> {
        let Some(user_id) = session else {
            metrics::counter!("fade_toggles_total", "outcome" => "sign_in_required").increment(1);
            return Ok(ToggleOutcome::SignInRequired);
        };

        let res = self.write_toggle(wager_id, user_id).await;
        let outcome = match &res {
            Ok(ToggleOutcome::Toggled { fading: true, .. }) => "faded",
            Ok(_) => "unfaded",
            Err(e) if e.is_retryable() => "error",
            Err(_) => "not_found",
        };
        metrics::counter!("fade_toggles_total", "outcome" => outcome).increment(1);
        res
    }

    async fn write_toggle(&self, wager_id: &WagerId, user_id: &UserId) -> Result<ToggleOutcome> {
        let current = self.store.membership(wager_id, user_id).await?;

        let write = match current.map(|m| m.state) {
            Some(MembershipState::Active) => {
                self.store
                    .deactivate_membership(wager_id, user_id, Utc::now())
                    .await?
            }
            Some(MembershipState::Inactive { .. }) => {
                self.store.reactivate_membership(wager_id, user_id).await?
            }
            None => self
                .store
                .insert_membership(wager_id, user_id)
                .await?
                .ok_or_else(|| FadeError::WagerNotFound(wager_id.clone()))?,
        };

        if !write.applied {
            tracing::debug!(
                wager_id = %wager_id,
                user_id = %user_id,
                "fade toggle lost a race; row already in target state"
            );
        }

        Ok(ToggleOutcome::Toggled {
            fading: write.membership.state.is_active(),
            fade_counter: write.fade_counter,
        })
    }

    /// Run the atomic counter function for one wager.
    pub async fn recount(&self, wager_id: &WagerId) -> Result<i64> {
        self.store
            .recount_fade_counter(wager_id)
            .await?
            .ok_or_else(|| FadeError::WagerNotFound(wager_id.clone()))
    }
}
