use common::types::WagerId;
use thiserror::Error;

/// Failures surfaced to fade callers. User-facing outcomes such as "sign in"
/// or "limit reached" are not errors; see `ToggleOutcome` / `PublicFadeOutcome`.
#[derive(Debug, Error)]
pub enum FadeError {
    /// Persistence read/write failed. Retryable.
    #[error("store unavailable: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("wager {0} not found")]
    WagerNotFound(WagerId),
}

impl FadeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, FadeError>;
