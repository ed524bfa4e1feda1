//! Fade engine: fade memberships with a trigger-maintained counter, realtime
//! viewers over an in-process change feed, the capped public fade quota, the
//! bet line inverter, and the weekly leaderboard.

pub mod bet_line;
pub mod change_feed;
pub mod error;
pub mod events;
pub mod leaderboard;
pub mod ledger;
pub mod metrics;
pub mod public_quota;
pub mod store;
pub mod sync;
pub mod teams;
pub mod toggle_guard;

pub use change_feed::{ChangeFeed, FeedItem, Subscription};
pub use error::FadeError;
pub use ledger::{FadeLedger, FadeView, ToggleOutcome};
pub use public_quota::{PublicFadeOutcome, PublicFadeQuota, PublicFadeView, PublicFadeViewer};
pub use store::FadeStore;
pub use sync::{FadeClient, WagerViewer};
