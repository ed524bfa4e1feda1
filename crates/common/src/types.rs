use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of times one user may fade the same public wager.
pub const PUBLIC_FADE_LIMIT: i64 = 3;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(WagerId);
string_id!(UserId);
string_id!(PublicWagerId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BetType {
    Spread,
    Moneyline,
    Total,
    TeamTotal,
    Other,
}

impl BetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spread => "spread",
            Self::Moneyline => "moneyline",
            Self::Total => "total",
            Self::TeamTotal => "teamTotal",
            Self::Other => "other",
        }
    }

    /// Unknown type strings from the sportsbook map to `Other`.
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "spread" | "pointspread" => Self::Spread,
            "moneyline" | "ml" => Self::Moneyline,
            "total" | "overunder" => Self::Total,
            "teamtotal" => Self::TeamTotal,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetResult {
    Pending,
    Win,
    Loss,
    Push,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Win => "win",
            Self::Loss => "loss",
            Self::Push => "push",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "win" | "won" => Some(Self::Win),
            "loss" | "lost" => Some(Self::Loss),
            "push" => Some(Self::Push),
            _ => None,
        }
    }
}

/// A placed bet as stored in `wagers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wager {
    pub id: WagerId,
    pub user_id: UserId,
    pub event_description: String,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub bet_type: BetType,
    pub position: String,
    pub line: Option<f64>,
    /// American odds, e.g. -110.
    pub odds: Option<i64>,
    pub units_risked: f64,
    pub units_won_lost: f64,
    pub result: BetResult,
    pub fade_counter: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Tombstone state of a fade membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MembershipState {
    Active,
    Inactive { since: DateTime<Utc> },
}

impl MembershipState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Maps the nullable `deactivated_at` column.
    pub fn from_deactivated_at(deactivated_at: Option<DateTime<Utc>>) -> Self {
        match deactivated_at {
            None => Self::Active,
            Some(since) => Self::Inactive { since },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FadeMembership {
    pub wager_id: WagerId,
    pub user_id: UserId,
    pub state: MembershipState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicFadeTally {
    pub public_wager_id: PublicWagerId,
    pub user_id: UserId,
    pub fade_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
}
