use chrono::Utc;
use common::types::{BetResult, BetType, UserId, Wager, WagerId};

/// Pending "Lakers -5.5" spread created now, so it falls inside the current week.
pub fn wager(id: &str, owner: &str) -> Wager {
    let now = Utc::now();
    Wager {
        id: WagerId::new(id),
        user_id: UserId::new(owner),
        event_description: "Lakers vs Celtics".to_string(),
        home_team: None,
        away_team: None,
        bet_type: BetType::Spread,
        position: "Lakers".to_string(),
        line: Some(-5.5),
        odds: Some(-110),
        units_risked: 1.0,
        units_won_lost: 0.0,
        result: BetResult::Pending,
        fade_counter: 0,
        created_at: now,
        updated_at: now,
    }
}
