use axum::{
    extract::{Query, State},
    Json,
};
use common::types::UserId;
use engine::leaderboard::{weekly_leaderboard, LeaderboardResponse};
use serde::Deserialize;
use std::sync::Arc;

use super::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardQuery {
    current_user_id: Option<String>,
}

pub async fn get_leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Json<LeaderboardResponse> {
    let current = query
        .current_user_id
        .filter(|s| !s.is_empty())
        .map(UserId::new);
    let data = weekly_leaderboard(
        &state.store,
        chrono::Utc::now(),
        &state.tz,
        current.as_ref(),
        state.min_bets,
    )
    .await;
    Json(LeaderboardResponse { data })
}
