use axum::{
    extract::{Path, State},
    Json,
};
use common::types::PublicWagerId;
use engine::{PublicFadeOutcome, PublicFadeView};
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, AppState, Session};

pub async fn get_public_wager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Json<PublicFadeView>, ApiError> {
    let view = state
        .quota
        .load(&PublicWagerId::new(id), session.as_ref())
        .await?;
    Ok(Json(view))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicFadeResponse {
    your_count: i64,
    total: i64,
}

pub async fn fade_public_wager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Json<PublicFadeResponse>, ApiError> {
    let outcome = state
        .quota
        .fade(&PublicWagerId::new(id), session.as_ref())
        .await?;
    match outcome {
        PublicFadeOutcome::Faded {
            user_count,
            wager_total,
        } => Ok(Json(PublicFadeResponse {
            your_count: user_count,
            total: wager_total,
        })),
        PublicFadeOutcome::LimitReached { wager_total } => {
            Err(ApiError::LimitReached { total: wager_total })
        }
        PublicFadeOutcome::SignInRequired => Err(ApiError::SignInRequired),
        PublicFadeOutcome::Busy => Err(ApiError::Busy),
    }
}
