use axum::{
    extract::{Path, State},
    Json,
};
use common::types::{BetResult, BetType, UserId, WagerId};
use engine::bet_line;
use engine::ToggleOutcome;
use serde::Serialize;
use std::sync::Arc;

use super::{ApiError, AppState, Session};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WagerResponse {
    id: WagerId,
    user_id: UserId,
    event_description: String,
    bet_type: BetType,
    position: String,
    result: BetResult,
    line: String,
    opposite_line: String,
    fade_counter: i64,
    is_fading: bool,
}

pub async fn get_wager(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Json<WagerResponse>, ApiError> {
    let wager_id = WagerId::new(id);
    let wager = state
        .store
        .wager(&wager_id)
        .await
        .map_err(engine::FadeError::Store)?
        .ok_or_else(|| ApiError::NotFound(format!("wager {wager_id} not found")))?;
    let view = state.ledger.load(&wager_id, session.as_ref()).await?;
    let description = bet_line::describe(&wager);

    Ok(Json(WagerResponse {
        id: wager.id,
        user_id: wager.user_id,
        event_description: wager.event_description,
        bet_type: wager.bet_type,
        position: wager.position,
        result: wager.result,
        line: description.line,
        opposite_line: description.opposite_line,
        fade_counter: view.canonical_count,
        is_fading: view.is_fading,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleResponse {
    fading: bool,
    fade_counter: i64,
}

pub async fn toggle_fade(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Session(session): Session,
) -> Result<Json<ToggleResponse>, ApiError> {
    let wager_id = WagerId::new(id);
    let Some(user_id) = session else {
        state.ledger.toggle(&wager_id, None).await?;
        return Err(ApiError::SignInRequired);
    };
    let Some(permit) = state
        .toggles
        .try_acquire((user_id.clone(), wager_id.clone()))
    else {
        metrics::counter!("fade_toggles_total", "outcome" => "busy").increment(1);
        return Err(ApiError::Busy);
    };

    // The write finishes even if the client disconnects mid-request.
    let ledger = state.ledger.clone();
    let write = tokio::spawn(async move {
        let _permit = permit;
        ledger.toggle(&wager_id, Some(&user_id)).await
    });
    let outcome = write
        .await
        .map_err(|e| ApiError::Retryable(format!("toggle task failed: {e}")))??;

    match outcome {
        ToggleOutcome::Toggled {
            fading,
            fade_counter,
        } => Ok(Json(ToggleResponse {
            fading,
            fade_counter,
        })),
        ToggleOutcome::SignInRequired => Err(ApiError::SignInRequired),
        ToggleOutcome::Busy => Err(ApiError::Busy),
    }
}

#[cfg(test)]
mod tests {
    use crate::api::tests::{body_json, request, test_app};
    use axum::http::StatusCode;
    use common::types::{UserId, WagerId};
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_get_wager_describes_both_sides() {
        let (app, _state) = test_app(None).await;
        let response = app
            .oneshot(request("GET", "/api/wagers/w1", Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json = body_json(response).await;
        assert_eq!(json["line"], "Lakers -5.5");
        assert_eq!(json["oppositeLine"], "Celtics +5.5");
        assert_eq!(json["fadeCounter"], 0);
        assert_eq!(json["isFading"], false);
        assert_eq!(json["betType"], "spread");
    }

    #[tokio::test]
    async fn test_unknown_wager_is_404() {
        let (app, _state) = test_app(None).await;
        let response = app
            .oneshot(request("GET", "/api/wagers/ghost", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let (app, _state) = test_app(None).await;

        let on = app
            .clone()
            .oneshot(request("POST", "/api/wagers/w1/fade", Some("alice")))
            .await
            .unwrap();
        assert_eq!(on.status(), StatusCode::OK);
        let json = body_json(on).await;
        assert_eq!(json["fading"], true);
        assert_eq!(json["fadeCounter"], 1);

        let view = app
            .clone()
            .oneshot(request("GET", "/api/wagers/w1", Some("alice")))
            .await
            .unwrap();
        assert_eq!(body_json(view).await["isFading"], true);

        let off = app
            .oneshot(request("POST", "/api/wagers/w1/fade", Some("alice")))
            .await
            .unwrap();
        let json = body_json(off).await;
        assert_eq!(json["fading"], false);
        assert_eq!(json["fadeCounter"], 0);
    }

    #[tokio::test]
    async fn test_toggle_without_session_is_401() {
        let (app, state) = test_app(None).await;
        let response = app
            .oneshot(request("POST", "/api/wagers/w1/fade", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"], "sign_in_required");
        assert_eq!(
            state
                .store
                .count_active_memberships(&WagerId::new("w1"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_toggle_in_flight_is_409() {
        let (app, state) = test_app(None).await;
        let _held = state
            .toggles
            .try_acquire((UserId::new("alice"), WagerId::new("w1")))
            .unwrap();

        let response = app
            .oneshot(request("POST", "/api/wagers/w1/fade", Some("alice")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(response).await["error"], "busy");
    }
}
