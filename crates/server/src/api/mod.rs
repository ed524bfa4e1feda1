pub mod leaderboard;
pub mod public;
pub mod stream;
pub mod wagers;

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::types::{UserId, WagerId};
use engine::toggle_guard::ToggleGuard;
use engine::{FadeError, FadeLedger, FadeStore, PublicFadeQuota};
use serde::Serialize;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;

/// Header carrying the caller's user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state available to all handlers.
pub struct AppState {
    pub store: FadeStore,
    pub ledger: FadeLedger,
    pub quota: PublicFadeQuota,
    /// One in-flight toggle per (user, wager) across requests.
    pub toggles: ToggleGuard<(UserId, WagerId)>,
    pub tz: chrono_tz::Tz,
    pub min_bets: u32,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub api_key: Option<String>,
}

impl AppState {
    pub fn new(store: FadeStore, tz: chrono_tz::Tz, min_bets: u32, api_key: Option<String>) -> Self {
        Self {
            ledger: FadeLedger::new(store.clone()),
            quota: PublicFadeQuota::new(store.clone()),
            store,
            toggles: ToggleGuard::new(),
            tz,
            min_bets,
            started_at: chrono::Utc::now(),
            api_key,
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    // Health endpoint is always public (no auth)
    let public = Router::new().route("/api/health", get(health));

    // Protected routes require bearer token (if api_key is configured)
    let protected = Router::new()
        .route("/api/wagers/{id}", get(wagers::get_wager))
        .route("/api/wagers/{id}/fade", post(wagers::toggle_fade))
        .route("/api/wagers/{id}/stream", get(stream::stream_wager))
        .route("/api/public-wagers/{id}", get(public::get_public_wager))
        .route("/api/public-wagers/{id}/fade", post(public::fade_public_wager))
        .route(
            "/api/public-wagers/{id}/stream",
            get(stream::stream_public_wager),
        )
        .route("/api/leaderboard", get(leaderboard::get_leaderboard))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bearer token auth middleware. Skipped when no api_key is configured.
async fn auth_middleware(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    let Some(api_key) = &state.api_key else {
        return next.run(req).await; // No key configured = dev mode
    };

    let token = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if constant_time_eq(token.as_bytes(), api_key.as_bytes()) => {
            next.run(req).await
        }
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// The caller's identity, if any. Missing or blank header means no session.
pub struct Session(pub Option<UserId>);

impl<S: Send + Sync> FromRequestParts<S> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(UserId::new);
        Ok(Self(user))
    }
}

/// Handler errors mapped onto status codes and a small JSON body.
#[derive(Debug)]
pub enum ApiError {
    SignInRequired,
    Busy,
    LimitReached { total: i64 },
    NotFound(String),
    Retryable(String),
}

impl From<FadeError> for ApiError {
    fn from(e: FadeError) -> Self {
        match e {
            FadeError::WagerNotFound(id) => Self::NotFound(format!("wager {id} not found")),
            FadeError::Store(err) => {
                let message = format!("{err:#}");
                tracing::warn!(error = %message, "store failure in request");
                Self::Retryable(message)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::SignInRequired => (
                StatusCode::UNAUTHORIZED,
                json!({"error": "sign_in_required", "message": "Sign in to fade bets"}),
            ),
            Self::Busy => (
                StatusCode::CONFLICT,
                json!({"error": "busy", "message": "A fade for this bet is already in progress"}),
            ),
            Self::LimitReached { total } => (
                StatusCode::CONFLICT,
                json!({
                    "error": "limit_reached",
                    "message": format!(
                        "You've already faded this bet {} times",
                        common::types::PUBLIC_FADE_LIMIT
                    ),
                    "total": total,
                }),
            ),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                json!({"error": "not_found", "message": message}),
            ),
            Self::Retryable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": "retryable", "message": message}),
            ),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_secs: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: uptime,
    })
}
