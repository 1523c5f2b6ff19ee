use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::timeframe::Timeframe;
use crate::transition;

use super::parse_body;

/// Build the debug/replay-control sub-router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/debug/skip", post(post_skip))
        .route("/api/debug/set_timeframe/{tf}", post(post_set_timeframe))
        .route("/api/debug/set_speed", post(post_set_speed))
        .route("/api/debug/toggle_play", post(post_toggle_play))
        .route("/api/debug/state", get(get_debug_state))
}

/// POST /api/debug/skip — advance the cursor one candle.
async fn post_skip(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let outcome = transition::skip(&state).await?;
    Ok(Json(json!({ "status": "ok", "candle": outcome.candle })))
}

/// POST /api/debug/set_timeframe/{tf} — switch the session timeframe.
/// Runs the same transition as `/api/chart/change_timeframe`; the reply
/// just omits the data array.
async fn post_set_timeframe(
    State(state): State<Arc<AppState>>,
    Path(tf): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let tf = Timeframe::parse(&tf)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown timeframe: {tf}")))?;
    transition::change_timeframe(&state, tf, state.config.visible_window).await?;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/debug/set_speed — body `{speed: float in [1,15]}`.
async fn post_set_speed(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_body(&body)?;
    let speed = body
        .get("speed")
        .and_then(Value::as_f64)
        .ok_or_else(|| ApiError::BadRequest("missing field: speed".to_string()))?;
    if !(1.0..=15.0).contains(&speed) {
        return Err(ApiError::BadRequest(format!(
            "speed out of range [1, 15]: {speed}"
        )));
    }

    state.session.lock().await.speed = speed;
    Ok(Json(json!({ "status": "ok" })))
}

/// POST /api/debug/toggle_play — flip auto-play on or off.
async fn post_toggle_play(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let mut session = state.session.lock().await;
    session.play_mode = !session.play_mode;
    Ok(Json(json!({ "status": "ok", "play_mode": session.play_mode })))
}

/// GET /api/debug/state — cursor and replay-control snapshot.
async fn get_debug_state(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let session = state.session.lock().await;
    Ok(Json(json!({
        "timeframe": session.timeframe,
        "cursor": session.cursor.info(),
        "play_mode": session.play_mode,
        "speed": session.speed,
    })))
}
