use axum::{
    body::Bytes,
    extract::State,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;
use crate::timeframe::Timeframe;
use crate::transition;
use crate::ws::messages::ServerMessage;

use super::parse_body;

static CLIENT_PAGE: &str = include_str!("../../assets/index.html");

/// Lazy-loading ratios relative to the visible window: how much history the
/// client fetches up front, and how much each left-edge chunk carries.
const LAZY_INITIAL_MULTIPLIER: usize = 5;
const LAZY_CHUNK_MULTIPLIER: usize = 2;

/// Build the chart sub-router.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(index))
        .route("/api/chart/data", get(get_chart_data))
        .route("/api/chart/status", get(get_chart_status))
        .route("/api/chart/change_timeframe", post(post_change_timeframe))
        .route("/api/chart/go_to_date", post(post_go_to_date))
        .route("/api/chart/load_historical", post(post_load_historical))
        .route("/api/chart/lazy_loading_info", get(get_lazy_loading_info))
}

/// GET / — the embedded chart client page.
async fn index() -> Html<&'static str> {
    Html(CLIENT_PAGE)
}

/// GET /api/chart/data — the current visible window.
async fn get_chart_data(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let (candles, timeframe) = transition::current_window(&state).await?;
    Ok(Json(json!({ "candles": candles, "timeframe": timeframe })))
}

/// GET /api/chart/status — connection and dataset summary.
async fn get_chart_status(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let session = state.session.lock().await;
    let candle_count = state
        .candles
        .series(session.timeframe)
        .map(|s| s.len())
        .unwrap_or(0);
    Ok(Json(json!({
        "connected_clients": state.broadcast.client_count(),
        "timeframe": session.timeframe,
        "candles": candle_count,
        "play_mode": session.play_mode,
        "last_update": session.last_update,
    })))
}

/// POST /api/chart/change_timeframe — body `{timeframe, visible_candles?}`.
async fn post_change_timeframe(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_body(&body)?;
    let label = body
        .get("timeframe")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing field: timeframe".to_string()))?;
    let tf = Timeframe::parse(label)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown timeframe: {label}")))?;
    let visible = body
        .get("visible_candles")
        .and_then(Value::as_u64)
        .map(|v| (v as usize).clamp(1, 5_000))
        .unwrap_or(state.config.visible_window);

    let outcome = transition::change_timeframe(&state, tf, visible).await?;
    Ok(Json(json!({
        "status": "ok",
        "timeframe": outcome.timeframe,
        "data": outcome.candles,
    })))
}

/// POST /api/chart/go_to_date — body `{target_date: "YYYY-MM-DD"}`.
async fn post_go_to_date(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_body(&body)?;
    let date_str = body
        .get("target_date")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing field: target_date".to_string()))?;
    let date = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d").map_err(|_| {
        ApiError::BadRequest(format!("invalid target_date: {date_str}, expected YYYY-MM-DD"))
    })?;

    transition::go_to_date(&state, date).await?;
    Ok(Json(json!({ "status": "ok", "target_date": date_str })))
}

/// POST /api/chart/load_historical — body
/// `{timeframe, before_timestamp, chunk_size?, visible_candles?}`.
/// Returns older candles for extending the chart to the left, and mirrors
/// them over the duplex channel.
async fn post_load_historical(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_body(&body)?;
    let label = body
        .get("timeframe")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("missing field: timeframe".to_string()))?;
    let tf = Timeframe::parse(label)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown timeframe: {label}")))?;
    let before = body
        .get("before_timestamp")
        .and_then(Value::as_i64)
        .ok_or_else(|| ApiError::BadRequest("missing field: before_timestamp".to_string()))?;
    let visible = body
        .get("visible_candles")
        .and_then(Value::as_u64)
        .map(|v| (v as usize).clamp(1, 5_000))
        .unwrap_or(state.config.visible_window);
    let chunk_size = body
        .get("chunk_size")
        .and_then(Value::as_u64)
        .map(|v| (v as usize).clamp(1, 10_000))
        .unwrap_or(visible * LAZY_CHUNK_MULTIPLIER);

    let candles = transition::historical_chunk(&state, tf, before, chunk_size)?;
    let count = candles.len();
    state.broadcast.publish(&ServerMessage::HistoricalDataLoaded {
        candles: candles.clone(),
        timeframe: tf,
        count,
        before_timestamp: before,
    });

    Ok(Json(json!({
        "status": "ok",
        "timeframe": tf,
        "data": candles,
        "count": count,
        "before_timestamp": before,
        "lazy_loading_info": {
            "initial_candles": visible * LAZY_INITIAL_MULTIPLIER,
            "chunk_size": chunk_size,
        },
    })))
}

/// GET /api/chart/lazy_loading_info — per-timeframe loading configuration.
async fn get_lazy_loading_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Value>, ApiError> {
    let visible = state.config.visible_window;
    let mut timeframes = serde_json::Map::new();
    for tf in Timeframe::all() {
        timeframes.insert(
            tf.label().to_string(),
            json!({
                "initial_candles": visible * LAZY_INITIAL_MULTIPLIER,
                "chunk_size": visible * LAZY_CHUNK_MULTIPLIER,
                "visible_candles": visible,
                "available": state.candles.available(*tf),
            }),
        );
    }
    Ok(Json(json!({
        "status": "ok",
        "lazy_loading_multiplier": LAZY_INITIAL_MULTIPLIER,
        "chunk_size_multiplier": LAZY_CHUNK_MULTIPLIER,
        "timeframes": timeframes,
    })))
}
