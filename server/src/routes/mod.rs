pub mod chart;
pub mod debug;

use axum::body::Bytes;
use axum::Router;
use serde_json::Value;
use std::sync::Arc;

use crate::error::ApiError;
use crate::state::AppState;

/// Assemble the API router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new().merge(chart::routes()).merge(debug::routes())
}

/// Parse a JSON request body. Failures surface as JSON errors; an HTML
/// error page would break the client-side parser.
pub(crate) fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))
}
