//! Health check endpoints.

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use beacon_hub::BridgeState;
use serde_json::{Map, Value, json};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/ready", get(ready))
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let stats = state.hub.stats();
    let bridges: Map<String, Value> = state
        .bridges
        .iter()
        .map(|(channel, rx)| (channel.clone(), json!(rx.borrow().as_str())))
        .collect();

    Json(json!({
        "status": "ok",
        "bridges": bridges,
        "feed_subscribers": stats.feed_subscribers,
        "cached_jobs": stats.cached_jobs,
        "cached_consoles": stats.cached_consoles,
    }))
}

/// Ready once every notification bridge is listening.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let connected = state
        .bridges
        .iter()
        .all(|(_, rx)| *rx.borrow() == BridgeState::Connected);

    if connected {
        (StatusCode::OK, Json(json!({ "status": "ready" })))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "connecting" })),
        )
    }
}
