use crate::{handlers::AppState, ApiResponse};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::{sync::Arc, time::Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub version: String,
    pub environment: String,
    pub database: ComponentStatus,
    pub latency_ms: u64,
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", get(health_check))
}

/// Pings the database; answers 503 when it is unreachable.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let start = Instant::now();
    let db_ok = crate::db::check_connection(&state.db).await.is_ok();
    let status = if db_ok {
        ComponentStatus::Up
    } else {
        ComponentStatus::Down
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.environment.clone(),
        database: status,
        latency_ms: start.elapsed().as_millis() as u64,
    };

    let code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(ApiResponse::success(body)))
}
