use crate::{
    errors::ApiError,
    handlers::{
        common::{map_service_error, success_response},
        AppState,
    },
    services::chat::ChatRequest,
};
use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use std::sync::Arc;

pub fn chat_routes() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(chat))
}

/// Relays one shopper message (plus prior turns) to the assistant.
async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let reply = state
        .services
        .chat
        .chat(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(reply))
}
