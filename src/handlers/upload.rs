use crate::{
    auth::AuthRouterExt,
    entities::UserRole,
    errors::ApiError,
    handlers::{
        common::{created_response, map_service_error},
        AppState,
    },
    services::uploads::{PendingImage, UploadedFile, MAX_FILES_PER_REQUEST},
};
use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use std::sync::Arc;

/// Multipart overhead allowed on top of the file payloads.
pub(super) const MULTIPART_SLACK_BYTES: usize = 64 * 1024;

pub fn upload_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    let body_limit = max_upload_bytes * MAX_FILES_PER_REQUEST + MULTIPART_SLACK_BYTES;

    Router::new()
        .route("/single", post(upload_single))
        .route("/multiple", post(upload_multiple))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_role(UserRole::Admin)
}

/// Stores the `image` field.
async fn upload_single(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() == Some("image") {
            let stored = store_field(&state, field).await?;
            return Ok(created_response(stored));
        }
    }

    Err(ApiError::BadRequest("No image file provided".to_string()))
}

/// Stores every `images` field, at most five per request. The whole body is
/// read and checked before anything is written.
async fn upload_multiple(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut pending = Vec::new();
    while let Some(field) = next_field(&mut multipart).await? {
        if field.name() != Some("images") {
            continue;
        }
        if pending.len() == MAX_FILES_PER_REQUEST {
            return Err(ApiError::BadRequest(format!(
                "At most {} images per request",
                MAX_FILES_PER_REQUEST
            )));
        }
        pending.push(read_image(field).await?);
    }

    if pending.is_empty() {
        return Err(ApiError::BadRequest("No image files provided".to_string()));
    }
    let stored = state
        .services
        .uploads
        .store_images(&pending)
        .await
        .map_err(map_service_error)?;
    Ok(created_response(stored))
}

pub(super) async fn next_field<'a>(
    multipart: &'a mut Multipart,
) -> Result<Option<Field<'a>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Invalid multipart body: {}", e)))
}

/// Buffers a file field without touching the disk.
pub(super) async fn read_image(field: Field<'_>) -> Result<PendingImage, ApiError> {
    let original_name = field.file_name().map(str::to_owned);
    let content_type = field.content_type().map(str::to_owned);
    let data = field
        .bytes()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {}", e)))?;

    Ok(PendingImage {
        original_name,
        content_type,
        data: data.to_vec(),
    })
}

async fn store_field(state: &AppState, field: Field<'_>) -> Result<UploadedFile, ApiError> {
    let image = read_image(field).await?;
    state
        .services
        .uploads
        .store_pending(&image)
        .await
        .map_err(map_service_error)
}
