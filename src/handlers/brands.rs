use crate::{
    auth::AuthRouterExt,
    entities::UserRole,
    errors::ApiError,
    handlers::{
        common::{created_response, map_service_error, message_response, success_response},
        AppState,
    },
    services::brands::BrandInput,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn brands_routes() -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/", get(list_brands))
        .route("/:id", get(get_brand));

    let admin = Router::new()
        .route("/", post(create_brand))
        .route("/:id", put(update_brand).delete(delete_brand))
        .with_role(UserRole::Admin);

    public.merge(admin)
}

async fn list_brands(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let brands = state
        .services
        .brands
        .list_brands()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(brands))
}

async fn get_brand(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let brand = state
        .services
        .brands
        .get_brand(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(brand))
}

async fn create_brand(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BrandInput>,
) -> Result<impl IntoResponse, ApiError> {
    let brand = state
        .services
        .brands
        .create_brand(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(brand))
}

async fn update_brand(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<BrandInput>,
) -> Result<impl IntoResponse, ApiError> {
    let brand = state
        .services
        .brands
        .update_brand(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(brand))
}

async fn delete_brand(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .brands
        .delete_brand(id)
        .await
        .map_err(map_service_error)?;

    Ok(message_response("Brand deleted"))
}
