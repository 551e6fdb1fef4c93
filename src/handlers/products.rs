use crate::{
    auth::AuthRouterExt,
    entities::UserRole,
    errors::ApiError,
    handlers::{
        common::{created_response, map_service_error, message_response, success_response},
        AppState,
    },
    services::catalog::{CreateProductInput, ProductQuery, UpdateProductInput},
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

pub fn products_routes() -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/", get(list_products))
        .route("/:id", get(get_product));

    let admin = Router::new()
        .route("/", post(create_product))
        .route("/:id", put(update_product).delete(delete_product))
        .with_role(UserRole::Admin);

    public.merge(admin)
}

/// Filtered, sorted, paginated catalog listing.
async fn list_products(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProductQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .services
        .catalog
        .list_products(query)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(page))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .get_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .create_product(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(product))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateProductInput>,
) -> Result<impl IntoResponse, ApiError> {
    let product = state
        .services
        .catalog
        .update_product(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(product))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .catalog
        .delete_product(id)
        .await
        .map_err(map_service_error)?;

    Ok(message_response("Product deleted"))
}
