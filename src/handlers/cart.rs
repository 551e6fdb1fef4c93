use crate::{
    auth::{AuthRouterExt, AuthUser},
    errors::ApiError,
    handlers::{
        common::{map_service_error, success_response},
        AppState,
    },
    services::cart::{AddToCartInput, UpdateCartItemInput},
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Creates the router for the caller's cart. Every route requires a login.
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(get_cart))
        .route("/add", post(add_to_cart))
        .route("/update", put(update_cart_item))
        .route("/remove/:item_id", delete(remove_cart_item))
        .route("/clear", delete(clear_cart))
        .with_auth()
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .get_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

async fn add_to_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<AddToCartInput>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .add_item(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

async fn update_cart_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<UpdateCartItemInput>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .update_item_quantity(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

async fn remove_cart_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .remove_item(user.user_id, item_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let cart = state
        .services
        .cart
        .clear_cart(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(cart))
}
