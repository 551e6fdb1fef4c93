use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::UserRole,
    errors::ApiError,
    handlers::{
        common::{created_response, map_service_error, success_response},
        AppState,
    },
    services::orders::{CheckoutInput, UpdateOrderStatusInput},
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use std::sync::Arc;
use uuid::Uuid;

/// Shopper routes need a login; `/admin/*` additionally needs the admin role.
pub fn orders_routes() -> Router<Arc<AppState>> {
    let shopper = Router::new()
        .route("/", post(checkout))
        .route("/my-orders", get(list_my_orders))
        .route("/:id", get(get_order))
        .route("/:id/cancel", put(cancel_order))
        .with_auth();

    let admin = Router::new()
        .route("/admin/all", get(list_all_orders))
        .route("/admin/:id/status", put(update_order_status))
        .with_role(UserRole::Admin);

    shopper.merge(admin)
}

/// Turns the caller's cart into an order.
async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(payload): Json<CheckoutInput>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .checkout(user.user_id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(order))
}

async fn list_my_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_my_orders(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .get_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .cancel_order(&user, id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}

async fn list_all_orders(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let orders = state
        .services
        .orders
        .list_all_orders()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(orders))
}

async fn update_order_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderStatusInput>,
) -> Result<impl IntoResponse, ApiError> {
    let order = state
        .services
        .orders
        .update_status(id, payload.status)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(order))
}
