//! Shoe Shop API Library
//!
//! Catalog, accounts, carts, orders with stock reservation, uploads and the
//! shopping assistant relay, served over axum on top of SeaORM.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod metrics;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;

use axum::{http::HeaderValue, response::Json, routing::get, Extension, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    services::ServeDir,
};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> anyhow::Result<Self> {
        let services = handlers::AppServices::new(db.clone(), &config)?;
        Ok(Self {
            db,
            config,
            services,
        })
    }
}

// Common response wrappers
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn message(message: String) -> Self {
        Self {
            success: true,
            data: None,
            message: Some(message),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Everything mounted under `/api`.
pub fn api_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        .nest("/health", handlers::health::health_routes())
        .nest("/auth", handlers::auth::auth_routes(max_upload_bytes))
        .nest("/brands", handlers::brands::brands_routes())
        .nest("/products", handlers::products::products_routes())
        .nest("/cart", handlers::cart::cart_routes())
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/chatbot", handlers::chat::chat_routes())
        .nest("/upload", handlers::upload::upload_routes(max_upload_bytes))
}

/// CORS from config: explicit origins when given, permissive when allowed,
/// otherwise same-origin only.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .filter_map(|origin| {
                    let trimmed = origin.trim();
                    if trimmed.is_empty() {
                        None
                    } else {
                        HeaderValue::from_str(trimmed).ok()
                    }
                })
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!("Using permissive CORS because explicit origins were not configured");
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// The full application: API, static uploads and metrics, wrapped in the
/// request id, tracing, compression, CORS and security header layers.
pub fn app_router(state: AppState) -> Router {
    let auth_service = state.services.auth.clone();
    let upload_dir = state.services.uploads.upload_dir().to_path_buf();
    let cors = cors_layer(&state.config);
    let api = api_routes(state.config.max_upload_bytes);

    Router::new()
        .route("/metrics", get(metrics::metrics_handler))
        .nest("/api", api)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .with_state(Arc::new(state))
        .layer(Extension(auth_service))
        .layer(axum::middleware::from_fn(
            middleware_helpers::security_headers_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
}
