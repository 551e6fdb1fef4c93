#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use shoe_shop_api::{
    config::AppConfig,
    db,
    entities::{product_size, Gender, ProductCategory},
    services::{
        brands::BrandInput,
        catalog::{CreateProductInput, ProductView, SizeStock},
        identity::{AuthSession, RegisterInput},
    },
    AppState,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const BOOTSTRAP_SECRET: &str = "let-me-in-as-admin";
pub const PASSWORD: &str = "secret123";

/// Helper harness: one file-backed SQLite database per test, an admin and a
/// shopper account. The pool holds a single connection unless a test asks
/// for more with [`TestApp::with_pool_size`].
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub admin: AuthSession,
    pub user: AuthSession,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// A pool of `connections` so concurrent tasks really overlap in the
    /// database instead of queueing for one connection.
    pub async fn with_pool_size(connections: u32) -> Self {
        Self::with_config(|cfg| {
            cfg.db_max_connections = connections;
            cfg.db_min_connections = connections;
        })
        .await
    }

    /// Construct a test application after letting the caller adjust config.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("shop.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            0,
            "development".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.admin_secret = Some(BOOTSTRAP_SECRET.to_string());
        cfg.upload_dir = dir.path().join("uploads").display().to_string();
        cfg.max_upload_bytes = 64 * 1024;
        adjust(&mut cfg);

        std::fs::create_dir_all(&cfg.upload_dir).expect("upload dir");

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let state = AppState::new(Arc::new(pool), cfg).expect("app state");

        let admin = state
            .services
            .identity
            .register(register_input(
                "Shop Admin",
                "admin@example.com",
                Some(BOOTSTRAP_SECRET),
            ))
            .await
            .expect("bootstrap admin");
        let user = state
            .services
            .identity
            .register(register_input("Test User", "user@example.com", None))
            .await
            .expect("register shopper");

        let router = shoe_shop_api::app_router(state.clone());

        Self {
            router,
            state,
            admin,
            user,
            _dir: dir,
        }
    }

    pub fn admin_token(&self) -> &str {
        &self.admin.token
    }

    pub fn user_token(&self) -> &str {
        &self.user.token
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Like [`request`](Self::request) but decodes the JSON body.
    pub async fn json(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let response = self.request(method, uri, body, token).await;
        read_json(response).await
    }

    /// Registers another shopper and returns their session.
    pub async fn register_user(&self, name: &str, email: &str) -> AuthSession {
        self.state
            .services
            .identity
            .register(register_input(name, email, None))
            .await
            .expect("register user")
    }

    pub async fn seed_product(&self, name: &str, price: i64, sizes: &[(i32, i32)]) -> ProductView {
        let brand = self
            .state
            .services
            .brands
            .create_brand(BrandInput {
                name: format!("Brand {}", Uuid::new_v4().simple()),
            })
            .await
            .expect("seed brand");

        self.state
            .services
            .catalog
            .create_product(CreateProductInput {
                brand_id: brand.id,
                name: name.to_string(),
                price,
                description: format!("{} seeded for tests", name),
                images: vec![format!("/uploads/{}.jpg", name.to_lowercase().replace(' ', "-"))],
                category: Some(ProductCategory::Sneaker),
                gender: Gender::Unisex,
                sizes: sizes
                    .iter()
                    .map(|&(size, stock)| SizeStock { size, stock })
                    .collect(),
            })
            .await
            .expect("seed product")
    }

    /// Current stock straight from the table.
    pub async fn stock(&self, product_id: Uuid, size: i32) -> Option<i32> {
        product_size::Entity::find()
            .filter(product_size::Column::ProductId.eq(product_id))
            .filter(product_size::Column::Size.eq(size))
            .one(&*self.state.db)
            .await
            .expect("read stock")
            .map(|row| row.stock)
    }
}

pub fn register_input(name: &str, email: &str, admin_secret: Option<&str>) -> RegisterInput {
    RegisterInput {
        name: name.to_string(),
        email: email.to_string(),
        password: PASSWORD.to_string(),
        avatar: None,
        phone: None,
        address: None,
        admin_secret: admin_secret.map(str::to_string),
    }
}

pub fn shipping_json() -> Value {
    serde_json::json!({
        "fullName": "Nguyen Van A",
        "phone": "0900000000",
        "address": "12 Nguyen Hue",
        "city": "Ho Chi Minh",
        "district": "District 1"
    })
}

pub async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).expect("json body")
    };
    (status, value)
}
