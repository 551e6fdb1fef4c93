pub mod auth;
pub mod brands;
pub mod cart;
pub mod chat;
pub mod common;
pub mod health;
pub mod orders;
pub mod products;
pub mod upload;

use crate::{
    auth::AuthService,
    config::AppConfig,
    db::DbPool,
    services::{
        BrandService, CartService, CatalogService, ChatService, IdentityService, OrderService,
        UploadService,
    },
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub auth: Arc<AuthService>,
    pub identity: Arc<IdentityService>,
    pub brands: Arc<BrandService>,
    pub catalog: Arc<CatalogService>,
    pub cart: Arc<CartService>,
    pub orders: Arc<OrderService>,
    pub chat: Arc<ChatService>,
    pub uploads: Arc<UploadService>,
}

impl AppServices {
    /// Wires every service against one pool. The chat relay is built from
    /// `config.chat`; a missing API key leaves it in fallback mode.
    pub fn new(db_pool: Arc<DbPool>, config: &AppConfig) -> anyhow::Result<Self> {
        let auth = Arc::new(AuthService::new(config.into(), db_pool.clone()));
        let identity = Arc::new(IdentityService::new(
            db_pool.clone(),
            auth.clone(),
            config.admin_secret.clone(),
        ));
        let catalog = Arc::new(CatalogService::new(db_pool.clone()));
        let chat = Arc::new(ChatService::from_config(
            catalog.clone(),
            config.chat.clone(),
        )?);

        Ok(Self {
            auth,
            identity,
            brands: Arc::new(BrandService::new(db_pool.clone())),
            catalog,
            cart: Arc::new(CartService::new(db_pool.clone())),
            orders: Arc::new(OrderService::new(db_pool)),
            chat,
            uploads: Arc::new(UploadService::new(config.clone())),
        })
    }

    /// Swaps the chat relay, e.g. for one pointed at a stub upstream.
    pub fn with_chat(mut self, chat: ChatService) -> Self {
        self.chat = Arc::new(chat);
        self
    }
}
