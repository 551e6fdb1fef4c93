//! Business services. Each owns a shared connection pool handle and is
//! cheap to clone.

pub mod brands;
pub mod cart;
pub mod catalog;
pub mod chat;
pub mod identity;
pub mod order_status;
pub mod orders;
pub mod stock;
pub mod uploads;

pub use brands::BrandService;
pub use cart::CartService;
pub use catalog::CatalogService;
pub use chat::ChatService;
pub use identity::IdentityService;
pub use orders::OrderService;
pub use uploads::UploadService;
