//! SeaORM entities for the storefront schema.

pub mod brand;
pub mod cart;
pub mod cart_item;
pub mod order;
pub mod order_item;
pub mod product;
pub mod product_size;
pub mod user;

pub use order::{OrderStatus, PaymentMethod, PaymentStatus};
pub use product::{Gender, ProductCategory};
pub use user::UserRole;
