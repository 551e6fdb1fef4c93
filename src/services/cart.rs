use crate::{
    entities::{cart, cart_item, product, product_size},
    errors::ServiceError,
    services::catalog::find_product,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Sum of `unit_price * quantity` over `(unit_price, quantity)` pairs.
pub fn compute_total<I>(lines: I) -> i64
where
    I: IntoIterator<Item = (i64, i32)>,
{
    lines
        .into_iter()
        .map(|(unit_price, quantity)| unit_price * i64::from(quantity))
        .sum()
}

/// Upper bound for a single cart or order line.
pub const MAX_LINE_QUANTITY: i32 = 100;

/// Rejects line quantities outside `1..=MAX_LINE_QUANTITY`.
pub fn check_line_quantity(quantity: i32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::InvalidArgument(
            "Quantity must be at least 1".to_string(),
        ));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::InvalidArgument(format!(
            "Quantity cannot exceed {} per line",
            MAX_LINE_QUANTITY
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AddToCartInput {
    pub product_id: Uuid,
    pub size: i32,
    #[validate(range(min = 1, max = 100, message = "Quantity must be between 1 and 100"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCartItemInput {
    pub item_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartProductSummary {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLineView {
    pub id: Uuid,
    pub product_id: Uuid,
    pub size: i32,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
    /// Live product data; `None` once the product is gone.
    pub product: Option<CartProductSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub items: Vec<CartLineView>,
    pub total_price: i64,
    pub item_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Per-user shopping cart. Unit prices are locked when a line is first
/// added; the stored total is recomputed after every mutation.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn get_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let cart = get_or_create_cart(&*self.db, user_id).await?;
        load_view(&*self.db, cart).await
    }

    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        let product = find_product(&txn, input.product_id).await?;
        let size_row = product_size::Entity::find()
            .filter(product_size::Column::ProductId.eq(product.id))
            .filter(product_size::Column::Size.eq(input.size))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!(
                    "Size {} is not available for {}",
                    input.size, product.name
                ))
            })?;

        let cart = get_or_create_cart(&txn, user_id).await?;
        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product.id))
            .filter(cart_item::Column::Size.eq(input.size))
            .one(&txn)
            .await?;

        let wanted = existing
            .as_ref()
            .map_or(0, |line| line.quantity)
            .checked_add(input.quantity)
            .ok_or_else(|| ServiceError::InvalidArgument("Quantity is too large".to_string()))?;
        check_line_quantity(wanted)?;
        if wanted > size_row.stock {
            warn!(
                product_id = %product.id,
                size = input.size,
                wanted,
                available = size_row.stock,
                "Add to cart exceeds stock"
            );
            return Err(ServiceError::InsufficientStock {
                product: product.name,
                size: input.size,
                available: size_row.stock,
            });
        }

        match existing {
            Some(line) => {
                let mut active: cart_item::ActiveModel = line.into();
                active.quantity = Set(wanted);
                active.update(&txn).await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    size: Set(input.size),
                    quantity: Set(input.quantity),
                    unit_price: Set(product.price),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;
            }
        }

        let total = refresh_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, product_id = %input.product_id, size = input.size, total, "Item added to cart");
        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        user_id: Uuid,
        input: UpdateCartItemInput,
    ) -> Result<CartView, ServiceError> {
        check_line_quantity(input.quantity)?;

        let txn = self.db.begin().await?;
        let cart = get_or_create_cart(&txn, user_id).await?;
        let line = cart_item::Entity::find_by_id(input.item_id)
            .filter(cart_item::Column::CartId.eq(cart.id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Cart item {} not found", input.item_id))
            })?;

        let mut active: cart_item::ActiveModel = line.into();
        active.quantity = Set(input.quantity);
        active.update(&txn).await?;

        let total = refresh_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, item_id = %input.item_id, quantity = input.quantity, total, "Cart item updated");
        self.get_cart(user_id).await
    }

    /// Removing a line that is not in the cart is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(&self, user_id: Uuid, item_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = get_or_create_cart(&txn, user_id).await?;
        let removed = cart_item::Entity::delete_many()
            .filter(cart_item::Column::Id.eq(item_id))
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?
            .rows_affected;
        refresh_cart_total(&txn, cart.id).await?;
        txn.commit().await?;

        if removed == 0 {
            debug!(cart_id = %cart.id, item_id = %item_id, "Cart item already absent");
        } else {
            info!(cart_id = %cart.id, item_id = %item_id, "Cart item removed");
        }
        self.get_cart(user_id).await
    }

    #[instrument(skip(self))]
    pub async fn clear_cart(&self, user_id: Uuid) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;
        let cart = get_or_create_cart(&txn, user_id).await?;
        clear_cart_items(&txn, cart.id).await?;
        txn.commit().await?;

        info!(cart_id = %cart.id, "Cart cleared");
        self.get_cart(user_id).await
    }
}

/// Returns the user's cart, creating an empty one on first access.
pub(crate) async fn get_or_create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    if let Some(existing) = find_cart(conn, user_id).await? {
        return Ok(existing);
    }

    let now = Utc::now();
    let fresh = cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        total_price: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    };
    // A concurrent first access may win the race; the unique user_id keeps one.
    cart::Entity::insert(fresh)
        .on_conflict(
            OnConflict::column(cart::Column::UserId)
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(conn)
        .await?;

    find_cart(conn, user_id)
        .await?
        .ok_or_else(|| ServiceError::InternalError("cart vanished after insert".into()))
}

pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

/// Writes to the user's cart row before reading it, so the caller's
/// transaction holds the row lock (the database write lock on SQLite) until
/// it ends. Concurrent checkouts of one cart therefore run one at a time.
pub(crate) async fn claim_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    let touched = cart::Entity::update_many()
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::UserId.eq(user_id))
        .exec(conn)
        .await?;
    if touched.rows_affected == 0 {
        return Ok(None);
    }
    find_cart(conn, user_id).await
}

pub(crate) async fn cart_lines<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<cart_item::Model>, ServiceError> {
    Ok(cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

pub(crate) async fn clear_cart_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<(), ServiceError> {
    cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    refresh_cart_total(conn, cart_id).await?;
    Ok(())
}

/// Recomputes and stores the cart total from its lines.
pub(crate) async fn refresh_cart_total<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<i64, ServiceError> {
    let lines = cart_lines(conn, cart_id).await?;
    let total = compute_total(lines.iter().map(|l| (l.unit_price, l.quantity)));

    cart::Entity::update_many()
        .col_expr(cart::Column::TotalPrice, Expr::value(total))
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(total)
}

async fn load_view<C: ConnectionTrait>(
    conn: &C,
    cart: cart::Model,
) -> Result<CartView, ServiceError> {
    let lines = cart_lines(conn, cart.id).await?;
    let product_ids: Vec<Uuid> = lines.iter().map(|l| l.product_id).collect();

    let products: HashMap<Uuid, product::Model> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };

    let items: Vec<CartLineView> = lines
        .into_iter()
        .map(|line| CartLineView {
            id: line.id,
            product_id: line.product_id,
            size: line.size,
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
            product: products.get(&line.product_id).map(|p| CartProductSummary {
                id: p.id,
                name: p.name.clone(),
                price: p.price,
                image: p.primary_image(),
            }),
        })
        .collect();

    Ok(CartView {
        id: cart.id,
        user_id: cart.user_id,
        item_count: items.iter().map(|i| i.quantity).sum(),
        items,
        total_price: cart.total_price,
        updated_at: cart.updated_at,
    })
}
