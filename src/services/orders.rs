use crate::{
    auth::AuthUser,
    entities::{order, order_item, OrderStatus, PaymentMethod, PaymentStatus},
    errors::ServiceError,
    metrics,
    services::{
        cart::{cart_lines, check_line_quantity, claim_cart, clear_cart_items, compute_total},
        catalog::find_product,
        order_status::{is_valid_transition, next_statuses, user_may_cancel},
        stock,
    },
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ShippingInfo {
    #[validate(length(min = 1, message = "Full name is required"))]
    pub full_name: String,
    #[validate(length(min = 1, message = "Phone is required"))]
    pub phone: String,
    #[validate(length(min = 1, message = "Address is required"))]
    pub address: String,
    #[validate(length(min = 1, message = "City is required"))]
    pub city: String,
    pub district: Option<String>,
    pub ward: Option<String>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLineInput {
    pub product_id: Uuid,
    pub size: i32,
    pub quantity: i32,
    pub unit_price: i64,
}

/// A fully priced order request. Totals must add up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderInput {
    pub shipping_info: ShippingInfo,
    pub lines: Vec<OrderLineInput>,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    pub items_subtotal: i64,
    pub shipping_fee: i64,
    pub grand_total: i64,
}

/// Checkout request: lines and prices come from the caller's cart. Declared
/// totals are optional and only cross-checked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutInput {
    pub shipping_info: ShippingInfo,
    #[serde(default)]
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub shipping_fee: i64,
    pub items_subtotal: Option<i64>,
    pub total_price: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderStatusInput {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    #[serde(flatten)]
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminOrderList {
    pub orders: Vec<OrderView>,
    /// Sum of grand totals over every order, cancelled ones included
    pub total_amount: i64,
    pub count: usize,
}

/// Checks the arithmetic of a priced order request.
pub fn validate_order_totals(input: &CreateOrderInput) -> Result<(), ServiceError> {
    if input.lines.is_empty() {
        return Err(ServiceError::InvalidArgument(
            "Order must contain at least one item".to_string(),
        ));
    }
    for line in &input.lines {
        check_line_quantity(line.quantity)?;
        if line.unit_price < 0 {
            return Err(ServiceError::InvalidArgument(format!(
                "Unit price for product {} cannot be negative",
                line.product_id
            )));
        }
    }
    if input.shipping_fee < 0 {
        return Err(ServiceError::InvalidArgument(
            "Shipping fee cannot be negative".to_string(),
        ));
    }

    let subtotal = input
        .lines
        .iter()
        .try_fold(0i64, |acc, l| {
            l.unit_price
                .checked_mul(i64::from(l.quantity))
                .and_then(|line_total| acc.checked_add(line_total))
        })
        .ok_or_else(|| ServiceError::InvalidArgument("Order total is too large".to_string()))?;
    if input.items_subtotal != subtotal {
        return Err(ServiceError::InvalidArgument(format!(
            "Items subtotal {} does not match line items ({})",
            input.items_subtotal, subtotal
        )));
    }
    let expected = input
        .items_subtotal
        .checked_add(input.shipping_fee)
        .ok_or_else(|| ServiceError::InvalidArgument("Order total is too large".to_string()))?;
    if input.grand_total != expected {
        return Err(ServiceError::InvalidArgument(format!(
            "Grand total {} must equal items subtotal plus shipping fee ({})",
            input.grand_total, expected
        )));
    }
    Ok(())
}

/// Order placement, history and status changes. Every stock movement happens
/// in the same transaction as the order row it belongs to.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input), fields(lines = input.lines.len()))]
    pub async fn create_order(
        &self,
        user_id: Uuid,
        input: CreateOrderInput,
    ) -> Result<OrderView, ServiceError> {
        input.shipping_info.validate()?;
        validate_order_totals(&input)?;

        let txn = self.db.begin().await?;
        let created = place_order(&txn, user_id, &input).await?;
        txn.commit().await?;

        metrics::record_order_created();
        info!(order_id = %created.id, user_id = %user_id, grand_total = created.grand_total, "Order created");
        self.load_view(created).await
    }

    /// Turns the caller's cart into an order and empties the cart, atomically.
    #[instrument(skip(self, input))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        input: CheckoutInput,
    ) -> Result<OrderView, ServiceError> {
        input.shipping_info.validate()?;

        let txn = self.db.begin().await?;
        let cart = claim_cart(&txn, user_id).await?;
        let lines = match &cart {
            Some(cart) => cart_lines(&txn, cart.id).await?,
            None => Vec::new(),
        };
        let cart = match cart {
            Some(cart) if !lines.is_empty() => cart,
            _ => return Err(ServiceError::InvalidArgument("Cart is empty".to_string())),
        };

        let items_subtotal = compute_total(lines.iter().map(|l| (l.unit_price, l.quantity)));
        let grand_total = items_subtotal
            .checked_add(input.shipping_fee)
            .ok_or_else(|| ServiceError::InvalidArgument("Order total is too large".to_string()))?;

        if let Some(declared) = input.items_subtotal {
            if declared != items_subtotal {
                warn!(declared, computed = items_subtotal, "Declared subtotal mismatch");
                return Err(ServiceError::InvalidArgument(format!(
                    "Items subtotal {} does not match cart ({})",
                    declared, items_subtotal
                )));
            }
        }
        if let Some(declared) = input.total_price {
            if declared != grand_total {
                warn!(declared, computed = grand_total, "Declared total mismatch");
                return Err(ServiceError::InvalidArgument(format!(
                    "Total {} does not match cart total plus shipping ({})",
                    declared, grand_total
                )));
            }
        }

        let order_input = CreateOrderInput {
            shipping_info: input.shipping_info,
            lines: lines
                .iter()
                .map(|l| OrderLineInput {
                    product_id: l.product_id,
                    size: l.size,
                    quantity: l.quantity,
                    unit_price: l.unit_price,
                })
                .collect(),
            payment_method: input.payment_method,
            items_subtotal,
            shipping_fee: input.shipping_fee,
            grand_total,
        };
        validate_order_totals(&order_input)?;

        let created = place_order(&txn, user_id, &order_input).await?;
        clear_cart_items(&txn, cart.id).await?;
        txn.commit().await?;

        metrics::record_order_created();
        info!(order_id = %created.id, user_id = %user_id, grand_total, "Checkout completed");
        self.load_view(created).await
    }

    #[instrument(skip(self))]
    pub async fn list_my_orders(&self, user_id: Uuid) -> Result<Vec<OrderView>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        load_views(&*self.db, orders).await
    }

    /// Visible to the owner and to administrators.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn get_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderView, ServiceError> {
        let found = find_order(&*self.db, id).await?;
        if found.user_id != caller.user_id && !caller.is_admin() {
            warn!(order_id = %id, "Order access denied");
            return Err(ServiceError::Forbidden(
                "You do not have access to this order".to_string(),
            ));
        }
        self.load_view(found).await
    }

    /// Shopper-initiated cancellation; only the owner, only while pending.
    #[instrument(skip(self, caller), fields(caller = %caller.user_id))]
    pub async fn cancel_order(&self, caller: &AuthUser, id: Uuid) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;
        let found = claim_order(&txn, id).await?;

        if found.user_id != caller.user_id {
            warn!(order_id = %id, "Cancel attempted by non-owner");
            return Err(ServiceError::Forbidden(
                "You can only cancel your own orders".to_string(),
            ));
        }
        if !user_may_cancel(found.status) {
            return Err(ServiceError::InvalidState(format!(
                "Order can no longer be cancelled (status: {})",
                found.status
            )));
        }

        let cancelled = cancel_within(&txn, found).await?;
        txn.commit().await?;

        metrics::record_order_cancelled();
        info!(order_id = %id, "Order cancelled by customer");
        self.load_view(cancelled).await
    }

    #[instrument(skip(self))]
    pub async fn list_all_orders(&self) -> Result<AdminOrderList, ServiceError> {
        let orders = order::Entity::find()
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?;
        let total_amount: i64 = orders.iter().map(|o| o.grand_total).sum();
        let orders = load_views(&*self.db, orders).await?;

        Ok(AdminOrderList {
            count: orders.len(),
            orders,
            total_amount,
        })
    }

    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: OrderStatus,
    ) -> Result<OrderView, ServiceError> {
        let txn = self.db.begin().await?;
        let found = claim_order(&txn, id).await?;
        let old_status = found.status;

        if !is_valid_transition(old_status, new_status) {
            warn!(order_id = %id, from = %old_status, to = %new_status, "Rejected status transition");
            return Err(ServiceError::InvalidState(format!(
                "Cannot move order from '{}' to '{}' (allowed: {:?})",
                old_status,
                new_status,
                next_statuses(old_status)
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
            )));
        }

        let updated = if new_status == OrderStatus::Cancelled {
            cancel_within(&txn, found).await?
        } else {
            let now = Utc::now();
            let mut update = order::Entity::update_many()
                .col_expr(order::Column::Status, Expr::value(new_status))
                .col_expr(order::Column::UpdatedAt, Expr::value(now));
            if new_status == OrderStatus::Delivered {
                update = update
                    .col_expr(order::Column::DeliveredAt, Expr::value(now))
                    .col_expr(order::Column::PaymentStatus, Expr::value(PaymentStatus::Paid));
            }
            apply_guarded(&txn, update, id, old_status).await?;
            find_order(&txn, id).await?
        };
        txn.commit().await?;

        if new_status == OrderStatus::Cancelled {
            metrics::record_order_cancelled();
        }
        info!(order_id = %id, from = %old_status, to = %new_status, "Order status updated");
        self.load_view(updated).await
    }

    async fn load_view(&self, found: order::Model) -> Result<OrderView, ServiceError> {
        let mut views = load_views(&*self.db, vec![found]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::InternalError("order view missing".into()))
    }
}

/// Reserves stock for every line, then writes the order and its snapshots.
/// Any failing line aborts the caller's transaction.
async fn place_order<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    input: &CreateOrderInput,
) -> Result<order::Model, ServiceError> {
    let order_id = Uuid::new_v4();
    let mut snapshots = Vec::with_capacity(input.lines.len());

    for (position, line) in input.lines.iter().enumerate() {
        let product = find_product(conn, line.product_id).await?;
        stock::reserve(conn, &product, line.size, line.quantity).await?;

        snapshots.push(order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            position: Set(position as i32),
            product_id: Set(product.id),
            image: Set(product.primary_image()),
            name: Set(product.name),
            unit_price: Set(line.unit_price),
            quantity: Set(line.quantity),
            size: Set(line.size),
        });
    }

    let shipping = &input.shipping_info;
    let now = Utc::now();
    let created = order::ActiveModel {
        id: Set(order_id),
        user_id: Set(user_id),
        full_name: Set(shipping.full_name.trim().to_string()),
        phone: Set(shipping.phone.trim().to_string()),
        address: Set(shipping.address.trim().to_string()),
        city: Set(shipping.city.trim().to_string()),
        district: Set(shipping.district.clone()),
        ward: Set(shipping.ward.clone()),
        note: Set(shipping.note.clone()),
        payment_method: Set(input.payment_method),
        payment_status: Set(PaymentStatus::Unpaid),
        items_subtotal: Set(input.items_subtotal),
        shipping_fee: Set(input.shipping_fee),
        grand_total: Set(input.grand_total),
        status: Set(OrderStatus::PendingConfirmation),
        delivered_at: Set(None),
        cancelled_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    order_item::Entity::insert_many(snapshots)
        .exec_without_returning(conn)
        .await?;
    Ok(created)
}

/// Marks the order cancelled and gives its stock back. The status flip is
/// conditional on the status read earlier, so stock is restored at most once.
async fn cancel_within<C: ConnectionTrait>(
    conn: &C,
    found: order::Model,
) -> Result<order::Model, ServiceError> {
    let now = Utc::now();
    let update = order::Entity::update_many()
        .col_expr(order::Column::Status, Expr::value(OrderStatus::Cancelled))
        .col_expr(order::Column::CancelledAt, Expr::value(now))
        .col_expr(order::Column::UpdatedAt, Expr::value(now));
    apply_guarded(conn, update, found.id, found.status).await?;

    let items = order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(found.id))
        .all(conn)
        .await?;
    let mut skipped = 0usize;
    for item in &items {
        if !stock::restore(conn, item.product_id, item.size, item.quantity).await? {
            skipped += 1;
        }
    }
    if skipped > 0 {
        warn!(order_id = %found.id, skipped, "Some order lines could not be restocked");
    }

    find_order(conn, found.id).await
}

async fn apply_guarded<C: ConnectionTrait>(
    conn: &C,
    update: sea_orm::UpdateMany<order::Entity>,
    id: Uuid,
    expected: OrderStatus,
) -> Result<(), ServiceError> {
    let result = update
        .filter(order::Column::Id.eq(id))
        .filter(order::Column::Status.eq(expected))
        .exec(conn)
        .await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::InvalidState(
            "Order status changed concurrently; reload and retry".to_string(),
        ));
    }
    Ok(())
}

/// Like [`find_order`], but first writes to the row so the status read
/// afterwards stays current until the transaction ends.
async fn claim_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<order::Model, ServiceError> {
    order::Entity::update_many()
        .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(order::Column::Id.eq(id))
        .exec(conn)
        .await?;
    find_order(conn, id).await
}

async fn find_order<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
}

async fn load_views<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderView>, ServiceError> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<Uuid> = orders.iter().map(|o| o.id).collect();
    let mut items_by_order: HashMap<Uuid, Vec<order_item::Model>> = HashMap::new();
    for item in order_item::Entity::find()
        .filter(order_item::Column::OrderId.is_in(ids))
        .order_by_asc(order_item::Column::Position)
        .all(conn)
        .await?
    {
        items_by_order.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|o| OrderView {
            items: items_by_order.remove(&o.id).unwrap_or_default(),
            order: o,
        })
        .collect())
}
