//! Per-size stock counters.
//!
//! Reservation is a single conditional `UPDATE ... WHERE stock >= q`, so a
//! counter can never go negative no matter how many checkouts race for it.
//! Callers run these inside the order transaction.

use crate::{
    entities::{product, product_size},
    errors::ServiceError,
    metrics,
};
use sea_orm::{sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::{debug, warn};
use uuid::Uuid;

/// Takes `quantity` units of `size` off `product`'s stock.
pub(crate) async fn reserve<C: ConnectionTrait>(
    conn: &C,
    product: &product::Model,
    size: i32,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = product_size::Entity::update_many()
        .col_expr(
            product_size::Column::Stock,
            Expr::col(product_size::Column::Stock).sub(quantity),
        )
        .filter(product_size::Column::ProductId.eq(product.id))
        .filter(product_size::Column::Size.eq(size))
        .filter(product_size::Column::Stock.gte(quantity))
        .exec(conn)
        .await?;

    if result.rows_affected == 1 {
        debug!(product_id = %product.id, size, quantity, "Stock reserved");
        return Ok(());
    }

    let row = product_size::Entity::find()
        .filter(product_size::Column::ProductId.eq(product.id))
        .filter(product_size::Column::Size.eq(size))
        .one(conn)
        .await?;

    match row {
        None => {
            metrics::record_stock_reservation_failure("unknown_size");
            warn!(product_id = %product.id, size, "Order line references unknown size");
            Err(ServiceError::InvalidArgument(format!(
                "Size {} is not available for {}",
                size, product.name
            )))
        }
        Some(row) => {
            metrics::record_stock_reservation_failure("insufficient_stock");
            warn!(
                product_id = %product.id,
                size,
                requested = quantity,
                available = row.stock,
                "Insufficient stock"
            );
            Err(ServiceError::InsufficientStock {
                product: product.name.clone(),
                size,
                available: row.stock,
            })
        }
    }
}

/// Puts `quantity` units back. Returns `false` when the product or size no
/// longer exists, in which case nothing changes.
pub(crate) async fn restore<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    size: i32,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = product_size::Entity::update_many()
        .col_expr(
            product_size::Column::Stock,
            Expr::col(product_size::Column::Stock).add(quantity),
        )
        .filter(product_size::Column::ProductId.eq(product_id))
        .filter(product_size::Column::Size.eq(size))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(product_id = %product_id, size, quantity, "Stock restore skipped: size no longer exists");
        return Ok(false);
    }
    debug!(product_id = %product_id, size, quantity, "Stock restored");
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{establish_connection_with_config, run_migrations, DbConfig},
        entities::{Gender, ProductCategory},
        services::{
            brands::{BrandInput, BrandService},
            catalog::{find_product, CatalogService, CreateProductInput, SizeStock},
        },
    };
    use sea_orm::DatabaseConnection;
    use std::sync::Arc;
    use tokio::sync::Barrier;

    async fn pooled_db(dir: &tempfile::TempDir) -> Arc<DatabaseConnection> {
        let cfg = DbConfig {
            url: format!("sqlite://{}?mode=rwc", dir.path().join("stock.db").display()),
            max_connections: 8,
            min_connections: 8,
            ..Default::default()
        };
        let db = establish_connection_with_config(&cfg).await.unwrap();
        run_migrations(&db).await.unwrap();
        Arc::new(db)
    }

    async fn seed(db: &Arc<DatabaseConnection>, stock: i32) -> product::Model {
        let brand = BrandService::new(db.clone())
            .create_brand(BrandInput {
                name: "Race Brand".into(),
            })
            .await
            .unwrap();
        let view = CatalogService::new(db.clone())
            .create_product(CreateProductInput {
                brand_id: brand.id,
                name: "Race Runner".into(),
                price: 1_000_000,
                description: String::new(),
                images: Vec::new(),
                category: Some(ProductCategory::Running),
                gender: Gender::Unisex,
                sizes: vec![SizeStock { size: 42, stock }],
            })
            .await
            .unwrap();
        find_product(db.as_ref(), view.id).await.unwrap()
    }

    async fn current_stock(db: &DatabaseConnection, product_id: Uuid) -> i32 {
        product_size::Entity::find()
            .filter(product_size::Column::ProductId.eq(product_id))
            .filter(product_size::Column::Size.eq(42))
            .one(db)
            .await
            .unwrap()
            .unwrap()
            .stock
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn parallel_reservations_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let db = pooled_db(&dir).await;
        let product = seed(&db, 3).await;

        let contenders = 12;
        let barrier = Arc::new(Barrier::new(contenders));
        let tasks: Vec<_> = (0..contenders)
            .map(|_| {
                let db = db.clone();
                let product = product.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    reserve(db.as_ref(), &product, 42, 1).await
                })
            })
            .collect();

        let mut reserved = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(()) => reserved += 1,
                Err(ServiceError::InsufficientStock { available, .. }) => assert_eq!(available, 0),
                Err(other) => panic!("unexpected reservation error: {other}"),
            }
        }

        assert_eq!(reserved, 3);
        assert_eq!(current_stock(&db, product.id).await, 0);
    }

    #[tokio::test]
    async fn restore_skips_missing_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let db = pooled_db(&dir).await;
        let product = seed(&db, 1).await;

        assert!(restore(db.as_ref(), product.id, 42, 2).await.unwrap());
        assert!(!restore(db.as_ref(), product.id, 47, 2).await.unwrap());
        assert!(!restore(db.as_ref(), Uuid::new_v4(), 42, 2).await.unwrap());
        assert_eq!(current_stock(&db, product.id).await, 3);
    }
}
