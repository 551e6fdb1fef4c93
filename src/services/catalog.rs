use crate::{
    entities::{brand, cart_item, product, product_size, Gender, ProductCategory},
    errors::ServiceError,
    services::cart::refresh_cart_total,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, Func, Query},
    ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

pub const DEFAULT_PAGE_SIZE: u64 = 12;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeStock {
    pub size: i32,
    pub stock: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrandSummary {
    pub id: Uuid,
    pub name: String,
}

/// Product as presented to clients: brand resolved, sizes ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub description: String,
    pub images: Vec<String>,
    pub category: Option<ProductCategory>,
    pub gender: Gender,
    pub brand_id: Uuid,
    pub brand: Option<BrandSummary>,
    pub sizes: Vec<SizeStock>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductView {
    pub fn stock_for(&self, size: i32) -> Option<i32> {
        self.sizes.iter().find(|s| s.size == size).map(|s| s.stock)
    }

    pub fn in_stock_sizes(&self) -> Vec<i32> {
        self.sizes
            .iter()
            .filter(|s| s.stock > 0)
            .map(|s| s.size)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProductQuery {
    pub brand: Option<Uuid>,
    pub category: Option<ProductCategory>,
    pub gender: Option<Gender>,
    pub search: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    /// Only products with this size in stock
    pub size: Option<i32>,
    pub sort: Option<ProductSort>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPage {
    pub items: Vec<ProductView>,
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_pages: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductInput {
    pub brand_id: Uuid,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub images: Vec<String>,
    pub category: Option<ProductCategory>,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub sizes: Vec<SizeStock>,
}

/// Partial update; `sizes`, when present, replaces the whole size set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductInput {
    pub brand_id: Option<Uuid>,
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    #[validate(range(min = 0))]
    pub price: Option<i64>,
    pub description: Option<String>,
    pub images: Option<Vec<String>>,
    pub category: Option<ProductCategory>,
    pub gender: Option<Gender>,
    pub sizes: Option<Vec<SizeStock>>,
}

/// Size set rules: positive sizes, no duplicates, non-negative stock.
pub fn validate_sizes(sizes: &[SizeStock]) -> Result<(), ServiceError> {
    let mut seen = HashSet::new();
    for entry in sizes {
        if entry.size <= 0 {
            return Err(ServiceError::InvalidArgument(format!(
                "Invalid size {}",
                entry.size
            )));
        }
        if entry.stock < 0 {
            return Err(ServiceError::InvalidArgument(format!(
                "Stock for size {} cannot be negative",
                entry.size
            )));
        }
        if !seen.insert(entry.size) {
            return Err(ServiceError::InvalidArgument(format!(
                "Size {} is listed more than once",
                entry.size
            )));
        }
    }
    Ok(())
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_products(&self, query: ProductQuery) -> Result<ProductPage, ServiceError> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        let page = query.page.unwrap_or(1).max(1);

        let mut select = product::Entity::find();

        if let Some(brand_id) = query.brand {
            select = select.filter(product::Column::BrandId.eq(brand_id));
        }
        if let Some(category) = query.category {
            select = select.filter(product::Column::Category.eq(category));
        }
        if let Some(gender) = query.gender {
            select = select.filter(product::Column::Gender.eq(gender));
        }
        if let Some(term) = query.search.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            select = select.filter(name_matches(term));
        }
        if let Some(min) = query.min_price {
            select = select.filter(product::Column::Price.gte(min));
        }
        if let Some(max) = query.max_price {
            select = select.filter(product::Column::Price.lte(max));
        }
        if let Some(size) = query.size {
            select = select.filter(
                product::Column::Id.in_subquery(
                    Query::select()
                        .column(product_size::Column::ProductId)
                        .from(product_size::Entity)
                        .and_where(product_size::Column::Size.eq(size))
                        .and_where(product_size::Column::Stock.gt(0))
                        .to_owned(),
                ),
            );
        }

        select = match query.sort.unwrap_or_default() {
            ProductSort::Newest => select.order_by_desc(product::Column::CreatedAt),
            ProductSort::PriceAsc => select.order_by_asc(product::Column::Price),
            ProductSort::PriceDesc => select.order_by_desc(product::Column::Price),
            ProductSort::Name => select.order_by_asc(product::Column::Name),
        };

        let paginator = select.paginate(&*self.db, limit);
        let total = paginator.num_items().await?;
        let products = paginator.fetch_page(page - 1).await?;
        let items = build_views(&*self.db, products).await?;

        Ok(ProductPage {
            items,
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit),
        })
    }

    #[instrument(skip(self))]
    pub async fn get_product(&self, id: Uuid) -> Result<ProductView, ServiceError> {
        let product = find_product(&*self.db, id).await?;
        let mut views = build_views(&*self.db, vec![product]).await?;
        views
            .pop()
            .ok_or_else(|| ServiceError::InternalError("product view missing".into()))
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(
        &self,
        input: CreateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        validate_sizes(&input.sizes)?;
        self.ensure_brand(input.brand_id).await?;

        let txn = self.db.begin().await?;
        let now = Utc::now();
        let product_id = Uuid::new_v4();

        product::ActiveModel {
            id: Set(product_id),
            brand_id: Set(input.brand_id),
            name: Set(input.name.trim().to_string()),
            price: Set(input.price),
            description: Set(input.description),
            images: Set(serde_json::json!(input.images)),
            category: Set(input.category),
            gender: Set(input.gender),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        for entry in &input.sizes {
            insert_size(&txn, product_id, *entry).await?;
        }
        txn.commit().await?;

        info!(product_id = %product_id, sizes = input.sizes.len(), "Product created");
        self.get_product(product_id).await
    }

    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        id: Uuid,
        input: UpdateProductInput,
    ) -> Result<ProductView, ServiceError> {
        input.validate()?;
        if let Some(sizes) = &input.sizes {
            validate_sizes(sizes)?;
        }
        if let Some(brand_id) = input.brand_id {
            self.ensure_brand(brand_id).await?;
        }

        let txn = self.db.begin().await?;
        let existing = find_product(&txn, id).await?;

        let mut active: product::ActiveModel = existing.into();
        if let Some(brand_id) = input.brand_id {
            active.brand_id = Set(brand_id);
        }
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(price) = input.price {
            active.price = Set(price);
        }
        if let Some(description) = input.description {
            active.description = Set(description);
        }
        if let Some(images) = input.images {
            active.images = Set(serde_json::json!(images));
        }
        if let Some(category) = input.category {
            active.category = Set(Some(category));
        }
        if let Some(gender) = input.gender {
            active.gender = Set(gender);
        }
        active.update(&txn).await?;

        if let Some(sizes) = input.sizes {
            replace_sizes(&txn, id, &sizes).await?;
        }
        txn.commit().await?;

        info!(product_id = %id, "Product updated");
        self.get_product(id).await
    }

    /// Removes the product, its sizes and any cart lines pointing at it.
    /// Orders keep their snapshots.
    #[instrument(skip(self))]
    pub async fn delete_product(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        find_product(&txn, id).await?;

        let affected_carts: Vec<Uuid> = cart_item::Entity::find()
            .select_only()
            .column(cart_item::Column::CartId)
            .filter(cart_item::Column::ProductId.eq(id))
            .distinct()
            .into_tuple()
            .all(&txn)
            .await?;

        cart_item::Entity::delete_many()
            .filter(cart_item::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        for cart_id in &affected_carts {
            refresh_cart_total(&txn, *cart_id).await?;
        }

        product_size::Entity::delete_many()
            .filter(product_size::Column::ProductId.eq(id))
            .exec(&txn)
            .await?;
        product::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(product_id = %id, carts_touched = affected_carts.len(), "Product deleted");
        Ok(())
    }

    /// Products whose name contains any of `words`, case-insensitively.
    #[instrument(skip(self))]
    pub async fn search_by_words(
        &self,
        words: &[String],
        limit: u64,
    ) -> Result<Vec<ProductView>, ServiceError> {
        if words.is_empty() {
            return Ok(Vec::new());
        }
        let condition = words
            .iter()
            .fold(Condition::any(), |cond, word| cond.add(name_matches(word)));

        let products = product::Entity::find()
            .filter(condition)
            .order_by_desc(product::Column::CreatedAt)
            .limit(limit)
            .all(&*self.db)
            .await?;
        build_views(&*self.db, products).await
    }

    async fn ensure_brand(&self, brand_id: Uuid) -> Result<(), ServiceError> {
        if brand::Entity::find_by_id(brand_id)
            .one(&*self.db)
            .await?
            .is_none()
        {
            warn!(brand_id = %brand_id, "Unknown brand on product write");
            return Err(ServiceError::NotFound(format!(
                "Brand {} not found",
                brand_id
            )));
        }
        Ok(())
    }
}

fn name_matches(term: &str) -> sea_orm::sea_query::SimpleExpr {
    Expr::expr(Func::lower(Expr::col(product::Column::Name)))
        .like(format!("%{}%", term.to_lowercase()))
}

pub(crate) async fn find_product<C: ConnectionTrait>(
    conn: &C,
    id: Uuid,
) -> Result<product::Model, ServiceError> {
    product::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", id)))
}

async fn insert_size<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    entry: SizeStock,
) -> Result<(), ServiceError> {
    product_size::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(product_id),
        size: Set(entry.size),
        stock: Set(entry.stock),
    }
    .insert(conn)
    .await?;
    Ok(())
}

async fn replace_sizes<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    sizes: &[SizeStock],
) -> Result<(), ServiceError> {
    let keep: Vec<i32> = sizes.iter().map(|s| s.size).collect();
    product_size::Entity::delete_many()
        .filter(product_size::Column::ProductId.eq(product_id))
        .filter(product_size::Column::Size.is_not_in(keep))
        .exec(conn)
        .await?;

    for entry in sizes {
        let updated = product_size::Entity::update_many()
            .col_expr(product_size::Column::Stock, Expr::value(entry.stock))
            .filter(product_size::Column::ProductId.eq(product_id))
            .filter(product_size::Column::Size.eq(entry.size))
            .exec(conn)
            .await?;
        if updated.rows_affected == 0 {
            insert_size(conn, product_id, *entry).await?;
        }
    }
    Ok(())
}

/// Resolves brand and sizes for a batch of products, preserving order.
pub(crate) async fn build_views<C: ConnectionTrait>(
    conn: &C,
    products: Vec<product::Model>,
) -> Result<Vec<ProductView>, ServiceError> {
    if products.is_empty() {
        return Ok(Vec::new());
    }
    let product_ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
    let brand_ids: Vec<Uuid> = products
        .iter()
        .map(|p| p.brand_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let mut sizes_by_product: HashMap<Uuid, Vec<SizeStock>> = HashMap::new();
    for row in product_size::Entity::find()
        .filter(product_size::Column::ProductId.is_in(product_ids))
        .order_by_asc(product_size::Column::Size)
        .all(conn)
        .await?
    {
        sizes_by_product
            .entry(row.product_id)
            .or_default()
            .push(SizeStock {
                size: row.size,
                stock: row.stock,
            });
    }

    let brands: HashMap<Uuid, BrandSummary> = brand::Entity::find()
        .filter(brand::Column::Id.is_in(brand_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|b| {
            (
                b.id,
                BrandSummary {
                    id: b.id,
                    name: b.name,
                },
            )
        })
        .collect();

    Ok(products
        .into_iter()
        .map(|p| {
            let images = p.image_urls();
            ProductView {
                sizes: sizes_by_product.remove(&p.id).unwrap_or_default(),
                brand: brands.get(&p.brand_id).cloned(),
                id: p.id,
                name: p.name,
                price: p.price,
                description: p.description,
                images,
                category: p.category,
                gender: p.gender,
                brand_id: p.brand_id,
                created_at: p.created_at,
                updated_at: p.updated_at,
            }
        })
        .collect())
}
