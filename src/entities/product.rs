use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Set;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Catalog product. Per-size stock lives in `product_sizes`.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub brand_id: Uuid,
    pub name: String,
    /// Whole currency units
    pub price: i64,
    #[sea_orm(column_type = "Text")]
    pub description: String,
    /// Ordered JSON array of image URLs
    #[sea_orm(column_type = "Json")]
    pub images: Json,
    #[sea_orm(nullable)]
    pub category: Option<ProductCategory>,
    pub gender: Gender,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn image_urls(&self) -> Vec<String> {
        serde_json::from_value(self.images.clone()).unwrap_or_default()
    }

    pub fn primary_image(&self) -> Option<String> {
        self.image_urls().into_iter().next()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::brand::Entity",
        from = "Column::BrandId",
        to = "super::brand::Column::Id"
    )]
    Brand,
    #[sea_orm(has_many = "super::product_size::Entity")]
    Sizes,
}

impl Related<super::brand::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Brand.def()
    }
}

impl Related<super::product_size::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Sizes.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, _insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        self.updated_at = Set(Utc::now());
        Ok(self)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProductCategory {
    #[sea_orm(string_value = "mens_shoes")]
    MensShoes,
    #[sea_orm(string_value = "womens_shoes")]
    WomensShoes,
    #[sea_orm(string_value = "sport")]
    Sport,
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "sneaker")]
    Sneaker,
    #[sea_orm(string_value = "sandal")]
    Sandal,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(10))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Gender {
    #[sea_orm(string_value = "male")]
    Male,
    #[sea_orm(string_value = "female")]
    Female,
    #[default]
    #[sea_orm(string_value = "unisex")]
    Unisex,
}
