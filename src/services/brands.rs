use crate::{entities::brand, errors::ServiceError};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BrandInput {
    #[validate(length(min = 1, max = 100, message = "Brand name must be 1-100 characters"))]
    pub name: String,
}

/// Brand catalog maintenance. Brand names are unique.
#[derive(Clone)]
pub struct BrandService {
    db: Arc<DatabaseConnection>,
}

impl BrandService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn list_brands(&self) -> Result<Vec<brand::Model>, ServiceError> {
        Ok(brand::Entity::find()
            .order_by_asc(brand::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn get_brand(&self, id: Uuid) -> Result<brand::Model, ServiceError> {
        brand::Entity::find_by_id(id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Brand {} not found", id)))
    }

    #[instrument(skip(self))]
    pub async fn create_brand(&self, input: BrandInput) -> Result<brand::Model, ServiceError> {
        input.validate()?;
        let name = input.name.trim().to_string();
        self.ensure_name_free(&name, None).await?;

        let now = Utc::now();
        let created = brand::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await?;

        info!(brand_id = %created.id, name = %created.name, "Brand created");
        Ok(created)
    }

    #[instrument(skip(self))]
    pub async fn update_brand(
        &self,
        id: Uuid,
        input: BrandInput,
    ) -> Result<brand::Model, ServiceError> {
        input.validate()?;
        let existing = self.get_brand(id).await?;
        let name = input.name.trim().to_string();
        self.ensure_name_free(&name, Some(id)).await?;

        let mut active: brand::ActiveModel = existing.into();
        active.name = Set(name);
        let updated = active.update(&*self.db).await?;

        info!(brand_id = %id, "Brand updated");
        Ok(updated)
    }

    /// Products keep their brand reference after the brand is removed.
    #[instrument(skip(self))]
    pub async fn delete_brand(&self, id: Uuid) -> Result<(), ServiceError> {
        let result = brand::Entity::delete_by_id(id).exec(&*self.db).await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("Brand {} not found", id)));
        }
        info!(brand_id = %id, "Brand deleted");
        Ok(())
    }

    async fn ensure_name_free(&self, name: &str, except: Option<Uuid>) -> Result<(), ServiceError> {
        let mut query = brand::Entity::find().filter(brand::Column::Name.eq(name));
        if let Some(id) = except {
            query = query.filter(brand::Column::Id.ne(id));
        }
        if query.one(&*self.db).await?.is_some() {
            warn!(name, "Duplicate brand name");
            return Err(ServiceError::Conflict(format!(
                "Brand '{}' already exists",
                name
            )));
        }
        Ok(())
    }
}
