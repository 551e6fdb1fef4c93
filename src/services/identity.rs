use crate::{
    auth::{hash_password, verify_password, AuthService},
    entities::{cart, user, UserRole},
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::{Expr, SimpleExpr},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    IsolationLevel, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterInput {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    /// Bootstrap secret; only honoured while no admin exists
    pub admin_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginInput {
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserInput {
    #[validate(length(min = 1, max = 100))]
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAdminInput {
    #[validate(length(min = 1, max = 100, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: String,
    #[validate(length(min = 6, message = "Password must be at least 6 characters"))]
    pub password: String,
}

/// User as exposed over the API; never carries the password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub avatar: Option<String>,
    pub role: UserRole,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserProfile {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            avatar: model.avatar,
            role: model.role,
            phone: model.phone,
            address: model.address,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: UserProfile,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Accounts, credentials and the admin invariants: the first admin can be
/// bootstrapped with a shared secret, and the last admin can never be
/// removed or demoted.
#[derive(Clone)]
pub struct IdentityService {
    db: Arc<DatabaseConnection>,
    auth: Arc<AuthService>,
    admin_secret: Option<String>,
}

impl IdentityService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        auth: Arc<AuthService>,
        admin_secret: Option<String>,
    ) -> Self {
        Self {
            db,
            auth,
            admin_secret,
        }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn register(&self, input: RegisterInput) -> Result<AuthSession, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let password_hash = hash_password(&input.password)?;

        let wants_admin = match (&self.admin_secret, &input.admin_secret) {
            (Some(expected), Some(given)) => expected == given,
            _ => false,
        };

        // With no admin rows there is nothing to lock, so a bootstrap attempt
        // runs serializable: two of them cannot both commit after seeing zero.
        let txn = if wants_admin {
            let txn = self
                .db
                .begin_with_config(Some(IsolationLevel::Serializable), None)
                .await?;
            lock_admin_rows(&txn).await?;
            txn
        } else {
            self.db.begin().await?
        };
        ensure_email_free(&txn, &email).await?;

        let role = if wants_admin && count_admins(&txn).await? == 0 {
            UserRole::Admin
        } else {
            if input.admin_secret.is_some() {
                warn!(email = %email, "Admin bootstrap refused");
            }
            UserRole::User
        };

        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            avatar: Set(input.avatar),
            role: Set(role),
            phone: Set(input.phone),
            address: Set(input.address),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(user_id = %created.id, role = %created.role, "User registered");
        self.session_for(created)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput) -> Result<AuthSession, ServiceError> {
        let email = normalize_email(&input.email);
        let found = user::Entity::find()
            .filter(user::Column::Email.eq(email.as_str()))
            .one(&*self.db)
            .await?;

        let Some(found) = found else {
            warn!("Login failed: unknown email");
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        };
        if !verify_password(&input.password, &found.password_hash)? {
            warn!(user_id = %found.id, "Login failed: wrong password");
            return Err(ServiceError::Unauthorized(INVALID_CREDENTIALS.to_string()));
        }

        info!(user_id = %found.id, "User logged in");
        self.session_for(found)
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        Ok(find_user(&*self.db, user_id).await?.into())
    }

    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<UserProfile>, ServiceError> {
        Ok(user::Entity::find()
            .order_by_desc(user::Column::CreatedAt)
            .all(&*self.db)
            .await?
            .into_iter()
            .map(UserProfile::from)
            .collect())
    }

    #[instrument(skip(self, input))]
    pub async fn update_user(
        &self,
        id: Uuid,
        input: UpdateUserInput,
    ) -> Result<UserProfile, ServiceError> {
        input.validate()?;

        let txn = self.db.begin().await?;
        if input.role == Some(UserRole::User) {
            lock_admin_rows(&txn).await?;
        }
        let existing = find_user(&txn, id).await?;

        if existing.role == UserRole::Admin
            && input.role == Some(UserRole::User)
            && count_admins(&txn).await? <= 1
        {
            warn!(user_id = %id, "Refusing to demote the last admin");
            return Err(ServiceError::InvalidState(
                "Cannot demote the last admin".to_string(),
            ));
        }

        let mut active: user::ActiveModel = existing.into();
        if let Some(name) = input.name {
            active.name = Set(name.trim().to_string());
        }
        if let Some(role) = input.role {
            active.role = Set(role);
        }
        if let Some(phone) = input.phone {
            active.phone = Set(Some(phone));
        }
        if let Some(address) = input.address {
            active.address = Set(Some(address));
        }
        let updated = active.update(&txn).await?;
        txn.commit().await?;

        info!(user_id = %id, role = %updated.role, "User updated");
        Ok(updated.into())
    }

    /// Removes the user and their cart. Orders are kept.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;
        lock_admin_rows(&txn).await?;
        let existing = find_user(&txn, id).await?;

        if existing.role == UserRole::Admin && count_admins(&txn).await? <= 1 {
            warn!(user_id = %id, "Refusing to delete the last admin");
            return Err(ServiceError::InvalidState(
                "Cannot delete the last admin".to_string(),
            ));
        }

        cart::Entity::delete_many()
            .filter(cart::Column::UserId.eq(id))
            .exec(&txn)
            .await?;
        user::Entity::delete_by_id(id).exec(&txn).await?;
        txn.commit().await?;

        info!(user_id = %id, "User deleted");
        Ok(())
    }

    /// Admin-only path; not gated by the bootstrap secret.
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn create_admin(&self, input: CreateAdminInput) -> Result<UserProfile, ServiceError> {
        input.validate()?;
        let email = normalize_email(&input.email);
        let password_hash = hash_password(&input.password)?;

        let txn = self.db.begin().await?;
        ensure_email_free(&txn, &email).await?;

        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            password_hash: Set(password_hash),
            avatar: Set(None),
            role: Set(UserRole::Admin),
            phone: Set(None),
            address: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;

        info!(user_id = %created.id, "Admin created");
        Ok(created.into())
    }

    pub async fn admin_count(&self) -> Result<u64, ServiceError> {
        count_admins(&*self.db).await
    }

    fn session_for(&self, model: user::Model) -> Result<AuthSession, ServiceError> {
        let issued = self
            .auth
            .issue_token(&model)
            .map_err(|e| ServiceError::InternalError(e.to_string()))?;
        Ok(AuthSession {
            token: issued.token,
            token_type: issued.token_type,
            expires_in: issued.expires_in,
            user: model.into(),
        })
    }
}

/// No-op write to every admin row, issued before the admin count is read.
/// Postgres then holds those row locks (and re-checks the role filter after
/// waiting) until the transaction ends; SQLite takes its database write lock.
/// Either way two last-admin checks cannot interleave.
async fn lock_admin_rows<C: ConnectionTrait>(conn: &C) -> Result<(), ServiceError> {
    user::Entity::update_many()
        .col_expr(
            user::Column::UpdatedAt,
            SimpleExpr::from(Expr::col(user::Column::UpdatedAt)),
        )
        .filter(user::Column::Role.eq(UserRole::Admin))
        .exec(conn)
        .await?;
    Ok(())
}

async fn find_user<C: ConnectionTrait>(conn: &C, id: Uuid) -> Result<user::Model, ServiceError> {
    user::Entity::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", id)))
}

async fn ensure_email_free<C: ConnectionTrait>(conn: &C, email: &str) -> Result<(), ServiceError> {
    let taken = user::Entity::find()
        .filter(user::Column::Email.eq(email))
        .one(conn)
        .await?
        .is_some();
    if taken {
        warn!(email, "Email already registered");
        return Err(ServiceError::Conflict(
            "Email is already registered".to_string(),
        ));
    }
    Ok(())
}

async fn count_admins<C: ConnectionTrait>(conn: &C) -> Result<u64, ServiceError> {
    Ok(user::Entity::find()
        .filter(user::Column::Role.eq(UserRole::Admin))
        .count(conn)
        .await?)
}
