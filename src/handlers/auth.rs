use crate::{
    auth::{AuthRouterExt, AuthUser},
    entities::UserRole,
    errors::ApiError,
    handlers::{
        common::{created_response, map_service_error, message_response, success_response},
        upload::{next_field, read_image, MULTIPART_SLACK_BYTES},
        AppState,
    },
    services::{
        identity::{AuthSession, CreateAdminInput, LoginInput, RegisterInput, UpdateUserInput},
        uploads::PendingImage,
    },
};
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Account endpoints: open registration/login, the caller's profile, and
/// admin user management.
pub fn auth_routes(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route(
            "/register",
            post(register).layer(DefaultBodyLimit::max(max_upload_bytes + MULTIPART_SLACK_BYTES)),
        )
        .route("/login", post(login));

    let authenticated = Router::new()
        .route("/profile", get(profile))
        .with_auth();

    let admin = Router::new()
        .route("/users", get(list_users))
        .route("/users/:id", put(update_user).delete(delete_user))
        .route("/admin/create", post(create_admin))
        .with_role(UserRole::Admin);

    public.merge(authenticated).merge(admin)
}

/// Accepts a JSON body, or `multipart/form-data` whose optional `avatar` file
/// is stored as the profile picture.
async fn register(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("multipart/form-data"));

    let session = if is_form {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        register_form(&state, multipart).await?
    } else {
        let Json(payload) = Json::<RegisterInput>::from_request(request, &state)
            .await
            .map_err(|e| ApiError::BadRequest(e.body_text()))?;
        state
            .services
            .identity
            .register(payload)
            .await
            .map_err(map_service_error)?
    };

    Ok(created_response(session))
}

async fn register_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<AuthSession, ApiError> {
    let mut fields = Map::new();
    let mut avatar: Option<PendingImage> = None;
    while let Some(field) = next_field(&mut multipart).await? {
        let Some(name) = field.name().map(str::to_owned) else {
            continue;
        };
        if name == "avatar" && field.file_name().is_some() {
            // Browsers send an empty part when no file was picked.
            let image = read_image(field).await?;
            if !image.data.is_empty() {
                avatar = Some(image);
            }
            continue;
        }
        let value = field
            .text()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Invalid form field {}: {}", name, e)))?;
        fields.insert(name, Value::String(value));
    }

    let mut input: RegisterInput = serde_json::from_value(Value::Object(fields))
        .map_err(|e| ApiError::BadRequest(format!("Invalid registration form: {}", e)))?;

    let uploads = &state.services.uploads;
    let stored = match &avatar {
        Some(image) => {
            let file = uploads.store_pending(image).await.map_err(map_service_error)?;
            input.avatar = Some(file.url.clone());
            Some(file)
        }
        None => None,
    };

    match state.services.identity.register(input).await {
        Ok(session) => Ok(session),
        Err(err) => {
            if let Some(file) = stored {
                uploads.remove(&file.filename).await;
            }
            Err(map_service_error(err))
        }
    }
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginInput>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .services
        .identity
        .login(payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(session))
}

async fn profile(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    let profile = state
        .services
        .identity
        .get_profile(user.user_id)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(profile))
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let users = state
        .services
        .identity
        .list_users()
        .await
        .map_err(map_service_error)?;

    Ok(success_response(users))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserInput>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state
        .services
        .identity
        .update_user(id, payload)
        .await
        .map_err(map_service_error)?;

    Ok(success_response(user))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .services
        .identity
        .delete_user(id)
        .await
        .map_err(map_service_error)?;

    Ok(message_response("User deleted"))
}

async fn create_admin(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateAdminInput>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = state
        .services
        .identity
        .create_admin(payload)
        .await
        .map_err(map_service_error)?;

    Ok(created_response(admin))
}
