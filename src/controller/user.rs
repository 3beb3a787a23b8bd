use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;

use crate::database::user::{NewUser, UpdateUserData, User};
use crate::service::deletion::{
    self, DeletionPreview, DeletionReceipt, RestoreReceipt,
};
use crate::utils::HttpResult;

use super::BaseError;

#[derive(Deserialize)]
struct CreateUserPayload {
    username: String,
    email: String,
}

async fn create_user(
    Json(payload): Json<CreateUserPayload>,
) -> Result<HttpResult<User>, BaseError> {
    if payload.username.trim().is_empty() || payload.email.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some(
            "username and email must not be empty".to_string(),
        )));
    }
    let current_time = Utc::now().timestamp_millis();
    let user = User::create(&NewUser {
        id: uuid::Uuid::new_v4().to_string(),
        username: payload.username,
        email: payload.email,
        is_active: true,
        created_at: current_time,
        updated_at: current_time,
    })?;
    Ok(HttpResult::new(user))
}

#[derive(Deserialize, Default)]
struct ListUsersQuery {
    #[serde(default)]
    include_deleted: bool,
}

async fn list_users(
    Query(query): Query<ListUsersQuery>,
) -> Result<HttpResult<Vec<User>>, BaseError> {
    Ok(HttpResult::new(User::list_all(query.include_deleted)?))
}

async fn get_user(Path(id): Path<String>) -> Result<HttpResult<User>, BaseError> {
    let user = User::get_active_by_id(&id)?
        .ok_or_else(|| BaseError::NotFound(Some(format!("User {} not found", id))))?;
    Ok(HttpResult::new(user))
}

async fn update_user(
    Path(id): Path<String>,
    Json(payload): Json<UpdateUserData>,
) -> Result<HttpResult<User>, BaseError> {
    Ok(HttpResult::new(User::update_profile(&id, &payload)?))
}

async fn deletion_preview(
    Path(id): Path<String>,
) -> Result<HttpResult<DeletionPreview>, BaseError> {
    Ok(HttpResult::new(deletion::deletion_preview(&id)?))
}

async fn soft_delete_user(
    Path(id): Path<String>,
) -> Result<HttpResult<DeletionReceipt>, BaseError> {
    Ok(HttpResult::new(deletion::soft_delete_user(&id)?))
}

async fn restore_user(Path(id): Path<String>) -> Result<HttpResult<RestoreReceipt>, BaseError> {
    Ok(HttpResult::new(deletion::restore_user(&id)?))
}

pub fn create_user_router() -> Router {
    Router::new()
        .route("/users", post(create_user).get(list_users))
        .route(
            "/users/{id}",
            get(get_user).put(update_user).delete(soft_delete_user),
        )
        .route("/users/{id}/deletion-preview", get(deletion_preview))
        .route("/users/{id}/restore", post(restore_user))
}
