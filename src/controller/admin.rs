use axum::{
    extract::{Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use std::str::FromStr;

use crate::database::model::{Model, NewModel};
use crate::database::provider::{NewProvider, Provider};
use crate::llm::ProviderType;
use crate::service::deletion::{self, SoftDeletedAccount};
use crate::utils::{HttpResult, ID_GENERATOR};

use super::BaseError;

#[derive(Deserialize)]
struct CreateProviderPayload {
    name: String,
    provider_type: String,
    endpoint: String,
    api_key: String,
    is_enabled: Option<bool>,
}

async fn create_provider(
    Json(payload): Json<CreateProviderPayload>,
) -> Result<HttpResult<Provider>, BaseError> {
    // Reject unknown vendor names at the door instead of at dispatch time.
    let provider_type = ProviderType::from_str(&payload.provider_type).map_err(|_| {
        BaseError::UnsupportedProvider(Some(format!(
            "Unsupported provider type: {}",
            payload.provider_type
        )))
    })?;
    let current_time = Utc::now().timestamp_millis();
    let provider = Provider::create(&NewProvider {
        id: ID_GENERATOR.generate_id(),
        name: payload.name,
        provider_type: provider_type.to_string(),
        endpoint: payload.endpoint,
        api_key: payload.api_key,
        is_enabled: payload.is_enabled.unwrap_or(true),
        created_at: current_time,
        updated_at: current_time,
    })?;
    Ok(HttpResult::new(provider))
}

async fn list_providers() -> Result<HttpResult<Vec<Provider>>, BaseError> {
    Ok(HttpResult::new(Provider::list_all()?))
}

async fn delete_provider(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Provider::soft_delete(id)?;
    Ok(HttpResult::new(()))
}

#[derive(Deserialize)]
struct CreateModelPayload {
    provider_id: i64,
    name: String,
    is_enabled: Option<bool>,
}

async fn create_model(
    Json(payload): Json<CreateModelPayload>,
) -> Result<HttpResult<Model>, BaseError> {
    // The parent must exist and be live before a model can hang off it.
    Provider::get_by_id(payload.provider_id)?;
    let current_time = Utc::now().timestamp_millis();
    let model = Model::create(&NewModel {
        id: ID_GENERATOR.generate_id(),
        provider_id: payload.provider_id,
        name: payload.name,
        is_enabled: payload.is_enabled.unwrap_or(true),
        created_at: current_time,
        updated_at: current_time,
    })?;
    Ok(HttpResult::new(model))
}

#[derive(Deserialize, Default)]
struct ListModelsQuery {
    provider_id: Option<i64>,
}

async fn list_models(
    Query(query): Query<ListModelsQuery>,
) -> Result<HttpResult<Vec<Model>>, BaseError> {
    let models = match query.provider_id {
        Some(provider_id) => Model::list_by_provider_id(provider_id)?,
        None => Model::list_all()?,
    };
    Ok(HttpResult::new(models))
}

async fn delete_model(Path(id): Path<i64>) -> Result<HttpResult<()>, BaseError> {
    Model::soft_delete(id)?;
    Ok(HttpResult::new(()))
}

async fn list_deleted_users() -> Result<HttpResult<Vec<SoftDeletedAccount>>, BaseError> {
    Ok(HttpResult::new(deletion::list_soft_deleted()?))
}

async fn hard_delete_expired() -> Result<HttpResult<Vec<String>>, BaseError> {
    Ok(HttpResult::new(deletion::purge_expired()?))
}

pub fn create_admin_router() -> Router {
    Router::new()
        .route("/admin/providers", post(create_provider).get(list_providers))
        .route("/admin/providers/{id}", axum::routing::delete(delete_provider))
        .route("/admin/models", post(create_model).get(list_models))
        .route("/admin/models/{id}", axum::routing::delete(delete_model))
        .route("/admin/deleted-users", get(list_deleted_users))
        .route("/admin/hard-delete-expired", post(hard_delete_expired))
}
