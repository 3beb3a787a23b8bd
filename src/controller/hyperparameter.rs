use axum::{
    extract::Path,
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::database::hyperparameter::{
    HyperparameterConfig, NewHyperparameterConfig, UpdateHyperparameterConfigData,
};
use crate::utils::auth::SessionUser;
use crate::utils::{HttpResult, ID_GENERATOR};

use super::BaseError;

#[derive(Deserialize)]
struct CreateConfigPayload {
    model_id: i64,
    parameters: Map<String, Value>,
    description: Option<String>,
    #[serde(default)]
    is_default: bool,
}

async fn create_config(
    Extension(session): Extension<SessionUser>,
    Json(payload): Json<CreateConfigPayload>,
) -> Result<HttpResult<HyperparameterConfig>, BaseError> {
    let parameters = serde_json::to_string(&Value::Object(payload.parameters))
        .map_err(|e| BaseError::ParamInvalid(Some(format!("invalid parameters: {}", e))))?;
    let current_time = Utc::now().timestamp_millis();
    let config = HyperparameterConfig::create(&NewHyperparameterConfig {
        id: ID_GENERATOR.generate_id(),
        user_id: session.user_id,
        model_id: payload.model_id,
        parameters,
        description: payload.description,
        is_default: payload.is_default,
        created_at: current_time,
        updated_at: current_time,
    })?;
    Ok(HttpResult::new(config))
}

async fn list_configs(
    Extension(session): Extension<SessionUser>,
) -> Result<HttpResult<Vec<HyperparameterConfig>>, BaseError> {
    Ok(HttpResult::new(HyperparameterConfig::list_for_user(
        &session.user_id,
    )?))
}

async fn get_config(
    Extension(session): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<HttpResult<HyperparameterConfig>, BaseError> {
    Ok(HttpResult::new(HyperparameterConfig::get_for_user(
        id,
        &session.user_id,
    )?))
}

#[derive(Deserialize)]
struct UpdateConfigPayload {
    parameters: Option<Map<String, Value>>,
    description: Option<String>,
    is_default: Option<bool>,
}

async fn update_config(
    Extension(session): Extension<SessionUser>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateConfigPayload>,
) -> Result<HttpResult<HyperparameterConfig>, BaseError> {
    let parameters = match payload.parameters {
        Some(map) => Some(
            serde_json::to_string(&Value::Object(map))
                .map_err(|e| BaseError::ParamInvalid(Some(format!("invalid parameters: {}", e))))?,
        ),
        None => None,
    };
    let update_data = UpdateHyperparameterConfigData {
        parameters,
        description: payload.description,
        is_default: payload.is_default,
    };
    Ok(HttpResult::new(HyperparameterConfig::update(
        id,
        &session.user_id,
        &update_data,
    )?))
}

async fn delete_config(
    Extension(session): Extension<SessionUser>,
    Path(id): Path<i64>,
) -> Result<HttpResult<()>, BaseError> {
    HyperparameterConfig::soft_delete(id, &session.user_id)?;
    Ok(HttpResult::new(()))
}

pub fn create_hyperparameter_router() -> Router {
    Router::new()
        .route("/hyperparameters", post(create_config).get(list_configs))
        .route(
            "/hyperparameters/{id}",
            get(get_config).put(update_config).delete(delete_config),
        )
}
