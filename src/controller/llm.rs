use axum::{routing::post, Extension, Json, Router};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::service::generation::{self, GenerationRequest, GenerationResult};
use crate::service::params::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::utils::auth::SessionUser;
use crate::utils::HttpResult;

use super::BaseError;

#[derive(Deserialize)]
struct GeneratePayload {
    provider: String,
    model: String,
    prompt: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    config_id: Option<i64>,
    overrides: Option<Map<String, Value>>,
}

async fn generate(
    Extension(session): Extension<SessionUser>,
    Json(payload): Json<GeneratePayload>,
) -> Result<HttpResult<GenerationResult>, BaseError> {
    if payload.prompt.trim().is_empty() {
        return Err(BaseError::ParamInvalid(Some(
            "prompt must not be empty".to_string(),
        )));
    }
    let result = generation::generate(GenerationRequest {
        user_id: session.user_id,
        provider: payload.provider,
        model: payload.model,
        prompt: payload.prompt,
        temperature: payload.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: payload.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        config_id: payload.config_id,
        overrides: payload.overrides,
    })
    .await?;
    Ok(HttpResult::new(result))
}

pub fn create_llm_router() -> Router {
    Router::new().route("/llm/generate", post(generate))
}
