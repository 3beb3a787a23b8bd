use axum::{routing::get, routing::post, Json, Router};
use serde::Deserialize;

use crate::service::oauth::{self, AuthMode, AuthOutcome};
use crate::utils::HttpResult;

use super::BaseError;

#[derive(Deserialize)]
struct OAuthPayload {
    provider: String,
    token: String,
}

async fn register(Json(payload): Json<OAuthPayload>) -> Result<HttpResult<AuthOutcome>, BaseError> {
    let outcome = oauth::authenticate(&payload.provider, &payload.token, AuthMode::Register).await?;
    Ok(HttpResult::new(outcome))
}

async fn login(Json(payload): Json<OAuthPayload>) -> Result<HttpResult<AuthOutcome>, BaseError> {
    let outcome = oauth::authenticate(&payload.provider, &payload.token, AuthMode::Login).await?;
    Ok(HttpResult::new(outcome))
}

// Legacy combined entry point. Prefer /register and /login.
async fn sign_in(Json(payload): Json<OAuthPayload>) -> Result<HttpResult<AuthOutcome>, BaseError> {
    let outcome = oauth::authenticate(&payload.provider, &payload.token, AuthMode::SignIn).await?;
    Ok(HttpResult::new(outcome))
}

async fn providers() -> HttpResult<Vec<&'static str>> {
    HttpResult::new(oauth::list_supported_providers())
}

pub fn create_auth_router() -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/signin", post(sign_in))
        .route("/auth/providers", get(providers))
}
