use axum::{http, middleware, response::IntoResponse, Router};
use tower_http::cors::CorsLayer;

use crate::utils::auth::session_auth_middleware;

use admin::create_admin_router;
use auth::create_auth_router;
use history::create_history_router;
use hyperparameter::create_hyperparameter_router;
use llm::create_llm_router;
use user::create_user_router;

mod admin;
mod auth;
mod error;
mod history;
mod hyperparameter;
mod llm;
mod user;

pub use error::BaseError;

pub fn create_router() -> Router {
    let protected = Router::new()
        .merge(create_user_router())
        .merge(create_hyperparameter_router())
        .merge(create_history_router())
        .merge(create_llm_router())
        .merge(create_admin_router())
        .layer(middleware::from_fn(session_auth_middleware));

    Router::new()
        .merge(create_auth_router())
        .merge(protected)
        .layer(CorsLayer::permissive())
        .fallback(handle_404)
}

pub async fn handle_404() -> impl IntoResponse {
    (http::StatusCode::NOT_FOUND, "not found")
}
