use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::llm::ProviderError;

#[derive(Debug)]
pub enum BaseError {
    ParamInvalid(Option<String>),
    DatabaseFatal(Option<String>),
    NotFound(Option<String>),
    Conflict(Option<String>),
    UnsupportedProvider(Option<String>),
    /// Upstream vendor failure. When the failed call was still recorded in
    /// the ledger, the history id is carried so callers can audit it.
    Provider {
        message: String,
        history_id: Option<i64>,
    },
    InvalidToken(Option<String>),
    ExpiredToken(Option<String>),
    NotDeleted(Option<String>),
    RecoveryWindowExpired(Option<String>),
    Configuration(Option<String>),
}

impl From<diesel::result::Error> for BaseError {
    fn from(err: diesel::result::Error) -> Self {
        BaseError::DatabaseFatal(Some(err.to_string()))
    }
}

impl From<ProviderError> for BaseError {
    fn from(err: ProviderError) -> Self {
        BaseError::Provider {
            message: err.to_string(),
            history_id: None,
        }
    }
}

impl IntoResponse for BaseError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, history_id) = match self {
            BaseError::ParamInvalid(msg) => (
                StatusCode::BAD_REQUEST,
                1001,
                msg.unwrap_or("request params invalid".to_string()),
                None,
            ),
            BaseError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                1002,
                msg.unwrap_or("data not found".to_string()),
                None,
            ),
            BaseError::Conflict(msg) => (
                StatusCode::CONFLICT,
                1003,
                msg.unwrap_or("resource already exists".to_string()),
                None,
            ),
            BaseError::InvalidToken(msg) => (
                StatusCode::UNAUTHORIZED,
                1004,
                msg.unwrap_or("invalid token".to_string()),
                None,
            ),
            BaseError::ExpiredToken(msg) => (
                StatusCode::UNAUTHORIZED,
                1005,
                msg.unwrap_or("token expired".to_string()),
                None,
            ),
            BaseError::UnsupportedProvider(msg) => (
                StatusCode::BAD_REQUEST,
                1006,
                msg.unwrap_or("unsupported provider".to_string()),
                None,
            ),
            BaseError::NotDeleted(msg) => (
                StatusCode::BAD_REQUEST,
                1007,
                msg.unwrap_or("record is not soft-deleted".to_string()),
                None,
            ),
            BaseError::RecoveryWindowExpired(msg) => (
                StatusCode::GONE,
                1008,
                msg.unwrap_or("recovery window has expired".to_string()),
                None,
            ),
            BaseError::Provider { message, history_id } => {
                (StatusCode::BAD_GATEWAY, 1300, message, history_id)
            }
            BaseError::Configuration(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1400,
                msg.unwrap_or("required configuration is missing".to_string()),
                None,
            ),
            BaseError::DatabaseFatal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                1100,
                msg.unwrap_or("database unknown error".to_string()),
                None,
            ),
        };
        let body = match history_id {
            Some(id) => Json(json!({
                "code": error_code,
                "msg": error_message,
                "history_id": id,
            })),
            None => Json(json!({
                "code": error_code,
                "msg": error_message,
            })),
        };
        (status, body).into_response()
    }
}
