use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::Request;
use axum::http;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::config::CONFIG;
use crate::controller::BaseError;

struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    fn new(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

static KEYS: Lazy<Keys> = Lazy::new(|| Keys::new(CONFIG.jwt_secret.as_bytes()));

const ISSUER: &str = "modelgate";
const SESSION_TOKEN_ISSUE_SEC: u64 = 24 * 3600;

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: String,
    pub email: String,
    pub iss: String,
    pub iat: u64,
    pub exp: u64,
}

/// Authenticated caller, attached to the request by the session middleware.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user_id: String,
    pub email: String,
}

fn get_current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("Time went backwards")
        .as_secs()
}

pub fn issue_session_token(user_id: &str, email: &str) -> Result<String, BaseError> {
    if CONFIG.jwt_secret.is_empty() {
        return Err(BaseError::Configuration(Some(
            "jwt_secret is not configured".to_string(),
        )));
    }
    let now = get_current_timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        email: email.to_string(),
        iss: ISSUER.to_string(),
        iat: now,
        exp: now + SESSION_TOKEN_ISSUE_SEC,
    };
    encode(&Header::default(), &claims, &KEYS.encoding)
        .map_err(|e| BaseError::Configuration(Some(format!("failed to sign token: {}", e))))
}

pub fn verify_session_token(token: &str) -> Result<SessionUser, BaseError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    let data = decode::<SessionClaims>(token, &KEYS.decoding, &validation).map_err(|e| {
        match e.kind() {
            ErrorKind::ExpiredSignature => BaseError::ExpiredToken(None),
            _ => BaseError::InvalidToken(None),
        }
    })?;
    Ok(SessionUser {
        user_id: data.claims.sub,
        email: data.claims.email,
    })
}

fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

/// Guards protected routes: requires a valid session token and attaches the
/// resolved `SessionUser` as a request extension.
pub async fn session_auth_middleware(mut req: Request, next: Next) -> Response {
    let token = match extract_bearer_token(&req) {
        Some(token) => token,
        None => return BaseError::InvalidToken(Some("missing bearer token".to_string())).into_response(),
    };
    match verify_session_token(token) {
        Ok(session_user) => {
            req.extensions_mut().insert(session_user);
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips() {
        let token = issue_session_token("user-1", "a@x.com").unwrap();
        let session = verify_session_token(&token).unwrap();
        assert_eq!(session.user_id, "user-1");
        assert_eq!(session.email, "a@x.com");
    }

    #[test]
    fn garbage_token_is_invalid() {
        let err = verify_session_token("not-a-jwt").unwrap_err();
        assert!(matches!(err, BaseError::InvalidToken(_)));
    }
}
