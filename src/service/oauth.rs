use async_trait::async_trait;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::CONFIG;
use crate::controller::BaseError;
use crate::database::user::{NewUser, User};
use crate::utils::auth::issue_session_token;
use crate::utils::ID_GENERATOR;

const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const MICROSOFT_GRAPH_ME_URL: &str = "https://graph.microsoft.com/v1.0/me";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

pub const SUPPORTED_PROVIDERS: [&str; 3] = ["google", "microsoft", "github"];

/// Normalized identity payload every verifier produces, regardless of what
/// the upstream response looks like.
#[derive(Debug, Clone)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: String,
    pub subject: String,
}

#[async_trait]
pub trait OAuthVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, BaseError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Register,
    Login,
    /// Legacy unified mode that picks register-vs-login by email existence.
    /// Callers should move to the explicit modes.
    SignIn,
}

#[derive(Serialize, Debug)]
pub struct AuthOutcome {
    pub token: String,
    pub user_id: String,
    pub email: String,
    pub is_new_user: bool,
}

pub fn list_supported_providers() -> Vec<&'static str> {
    SUPPORTED_PROVIDERS.to_vec()
}

pub fn verifier_for(provider_name: &str) -> Result<Box<dyn OAuthVerifier>, BaseError> {
    match provider_name.to_lowercase().as_str() {
        "google" => {
            let client_id = CONFIG.oauth.google_client_id.clone().ok_or_else(|| {
                BaseError::Configuration(Some("google_client_id is not configured".to_string()))
            })?;
            Ok(Box::new(GoogleVerifier { client_id }))
        }
        "microsoft" => Ok(Box::new(MicrosoftVerifier)),
        "github" => Ok(Box::new(GithubVerifier)),
        other => Err(BaseError::UnsupportedProvider(Some(format!(
            "Unsupported identity provider: {}. Supported: {:?}",
            other, SUPPORTED_PROVIDERS
        )))),
    }
}

/// Exchanges a verified third-party identity for a local session token,
/// creating the account when the mode allows it.
pub async fn authenticate(
    provider_name: &str,
    token: &str,
    mode: AuthMode,
) -> Result<AuthOutcome, BaseError> {
    let verifier = verifier_for(provider_name)?;
    authenticate_with_verifier(verifier.as_ref(), token, mode).await
}

async fn authenticate_with_verifier(
    verifier: &dyn OAuthVerifier,
    token: &str,
    mode: AuthMode,
) -> Result<AuthOutcome, BaseError> {
    let identity = verifier.verify(token).await?;
    let existing = User::get_active_by_email(&identity.email)?;

    let (user, is_new_user) = match (mode, existing) {
        (AuthMode::Register, Some(_)) => {
            return Err(BaseError::Conflict(Some(format!(
                "User with email {} already exists",
                identity.email
            ))));
        }
        (AuthMode::Register, None) => (create_from_identity(&identity)?, true),
        (AuthMode::Login, Some(user)) => (user, false),
        (AuthMode::Login, None) => {
            return Err(BaseError::NotFound(Some(format!(
                "No user registered with email {}",
                identity.email
            ))));
        }
        (AuthMode::SignIn, Some(user)) => {
            info!("existing user signed in: {}", user.email);
            (user, false)
        }
        (AuthMode::SignIn, None) => (create_from_identity(&identity)?, true),
    };

    let token = issue_session_token(&user.id, &user.email)?;
    info!("session token issued for user {}", user.id);
    Ok(AuthOutcome {
        token,
        user_id: user.id,
        email: user.email,
        is_new_user,
    })
}

fn create_from_identity(identity: &VerifiedIdentity) -> Result<User, BaseError> {
    let base_name = if identity.name.trim().is_empty() {
        identity
            .email
            .split('@')
            .next()
            .unwrap_or(&identity.email)
            .to_string()
    } else {
        identity.name.trim().to_string()
    };

    let now = Utc::now().timestamp_millis();
    let new_user = NewUser {
        id: uuid::Uuid::new_v4().to_string(),
        username: base_name.clone(),
        email: identity.email.clone(),
        is_active: true,
        created_at: now,
        updated_at: now,
    };
    match User::create(&new_user) {
        Ok(user) => {
            info!("created user {} from oauth identity", user.id);
            Ok(user)
        }
        // The email was free, so a conflict here means the username is
        // taken. Retry once with a disambiguated name.
        Err(BaseError::Conflict(_)) => {
            let suffixed = NewUser {
                id: uuid::Uuid::new_v4().to_string(),
                username: format!("{}-{}", base_name, ID_GENERATOR.generate_id() % 10000),
                ..new_user
            };
            User::create(&suffixed)
        }
        Err(e) => Err(e),
    }
}

fn http_client() -> Result<reqwest::Client, BaseError> {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .user_agent("modelgate")
        .build()
        .map_err(|e| BaseError::Configuration(Some(format!("Failed to build http client: {}", e))))
}

fn invalid_token(provider: &str, reason: impl std::fmt::Display) -> BaseError {
    warn!("{} token verification failed: {}", provider, reason);
    BaseError::InvalidToken(Some(format!("Invalid {} token: {}", provider, reason)))
}

struct GoogleVerifier {
    client_id: String,
}

#[async_trait]
impl OAuthVerifier for GoogleVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, BaseError> {
        let response = http_client()?
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("id_token", token)])
            .send()
            .await
            .map_err(|e| invalid_token("google", e))?;
        if !response.status().is_success() {
            return Err(invalid_token("google", response.status()));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| invalid_token("google", e))?;

        let audience = payload.get("aud").and_then(Value::as_str).unwrap_or("");
        if audience != self.client_id {
            return Err(invalid_token("google", "token audience mismatch"));
        }

        let email = payload
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_token("google", "token did not provide email"))?;
        let subject = payload
            .get("sub")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_token("google", "token did not provide subject"))?;
        info!("google id token verified");
        Ok(VerifiedIdentity {
            email: email.to_string(),
            name: payload
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            subject: subject.to_string(),
        })
    }
}

struct MicrosoftVerifier;

#[async_trait]
impl OAuthVerifier for MicrosoftVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, BaseError> {
        let response = http_client()?
            .get(MICROSOFT_GRAPH_ME_URL)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| invalid_token("microsoft", e))?;
        if !response.status().is_success() {
            return Err(invalid_token("microsoft", response.status()));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| invalid_token("microsoft", e))?;

        let email = payload
            .get("userPrincipalName")
            .and_then(Value::as_str)
            .or_else(|| payload.get("mail").and_then(Value::as_str))
            .ok_or_else(|| invalid_token("microsoft", "profile did not provide email"))?;
        let subject = payload
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| invalid_token("microsoft", "profile did not provide id"))?;
        info!("microsoft token verified via graph api");
        Ok(VerifiedIdentity {
            email: email.to_string(),
            name: payload
                .get("displayName")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            subject: subject.to_string(),
        })
    }
}

struct GithubVerifier;

#[async_trait]
impl OAuthVerifier for GithubVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedIdentity, BaseError> {
        let client = http_client()?;
        let response = client
            .get(GITHUB_USER_URL)
            .bearer_auth(token)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| invalid_token("github", e))?;
        if !response.status().is_success() {
            return Err(invalid_token("github", response.status()));
        }
        let payload: Value = response
            .json()
            .await
            .map_err(|e| invalid_token("github", e))?;

        // The /user endpoint omits the email for users who keep it private.
        let mut email = payload
            .get("email")
            .and_then(Value::as_str)
            .map(str::to_string);
        if email.is_none() {
            email = fetch_github_primary_email(&client, token).await?;
        }
        let email =
            email.ok_or_else(|| invalid_token("github", "account has no accessible email"))?;

        let subject = payload
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| invalid_token("github", "profile did not provide id"))?;
        let name = payload
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| payload.get("login").and_then(Value::as_str))
            .unwrap_or("")
            .to_string();
        info!("github token verified");
        Ok(VerifiedIdentity {
            email,
            name,
            subject: subject.to_string(),
        })
    }
}

async fn fetch_github_primary_email(
    client: &reqwest::Client,
    token: &str,
) -> Result<Option<String>, BaseError> {
    let response = client
        .get(GITHUB_EMAILS_URL)
        .bearer_auth(token)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| invalid_token("github", e))?;
    if !response.status().is_success() {
        return Ok(None);
    }
    let emails: Vec<Value> = response
        .json()
        .await
        .map_err(|e| invalid_token("github", e))?;
    Ok(emails
        .iter()
        .find(|entry| entry.get("primary").and_then(Value::as_bool) == Some(true))
        .and_then(|entry| entry.get("email").and_then(Value::as_str))
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::lock_test_db;
    use crate::utils::auth::verify_session_token;

    struct StubVerifier {
        email: String,
        name: String,
    }

    #[async_trait]
    impl OAuthVerifier for StubVerifier {
        async fn verify(&self, token: &str) -> Result<VerifiedIdentity, BaseError> {
            if token == "bad" {
                return Err(BaseError::InvalidToken(Some("stub rejection".to_string())));
            }
            Ok(VerifiedIdentity {
                email: self.email.clone(),
                name: self.name.clone(),
                subject: "stub-subject".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn register_then_conflict_then_login() {
        let _guard = lock_test_db();
        let verifier = StubVerifier {
            email: "oauth-flow@example.com".to_string(),
            name: "Flow Tester".to_string(),
        };

        let registered = authenticate_with_verifier(&verifier, "good", AuthMode::Register)
            .await
            .unwrap();
        assert!(registered.is_new_user);
        assert_eq!(registered.email, "oauth-flow@example.com");
        let session = verify_session_token(&registered.token).unwrap();
        assert_eq!(session.user_id, registered.user_id);

        let err = authenticate_with_verifier(&verifier, "good", AuthMode::Register)
            .await
            .unwrap_err();
        assert!(matches!(err, BaseError::Conflict(_)));

        let logged_in = authenticate_with_verifier(&verifier, "good", AuthMode::Login)
            .await
            .unwrap();
        assert!(!logged_in.is_new_user);
        assert_eq!(logged_in.user_id, registered.user_id);
    }

    #[tokio::test]
    async fn login_without_account_is_not_found() {
        let _guard = lock_test_db();
        let verifier = StubVerifier {
            email: "oauth-nobody@example.com".to_string(),
            name: String::new(),
        };
        let err = authenticate_with_verifier(&verifier, "good", AuthMode::Login)
            .await
            .unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn signin_auto_detects_both_directions() {
        let _guard = lock_test_db();
        let verifier = StubVerifier {
            email: "oauth-signin@example.com".to_string(),
            name: "Sign In".to_string(),
        };
        let first = authenticate_with_verifier(&verifier, "good", AuthMode::SignIn)
            .await
            .unwrap();
        assert!(first.is_new_user);
        let second = authenticate_with_verifier(&verifier, "good", AuthMode::SignIn)
            .await
            .unwrap();
        assert!(!second.is_new_user);
        assert_eq!(second.user_id, first.user_id);
    }

    #[tokio::test]
    async fn bad_upstream_token_never_touches_accounts() {
        let _guard = lock_test_db();
        let verifier = StubVerifier {
            email: "oauth-bad@example.com".to_string(),
            name: String::new(),
        };
        let err = authenticate_with_verifier(&verifier, "bad", AuthMode::Register)
            .await
            .unwrap_err();
        assert!(matches!(err, BaseError::InvalidToken(_)));
        assert!(User::get_active_by_email("oauth-bad@example.com")
            .unwrap()
            .is_none());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = verifier_for("facebook").map(|_| ()).unwrap_err();
        assert!(matches!(err, BaseError::UnsupportedProvider(_)));
    }

    #[test]
    fn supported_provider_list_is_stable() {
        assert_eq!(list_supported_providers(), vec!["google", "microsoft", "github"]);
    }
}
