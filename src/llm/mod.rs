use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use strum_macros::{Display, EnumString};
use thiserror::Error;

use crate::controller::BaseError;
use crate::database::provider::Provider;

mod azure;
mod gemini;
mod grok;

use azure::AzureClient;
use gemini::GeminiClient;
use grok::GrokClient;

/// Single attempt, generous fixed bound. A timeout is surfaced as an
/// ordinary `ProviderError` like any other upstream failure.
pub const PROVIDER_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform error for every upstream vendor failure: auth, transport,
/// timeout, malformed or empty response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        ProviderError {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::new(format!("provider call timed out: {}", err))
        } else {
            ProviderError::new(format!("provider transport error: {}", err))
        }
    }
}

#[derive(Clone, Debug, PartialEq, EnumString, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Azure,
    Gemini,
    Grok,
}

#[derive(Debug, Default)]
pub struct GenerationOutput {
    pub text: String,
    pub tokens_input: Option<i32>,
    pub tokens_output: Option<i32>,
    pub total_tokens: Option<i32>,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError>;
}

/// Resolves the provider row to a concrete client. An unrecognized
/// `provider_type` string fails with `UnsupportedProvider`; a recognized
/// type with incomplete credentials fails with `Configuration`.
pub fn client_for(provider: &Provider) -> Result<Box<dyn LlmClient>, BaseError> {
    let provider_type = ProviderType::from_str(&provider.provider_type).map_err(|_| {
        BaseError::UnsupportedProvider(Some(format!(
            "Unsupported provider type: {}",
            provider.provider_type
        )))
    })?;
    if provider.endpoint.is_empty() || provider.api_key.is_empty() {
        return Err(BaseError::Configuration(Some(format!(
            "Provider '{}' is missing endpoint or api key",
            provider.name
        ))));
    }
    match provider_type {
        ProviderType::Azure => Ok(Box::new(AzureClient::new(
            provider.endpoint.clone(),
            provider.api_key.clone(),
        ))),
        ProviderType::Gemini => Ok(Box::new(GeminiClient::new(
            provider.endpoint.clone(),
            provider.api_key.clone(),
        ))),
        ProviderType::Grok => Ok(Box::new(GrokClient::new(
            provider.endpoint.clone(),
            provider.api_key.clone(),
        ))),
    }
}

pub(crate) fn build_http_client() -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_CALL_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::new(format!("failed to build HTTP client: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn provider_row(provider_type: &str) -> Provider {
        let now = Utc::now().timestamp_millis();
        Provider {
            id: 1,
            name: "upstream".to_string(),
            provider_type: provider_type.to_string(),
            endpoint: "https://example.com/v1".to_string(),
            api_key: "key".to_string(),
            is_enabled: true,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn known_types_resolve() {
        for t in ["azure", "gemini", "grok"] {
            assert!(client_for(&provider_row(t)).is_ok(), "type {} should resolve", t);
        }
    }

    #[test]
    fn unknown_type_is_unsupported() {
        let err = client_for(&provider_row("watsonx")).map(|_| ()).unwrap_err();
        assert!(matches!(err, BaseError::UnsupportedProvider(_)));
    }

    #[test]
    fn missing_credentials_are_a_configuration_error() {
        let mut provider = provider_row("azure");
        provider.api_key.clear();
        let err = client_for(&provider).map(|_| ()).unwrap_err();
        assert!(matches!(err, BaseError::Configuration(_)));
    }
}
