use chrono::Utc;
use log::{error, info};
use serde_json::{Map, Value};
use serde::Serialize;

use crate::controller::BaseError;
use crate::database::history::{CallHistory, NewCallHistory};
use crate::database::model::Model;
use crate::database::provider::Provider;
use crate::database::user::User;
use crate::llm::{self, LlmClient};
use crate::schema::enum_def::CallStatus;
use crate::service::params::{self, resolve_parameters};
use crate::utils::ID_GENERATOR;

#[derive(Debug)]
pub struct GenerationRequest {
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub config_id: Option<i64>,
    pub overrides: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct GenerationResult {
    pub provider: String,
    pub model: String,
    pub response: String,
    pub history_id: i64,
}

/// The request-dispatch pipeline. Lookups fail fast with no side effect;
/// once the provider is actually invoked, exactly one history row is
/// written whether the call succeeded or not.
pub async fn generate(request: GenerationRequest) -> Result<GenerationResult, BaseError> {
    info!(
        "generate: user={} provider={} model={}",
        request.user_id, request.provider, request.model
    );

    User::get_active_by_id(&request.user_id)?
        .ok_or_else(|| BaseError::NotFound(Some("User not found or has been deleted".to_string())))?;

    let provider = Provider::get_active_by_name(&request.provider)?
        .ok_or_else(|| BaseError::NotFound(Some("Provider not found".to_string())))?;

    let model = Model::get_active_by_name(&request.model, provider.id)?
        .ok_or_else(|| BaseError::NotFound(Some("Model not found for provider".to_string())))?;

    let parameters = resolve_parameters(
        &request.user_id,
        model.id,
        request.temperature,
        request.max_tokens,
        request.config_id,
        request.overrides.as_ref(),
    )?;

    let client = llm::client_for(&provider)?;
    dispatch_and_record(&request, &provider, &model, parameters, client.as_ref()).await
}

/// Invokes the provider and records the outcome. The history insert happens
/// on both arms before the result is surfaced; a provider failure carries
/// the recorded history id back to the caller.
async fn dispatch_and_record(
    request: &GenerationRequest,
    provider: &Provider,
    model: &Model,
    parameters: Map<String, Value>,
    client: &dyn LlmClient,
) -> Result<GenerationResult, BaseError> {
    let temperature = params::read_temperature(&parameters);
    let max_tokens = params::read_max_tokens(&parameters);
    let parameters_json =
        serde_json::to_string(&Value::Object(parameters)).unwrap_or_else(|_| "{}".to_string());

    let outcome = client
        .generate(&model.name, &request.prompt, temperature, max_tokens)
        .await;

    let mut record = NewCallHistory {
        id: ID_GENERATOR.generate_id(),
        user_id: request.user_id.clone(),
        provider_id: provider.id,
        model_id: model.id,
        prompt: request.prompt.clone(),
        response: String::new(),
        parameters: parameters_json,
        status: CallStatus::Success,
        error_message: None,
        tokens_input: None,
        tokens_output: None,
        total_tokens: None,
        cost: None,
        created_at: Utc::now().timestamp_millis(),
    };

    match outcome {
        Ok(output) => {
            record.response = output.text.clone();
            record.tokens_input = output.tokens_input;
            record.tokens_output = output.tokens_output;
            record.total_tokens = output.total_tokens;
            let history = CallHistory::insert(&record)?;
            Ok(GenerationResult {
                provider: provider.name.clone(),
                model: model.name.clone(),
                response: output.text,
                history_id: history.id,
            })
        }
        Err(provider_error) => {
            error!(
                "provider call failed for user {}: {}",
                request.user_id, provider_error
            );
            record.status = CallStatus::Error;
            record.error_message = Some(provider_error.to_string());
            let history = CallHistory::insert(&record)?;
            Err(BaseError::Provider {
                message: provider_error.to_string(),
                history_id: Some(history.id),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_support::{
        lock_test_db, seed_provider, seed_provider_and_model, seed_user,
    };
    use crate::llm::{GenerationOutput, ProviderError};
    use async_trait::async_trait;
    use uuid::Uuid;

    struct StubClient {
        fail: bool,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
            _temperature: f64,
            _max_tokens: u32,
        ) -> Result<GenerationOutput, ProviderError> {
            if self.fail {
                Err(ProviderError::new("upstream exploded"))
            } else {
                Ok(GenerationOutput {
                    text: "hello".to_string(),
                    tokens_input: Some(3),
                    tokens_output: Some(5),
                    total_tokens: Some(8),
                })
            }
        }
    }

    fn request_for(user: &User, provider: &Provider, model: &Model) -> GenerationRequest {
        GenerationRequest {
            user_id: user.id.clone(),
            provider: provider.name.clone(),
            model: model.name.clone(),
            prompt: "say hi".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            config_id: None,
            overrides: None,
        }
    }

    #[tokio::test]
    async fn success_writes_exactly_one_history_row() {
        let _guard = lock_test_db();
        let user = seed_user("ok");
        let (provider, model) = seed_provider_and_model("ok");
        let request = request_for(&user, &provider, &model);

        let result = dispatch_and_record(
            &request,
            &provider,
            &model,
            Map::new(),
            &StubClient { fail: false },
        )
        .await
        .unwrap();

        assert_eq!(result.response, "hello");
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 1);
        let record = CallHistory::get_by_id(result.history_id).unwrap();
        assert_eq!(record.status, CallStatus::Success);
        assert_eq!(record.total_tokens, Some(8));
    }

    #[tokio::test]
    async fn failure_still_writes_history_and_exposes_its_id() {
        let _guard = lock_test_db();
        let user = seed_user("fail");
        let (provider, model) = seed_provider_and_model("fail");
        let request = request_for(&user, &provider, &model);

        let err = dispatch_and_record(
            &request,
            &provider,
            &model,
            Map::new(),
            &StubClient { fail: true },
        )
        .await
        .unwrap_err();

        let history_id = match err {
            BaseError::Provider { history_id, .. } => history_id.unwrap(),
            other => panic!("expected provider error, got {:?}", other),
        };
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 1);
        let record = CallHistory::get_by_id(history_id).unwrap();
        assert_eq!(record.status, CallStatus::Error);
        assert_eq!(record.response, "");
        assert_eq!(record.error_message.as_deref(), Some("upstream exploded"));
    }

    #[tokio::test]
    async fn unknown_provider_name_fails_without_history() {
        let _guard = lock_test_db();
        let user = seed_user("noprov");
        let request = GenerationRequest {
            user_id: user.id.clone(),
            provider: "no-such-provider".to_string(),
            model: "m".to_string(),
            prompt: "p".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            config_id: None,
            overrides: None,
        };

        let err = generate(request).await.unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn disabled_model_is_rejected_without_history() {
        let _guard = lock_test_db();
        let user = seed_user("dismodel");
        let provider = seed_provider("dismodel");
        let now = Utc::now().timestamp_millis();
        let model = Model::create(&crate::database::model::NewModel {
            id: ID_GENERATOR.generate_id(),
            provider_id: provider.id,
            name: "dark-model".to_string(),
            is_enabled: false,
            created_at: now,
            updated_at: now,
        })
        .unwrap();

        let request = request_for(&user, &provider, &model);
        let err = generate(request).await.unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
        assert_eq!(CallHistory::count_active_for_user(&user.id).unwrap(), 0);
    }

    #[tokio::test]
    async fn deleted_user_is_rejected_before_dispatch() {
        let _guard = lock_test_db();
        let (provider, model) = seed_provider_and_model("deluser");
        let request = GenerationRequest {
            user_id: Uuid::new_v4().to_string(),
            provider: provider.name.clone(),
            model: model.name.clone(),
            prompt: "p".to_string(),
            temperature: 0.7,
            max_tokens: 300,
            config_id: None,
            overrides: None,
        };
        let err = generate(request).await.unwrap_err();
        assert!(matches!(err, BaseError::NotFound(_)));
    }
}
