use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use super::{build_http_client, GenerationOutput, LlmClient, ProviderError};

/// Azure OpenAI chat-completions client. The configured endpoint must be the
/// full deployment URL including the api-version query string.
pub struct AzureClient {
    endpoint: String,
    api_key: String,
}

impl AzureClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        AzureClient { endpoint, api_key }
    }
}

fn extract_usage(output: &mut GenerationOutput, body: &Value) {
    if let Some(usage) = body.get("usage") {
        output.tokens_input = usage.get("prompt_tokens").and_then(Value::as_i64).map(|v| v as i32);
        output.tokens_output = usage
            .get("completion_tokens")
            .and_then(Value::as_i64)
            .map(|v| v as i32);
        output.total_tokens = usage.get("total_tokens").and_then(Value::as_i64).map(|v| v as i32);
    }
}

#[async_trait]
impl LlmClient for AzureClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        debug!(
            "calling azure openai ({}) temp={} max_tokens={}",
            model, temperature, max_tokens
        );
        let client = build_http_client()?;
        let payload = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = client
            .post(&self.endpoint)
            .header("api-key", &self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(format!(
                "Azure OpenAI returned status {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("Azure OpenAI returned malformed JSON: {}", e)))?;

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::new("Empty response from Azure OpenAI"))?
            .to_string();

        let mut output = GenerationOutput {
            text,
            ..Default::default()
        };
        extract_usage(&mut output, &body);
        Ok(output)
    }
}
