use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use super::{build_http_client, GenerationOutput, LlmClient, ProviderError};

/// xAI Grok client, OpenAI-compatible chat completions with bearer auth.
pub struct GrokClient {
    endpoint: String,
    api_key: String,
}

impl GrokClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        GrokClient { endpoint, api_key }
    }
}

#[async_trait]
impl LlmClient for GrokClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        debug!(
            "calling grok ({}) temp={} max_tokens={}",
            model, temperature, max_tokens
        );
        let client = build_http_client()?;
        let url = format!("{}/chat/completions", self.endpoint.trim_end_matches('/'));
        let payload = json!({
            "model": model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": temperature,
            "max_tokens": max_tokens,
        });

        let response = client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(format!(
                "Grok returned status {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("Grok returned malformed JSON: {}", e)))?;

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::new("Empty response from Grok"))?
            .to_string();

        let mut output = GenerationOutput {
            text,
            ..Default::default()
        };
        if let Some(usage) = body.get("usage") {
            output.tokens_input = usage.get("prompt_tokens").and_then(Value::as_i64).map(|v| v as i32);
            output.tokens_output = usage
                .get("completion_tokens")
                .and_then(Value::as_i64)
                .map(|v| v as i32);
            output.total_tokens = usage.get("total_tokens").and_then(Value::as_i64).map(|v| v as i32);
        }
        Ok(output)
    }
}
