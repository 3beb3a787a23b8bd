use async_trait::async_trait;
use log::debug;
use serde_json::{json, Value};

use super::{build_http_client, GenerationOutput, LlmClient, ProviderError};

/// Google Generative Language client (`models/{model}:generateContent`).
pub struct GeminiClient {
    endpoint: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        GeminiClient { endpoint, api_key }
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<GenerationOutput, ProviderError> {
        debug!(
            "calling gemini ({}) temp={} max_tokens={}",
            model, temperature, max_tokens
        );
        let client = build_http_client()?;
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint.trim_end_matches('/'),
            model,
            self.api_key
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": temperature,
                "maxOutputTokens": max_tokens,
            },
        });

        let response = client.post(&url).json(&payload).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::new(format!(
                "Gemini returned status {}: {}",
                status, body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::new(format!("Gemini returned malformed JSON: {}", e)))?;

        // A safety-blocked candidate comes back without parts; treat it the
        // same as an empty response.
        let text = body
            .get("candidates")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|p| p.get(0))
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .ok_or_else(|| ProviderError::new("Empty response from Gemini"))?
            .to_string();

        let mut output = GenerationOutput {
            text,
            ..Default::default()
        };
        if let Some(usage) = body.get("usageMetadata") {
            output.tokens_input = usage
                .get("promptTokenCount")
                .and_then(Value::as_i64)
                .map(|v| v as i32);
            output.tokens_output = usage
                .get("candidatesTokenCount")
                .and_then(Value::as_i64)
                .map(|v| v as i32);
            output.total_tokens = usage
                .get("totalTokenCount")
                .and_then(Value::as_i64)
                .map(|v| v as i32);
        }
        Ok(output)
    }
}
