use std::time::Duration;

use crate::ChatBackend;
use crate::types::*;
use anyhow::{Context, Result};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Model for the prompt enhancement call. Falls back to `model`.
    pub enhancement_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Transport-level ceiling; callers apply tighter per-call budgets.
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.x.ai/v1".to_string(),
            api_key: None,
            model: "grok-4-fast-non-reasoning".to_string(),
            enhancement_model: Some("grok-3-mini".to_string()),
            temperature: Some(0.2),
            max_tokens: Some(4096),
            request_timeout: Duration::from_secs(240),
        }
    }
}

impl LlmConfig {
    /// Config for the enhancement call: same endpoint, lighter model.
    pub fn for_enhancement(&self) -> LlmConfig {
        LlmConfig {
            model: self
                .enhancement_model
                .clone()
                .unwrap_or_else(|| self.model.clone()),
            temperature: Some(0.3),
            max_tokens: Some(1024),
            ..self.clone()
        }
    }
}

pub struct LlmClient {
    config: LlmConfig,
    http: reqwest::Client,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    pub async fn chat(&self, messages: Vec<Message>) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        debug!("LLM request to {}: {} messages", url, request.messages.len());

        let mut req_builder = self.http.post(&url).json(&request);

        if let Some(api_key) = &self.config.api_key {
            req_builder = req_builder.bearer_auth(api_key);
        }

        let response = req_builder
            .send()
            .await
            .context("Failed to send request to LLM")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM request failed ({}): {}", status, error_text);
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .context("Failed to parse LLM response")?;

        info!(
            model = %self.config.model,
            "LLM response: finish_reason={:?}, total_tokens={:?}",
            chat_response
                .choices
                .first()
                .and_then(|c| c.finish_reason.as_ref()),
            chat_response.usage.as_ref().map(|u| u.total_tokens)
        );

        Ok(chat_response)
    }
}

impl ChatBackend for LlmClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn chat(&self, messages: Vec<Message>) -> Result<ChatResponse> {
        LlmClient::chat(self, messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enhancement_config_uses_lighter_model() {
        let config = LlmConfig {
            api_key: Some("key".to_string()),
            ..LlmConfig::default()
        };
        let enhancement = config.for_enhancement();
        assert_eq!(enhancement.model, "grok-3-mini");
        assert_eq!(enhancement.base_url, config.base_url);
        assert_eq!(enhancement.api_key.as_deref(), Some("key"));
        assert_eq!(enhancement.max_tokens, Some(1024));
    }

    #[test]
    fn enhancement_config_falls_back_to_main_model() {
        let config = LlmConfig {
            model: "local".to_string(),
            enhancement_model: None,
            ..LlmConfig::default()
        };
        assert_eq!(config.for_enhancement().model, "local");
    }

    #[test]
    fn first_text_skips_blank_content() {
        let response: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"role":"assistant","content":"   "},"finish_reason":"stop"}]}"#,
        )
        .unwrap();
        assert_eq!(response.first_text(), None);

        let response: ChatResponse = serde_json::from_str(
            r#"{"id":"r1","choices":[{"index":0,"message":{"role":"assistant","content":"{}"}}],"usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#,
        )
        .unwrap();
        assert_eq!(response.first_text(), Some("{}"));
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(4));
    }

    #[test]
    fn chat_request_carries_only_the_conversation() {
        let request = ChatRequest {
            model: "grok-3".to_string(),
            messages: vec![Message::system("sys"), Message::user("hi")],
            temperature: None,
            max_tokens: Some(16),
        };
        let body = serde_json::to_value(&request).unwrap();
        let mut keys: Vec<_> = body.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, vec!["max_tokens", "messages", "model"]);
        assert_eq!(body["messages"][1], serde_json::json!({"role": "user", "content": "hi"}));
    }
}
