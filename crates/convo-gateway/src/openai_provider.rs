use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use convo_core::types::ConversationRequest;

use crate::error::ProviderError;
use crate::prompt::build_user_payload;
use crate::provider::Provider;

pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(model: impl Into<String>, api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    async fn generate(&self, request: &ConversationRequest) -> Result<serde_json::Value, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": request.system_role},
                {"role": "user", "content": build_user_payload(request).to_string()},
            ],
        });

        debug!(model = %self.model, "sending request to OpenAI");

        let resp = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ProviderError::Timeout
                } else {
                    ProviderError::Transport { status: e.status().map(|s| s.as_u16()), message: e.to_string() }
                }
            })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Transport { status: Some(429), message });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "OpenAI API error");
            return Err(ProviderError::Transport { status: Some(status), message: text });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let content = api_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Parse("no choices in response".to_string()))?;

        serde_json::from_str(&content).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}
