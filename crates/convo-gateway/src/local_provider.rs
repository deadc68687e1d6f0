use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use convo_core::types::ConversationRequest;

use crate::error::ProviderError;
use crate::prompt::build_user_payload;
use crate::provider::Provider;

/// Talks to a locally-hosted, OpenAI-compatible chat endpoint (e.g.
/// Ollama). No authentication, connection failures are treated as
/// transport errors the retry policy can act on.
pub struct LocalProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl LocalProvider {
    pub fn new(model: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.unwrap_or_else(|| "http://localhost:11434".to_string()),
            model: model.into(),
        }
    }
}

#[async_trait]
impl Provider for LocalProvider {
    async fn generate(&self, request: &ConversationRequest) -> Result<serde_json::Value, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "format": "json",
            "messages": [
                {"role": "system", "content": request.system_role},
                {"role": "user", "content": build_user_payload(request).to_string()},
            ],
        });

        debug!(model = %self.model, "sending request to local provider");

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
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
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "local provider error");
            return Err(ProviderError::Transport { status: Some(status), message: text });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        serde_json::from_str(&api_resp.message.content).map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ApiResponse {
    message: ApiMessage,
}

#[derive(Deserialize)]
struct ApiMessage {
    content: String,
}
