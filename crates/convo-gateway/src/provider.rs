use async_trait::async_trait;
use convo_core::types::ConversationRequest;

use crate::error::ProviderError;

/// The sole collaborator the Gateway depends on — JSON in, JSON out, no
/// LLM SDK types leak past this boundary.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn generate(&self, request: &ConversationRequest) -> Result<serde_json::Value, ProviderError>;
}
