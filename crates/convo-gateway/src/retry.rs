use std::time::Duration;

use tracing::warn;

use crate::error::ProviderError;
use crate::provider::Provider;
use convo_core::types::ConversationRequest;

/// Extracted as a value type so transports are interchangeable — base
/// 0.5s, cap 8s, retriable on `{408,409,425,429,500,502,503,504}` and
/// network/timeout failures, up to `max_retries` (default 2).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_ms: u64,
    pub cap_ms: u64,
    pub max_retries: u32,
    pub retriable_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            cap_ms: 8000,
            max_retries: 2,
            retriable_statuses: vec![408, 409, 425, 429, 500, 502, 503, 504],
        }
    }
}

impl RetryPolicy {
    fn is_retriable(&self, err: &ProviderError) -> bool {
        match err {
            ProviderError::Timeout => true,
            ProviderError::Transport { status, .. } => {
                status.map(|s| self.retriable_statuses.contains(&s)).unwrap_or(true)
            }
            ProviderError::Parse(_) => false,
        }
    }

    /// Exponential backoff doubling from `base_ms`, capped at `cap_ms`, with
    /// deterministic pseudo-random jitter derived from the wall clock
    /// (mirrors the no-`rand`-dependency backoff used elsewhere in this
    /// codebase) instead of true randomness.
    fn delay_ms(&self, attempt: u32) -> u64 {
        let base = self.base_ms.saturating_mul(1u64 << attempt.min(16)).min(self.cap_ms);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0) as u64;
        let max_jitter = base / 10;
        let jitter = if max_jitter == 0 { 0 } else { nanos % max_jitter };
        (base + jitter).min(self.cap_ms)
    }
}

/// Calls `provider.generate`, retrying transport/timeout failures per
/// `policy` up to `max_retries` times. Parse errors are never retried here
/// — they are the Gateway's job to turn into a rewrite.
pub async fn generate_with_retry(
    provider: &dyn Provider,
    request: &ConversationRequest,
    policy: &RetryPolicy,
) -> Result<serde_json::Value, ProviderError> {
    let mut attempt = 0;
    loop {
        match provider.generate(request).await {
            Ok(value) => return Ok(value),
            Err(err) if policy.is_retriable(&err) && attempt < policy.max_retries => {
                let delay = policy.delay_ms(attempt);
                warn!(attempt, delay_ms = delay, error = %err, "provider call failed, retrying");
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
