use std::sync::Mutex;

use async_trait::async_trait;
use convo_core::types::ConversationRequest;

use crate::error::ProviderError;
use crate::provider::Provider;

/// Deterministic stand-in for a real LLM, used by tests and the terminal
/// demo. Returns scripted responses in order; once the script is
/// exhausted, synthesizes a minimal response that satisfies the request's
/// own constraints so the rewrite loop doesn't spin forever.
pub struct FakeProvider {
    script: Mutex<Vec<serde_json::Value>>,
}

impl FakeProvider {
    pub fn new(script: Vec<serde_json::Value>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    fn synthesize(request: &ConversationRequest) -> serde_json::Value {
        let must_target = request.language_constraints.must_target.first();
        let reply = match must_target {
            Some(target) => format!("{} 있어요.", target.surface_forms.join(" ")),
            None => "네, 맞아요.".to_string(),
        };
        let targets_used: Vec<String> = must_target.map(|t| vec![t.id.as_str().to_string()]).unwrap_or_default();
        let glosses: serde_json::Map<String, serde_json::Value> = must_target
            .map(|t| {
                t.surface_forms
                    .iter()
                    .map(|s| (s.clone(), serde_json::Value::String(t.gloss.clone().unwrap_or_else(|| s.clone()))))
                    .collect()
            })
            .unwrap_or_default();

        serde_json::json!({
            "assistant_reply_ko": reply,
            "word_glosses": glosses,
            "micro_feedback": {"type": "none", "content_ko": "", "content_en": "ok"},
            "suggested_user_reply_ko": "네, 맞아요.",
            "suggested_user_reply_en": "Yes, that's right.",
            "suggested_user_intent_en": "agreeing",
            "targets_used": targets_used,
            "unexpected_tokens": [],
        })
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn generate(&self, request: &ConversationRequest) -> Result<serde_json::Value, ProviderError> {
        let next = {
            let mut script = self.script.lock().expect("fake provider mutex poisoned");
            if script.is_empty() {
                None
            } else {
                Some(script.remove(0))
            }
        };
        Ok(next.unwrap_or_else(|| Self::synthesize(request)))
    }
}
