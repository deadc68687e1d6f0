use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{ConvoError, Result};
use crate::ids::ItemId;

/// The four target kinds a [`MustTarget`] may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Vocab,
    Grammar,
    Collocation,
    Repair,
    NewWord,
}

/// An item the assistant is contractually required to use this turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustTarget {
    pub id: ItemId,
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub surface_forms: Vec<String>,
    pub priority: f64,
    #[serde(default)]
    pub scaffolding_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exposure_stage: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gloss: Option<String>,
}

impl MustTarget {
    /// Builds a plain vocab target from a single lexeme — the common case.
    pub fn vocab(id: ItemId, lexeme: &str, priority: f64) -> Self {
        Self {
            id,
            target_type: TargetType::Vocab,
            surface_forms: vec![lexeme.to_string()],
            priority,
            scaffolding_required: false,
            exposure_stage: None,
            gloss: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrammarPattern {
    pub id: ItemId,
    pub pattern: String,
    #[serde(default)]
    pub triggers: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenConstraints {
    pub introduce_new_vocab: bool,
    pub sentence_length_max: u32,
}

impl Default for ForbiddenConstraints {
    fn default() -> Self {
        Self {
            introduce_new_vocab: true,
            sentence_length_max: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LanguageConstraints {
    pub must_target: Vec<MustTarget>,
    pub allowed_support: Vec<String>,
    pub allowed_stretch: Vec<String>,
    pub reinforced_words: Vec<String>,
    pub allowed_grammar: Vec<GrammarPattern>,
    pub forbidden: ForbiddenConstraints,
    pub require_new_vocab: bool,
}

impl LanguageConstraints {
    /// All surface forms carried by `must_target` entries — implicitly
    /// permitted regardless of the support/stretch pools.
    pub fn target_surface_forms(&self) -> impl Iterator<Item = &str> {
        self.must_target
            .iter()
            .flat_map(|t| t.surface_forms.iter().map(String::as_str))
    }

    /// `require_new_vocab ⇒ ¬forbidden.introduce_new_vocab`.
    pub fn is_consistent(&self) -> bool {
        !self.require_new_vocab || !self.forbidden.introduce_new_vocab
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationInstructions {
    pub register: String,
    pub tone: String,
    pub safe_mode: bool,
    pub provide_micro_feedback: bool,
    pub provide_suggested_english_intent: bool,
    pub max_corrections: u32,
    pub lexical_similarity_max: f64,
    pub semantic_similarity_max: f64,
}

impl Default for GenerationInstructions {
    fn default() -> Self {
        Self {
            register: "해요체".to_string(),
            tone: "friendly".to_string(),
            safe_mode: true,
            provide_micro_feedback: true,
            provide_suggested_english_intent: true,
            max_corrections: 1,
            lexical_similarity_max: 0.6,
            semantic_similarity_max: 0.6,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationState {
    pub summary: String,
    pub last_assistant_turn_ko: String,
    pub last_user_turn_ko: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_suggested_user_reply_ko: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Confident,
    Unsure,
    Guessing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInput {
    pub text_ko: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<Confidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRequest {
    pub system_role: String,
    pub conversation_state: ConversationState,
    pub user_input: UserInput,
    pub language_constraints: LanguageConstraints,
    pub generation_instructions: GenerationInstructions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MicroFeedbackType {
    None,
    Correction,
    Praise,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroFeedback {
    #[serde(rename = "type")]
    pub feedback_type: MicroFeedbackType,
    #[serde(default)]
    pub content_ko: String,
    #[serde(default)]
    pub content_en: String,
}

/// `word_glosses` round-trips as a JSON object on the wire, but the source
/// provider sometimes emits a list of `[token, gloss]` pairs — accept both.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WordGlosses(pub std::collections::BTreeMap<String, String>);

impl WordGlosses {
    pub fn get(&self, token: &str) -> Option<&str> {
        self.0.get(token).map(String::as_str)
    }

    pub fn contains_nonempty(&self, token: &str) -> bool {
        matches!(self.get(token), Some(g) if !g.trim().is_empty())
    }
}

impl<'de> Deserialize<'de> for WordGlosses {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Map(std::collections::BTreeMap<String, String>),
            Pairs(Vec<(String, String)>),
        }
        let shape = Shape::deserialize(deserializer)?;
        Ok(match shape {
            Shape::Map(m) => WordGlosses(m),
            Shape::Pairs(pairs) => WordGlosses(pairs.into_iter().collect()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationResponse {
    pub assistant_reply_ko: String,
    #[serde(default)]
    pub word_glosses: WordGlosses,
    pub micro_feedback: MicroFeedback,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_user_reply_ko: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_user_reply_en: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_user_intent_en: Option<String>,
    #[serde(default)]
    pub targets_used: Vec<String>,
    #[serde(default)]
    pub unexpected_tokens: Vec<String>,
}

impl ConversationResponse {
    /// Parses a raw provider payload, applying the same structural checks
    /// the source's `from_json_dict` performs (non-empty required strings,
    /// closed enum for `micro_feedback.type`).
    pub fn parse(raw: &serde_json::Value) -> Result<Self> {
        let resp: ConversationResponse = serde_json::from_value(raw.clone())?;
        if resp.assistant_reply_ko.trim().is_empty() {
            return Err(ConvoError::Snapshot(
                "assistant_reply_ko must be a non-empty string".to_string(),
            ));
        }
        Ok(resp)
    }
}

/// Lifecycle stage of a word introduced by the new-word pipeline.
/// Graduation (stage 4) is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum NewWordStage {
    Comprehension = 1,
    Highlighted = 2,
    Scaffolded = 3,
    Graduated = 4,
}

impl NewWordStage {
    pub fn from_exposure_count(count: u32) -> Self {
        if count >= 3 {
            NewWordStage::Graduated
        } else if count == 2 {
            NewWordStage::Highlighted
        } else {
            NewWordStage::Comprehension
        }
    }

    pub fn is_graduated(self) -> bool {
        matches!(self, NewWordStage::Graduated)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewWordState {
    pub lexeme: String,
    pub gloss: Option<String>,
    pub introduced_turn: u64,
    pub current_stage: NewWordStage,
    pub exposure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_turn: Option<u64>,
}

impl NewWordState {
    pub fn new(lexeme: impl Into<String>, gloss: Option<String>, introduced_turn: u64) -> Self {
        Self {
            lexeme: lexeme.into(),
            gloss,
            introduced_turn,
            current_stage: NewWordStage::Comprehension,
            exposure_count: 0,
            last_seen_turn: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.current_stage.is_graduated()
    }
}

/// Per-session mutable planner state — owned by exactly one session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlannerState {
    pub conversation_summary: String,
    pub last_assistant_turn_ko: String,
    pub last_user_turn_ko: String,
    pub last_suggested_user_reply_ko: Option<String>,
    pub turn_index: u64,
    pub turns_since_new_word: u32,
    pub scheduled_reuse: HashMap<String, u64>,
    pub last_must_target_ids: Vec<String>,
    pub new_word_states: HashMap<String, NewWordState>,
    pub last_debug_vocab: Vec<String>,
}

impl PlannerState {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            conversation_summary: summary.into(),
            ..Default::default()
        }
    }

    /// Any new-word state whose pipeline stage is 1–3 (not yet graduated).
    pub fn active_new_word(&self) -> Option<&NewWordState> {
        self.new_word_states.values().find(|s| s.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_glosses_accepts_object_shape() {
        let raw = serde_json::json!({"의자": "chair", "사과": "apple"});
        let g: WordGlosses = serde_json::from_value(raw).unwrap();
        assert_eq!(g.get("의자"), Some("chair"));
    }

    #[test]
    fn word_glosses_accepts_pair_list_shape() {
        let raw = serde_json::json!([["의자", "chair"], ["사과", "apple"]]);
        let g: WordGlosses = serde_json::from_value(raw).unwrap();
        assert_eq!(g.get("사과"), Some("apple"));
    }

    #[test]
    fn response_round_trips_through_json() {
        let resp = ConversationResponse {
            assistant_reply_ko: "의자 있어요.".to_string(),
            word_glosses: WordGlosses(
                [("의자".to_string(), "chair".to_string())].into_iter().collect(),
            ),
            micro_feedback: MicroFeedback {
                feedback_type: MicroFeedbackType::Praise,
                content_ko: "잘했어요".to_string(),
                content_en: "well done".to_string(),
            },
            suggested_user_reply_ko: Some("네, 있어요.".to_string()),
            suggested_user_reply_en: Some("Yes, there is.".to_string()),
            suggested_user_intent_en: None,
            targets_used: vec!["lexeme:의자".to_string()],
            unexpected_tokens: vec![],
        };
        let json = serde_json::to_value(&resp).unwrap();
        let parsed = ConversationResponse::parse(&json).unwrap();
        assert_eq!(parsed.assistant_reply_ko, resp.assistant_reply_ko);
        assert_eq!(parsed.targets_used, resp.targets_used);
    }

    #[test]
    fn parse_rejects_empty_reply() {
        let raw = serde_json::json!({
            "assistant_reply_ko": "",
            "micro_feedback": {"type": "none", "content_ko": "", "content_en": ""},
        });
        assert!(ConversationResponse::parse(&raw).is_err());
    }

    #[test]
    fn language_constraints_consistency_invariant() {
        let mut lc = LanguageConstraints::default();
        lc.require_new_vocab = true;
        lc.forbidden.introduce_new_vocab = true;
        assert!(!lc.is_consistent());
        lc.forbidden.introduce_new_vocab = false;
        assert!(lc.is_consistent());
    }

    #[test]
    fn new_word_stage_from_exposure_count() {
        assert_eq!(NewWordStage::from_exposure_count(0), NewWordStage::Comprehension);
        assert_eq!(NewWordStage::from_exposure_count(2), NewWordStage::Highlighted);
        assert_eq!(NewWordStage::from_exposure_count(3), NewWordStage::Graduated);
        assert_eq!(NewWordStage::from_exposure_count(9), NewWordStage::Graduated);
    }
}
