use std::fmt;

use convo_core::tokenize::{tokenize, BASE_ALLOWED_SUPPORT, PARTICLE_SUFFIXES};
use convo_core::types::{ConversationRequest, ConversationResponse, MicroFeedbackType, TargetType};

use crate::validator::required_gloss_set;

/// Named contract violations, in the order the checker evaluates them.
/// The checker returns the first violation it finds.
#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    MissingMicroFeedbackEn,
    MissingSuggestedUserReplyKo,
    MissingSuggestedUserReplyEn,
    SuggestedUserReplyMustNotBeQuestion,
    RepeatedSuggestedUserReply,
    SentenceLengthMax,
    InvalidTargetsUsed(Vec<String>),
    MissingTargetWord,
    MaxCorrections,
    MissingWordGlosses(Vec<String>),
    LexicalSimilarity,
    SemanticSimilarity,
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingMicroFeedbackEn => write!(f, "missing_micro_feedback_en"),
            Self::MissingSuggestedUserReplyKo => write!(f, "missing_suggested_user_reply_ko"),
            Self::MissingSuggestedUserReplyEn => write!(f, "missing_suggested_user_reply_en"),
            Self::SuggestedUserReplyMustNotBeQuestion => {
                write!(f, "suggested_user_reply_must_not_be_question")
            }
            Self::RepeatedSuggestedUserReply => write!(f, "repeated_suggested_user_reply"),
            Self::SentenceLengthMax => write!(f, "sentence_length_max"),
            Self::InvalidTargetsUsed(ids) => {
                write!(f, "invalid_targets_used:{}", ids.join(","))
            }
            Self::MissingTargetWord => write!(f, "missing_target_word"),
            Self::MaxCorrections => write!(f, "max_corrections"),
            Self::MissingWordGlosses(tokens) => {
                write!(f, "missing_word_glosses:{}", tokens.join(","))
            }
            Self::LexicalSimilarity => write!(f, "lexical_similarity"),
            Self::SemanticSimilarity => write!(f, "semantic_similarity"),
        }
    }
}

/// Trims trailing `.!?` and collapses whitespace — the normalization used
/// to compare a suggested reply against the previous turn's.
pub fn normalize_reply(s: &str) -> String {
    let trimmed = s.trim_end_matches(['.', '!', '?']).trim();
    trimmed.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn jaccard(a: &std::collections::HashSet<&str>, b: &std::collections::HashSet<&str>) -> f64 {
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// In declaration order; returns the first violation found.
pub fn check_response_against_request(
    request: &ConversationRequest,
    response: &ConversationResponse,
) -> Option<ContractViolation> {
    let instructions = &request.generation_instructions;
    let constraints = &request.language_constraints;

    if instructions.provide_micro_feedback && response.micro_feedback.content_en.trim().is_empty() {
        return Some(ContractViolation::MissingMicroFeedbackEn);
    }

    let suggested_ko = response.suggested_user_reply_ko.as_deref().unwrap_or("");
    let suggested_en = response.suggested_user_reply_en.as_deref().unwrap_or("");
    if suggested_ko.trim().is_empty() {
        return Some(ContractViolation::MissingSuggestedUserReplyKo);
    }
    if suggested_en.trim().is_empty() {
        return Some(ContractViolation::MissingSuggestedUserReplyEn);
    }
    if suggested_ko.contains('?') {
        return Some(ContractViolation::SuggestedUserReplyMustNotBeQuestion);
    }
    if let Some(prev) = &request.conversation_state.last_suggested_user_reply_ko {
        if normalize_reply(suggested_ko) == normalize_reply(prev) {
            return Some(ContractViolation::RepeatedSuggestedUserReply);
        }
    }

    if constraints.forbidden.sentence_length_max > 0 {
        let count = tokenize(&response.assistant_reply_ko).len();
        if count as u32 > constraints.forbidden.sentence_length_max {
            return Some(ContractViolation::SentenceLengthMax);
        }
    }

    let declared: std::collections::HashSet<&str> =
        constraints.must_target.iter().map(|t| t.id.as_str()).collect();
    let invalid: Vec<String> = response
        .targets_used
        .iter()
        .filter(|t| !declared.contains(t.as_str()))
        .cloned()
        .collect();
    if !invalid.is_empty() {
        return Some(ContractViolation::InvalidTargetsUsed(invalid));
    }

    let has_vocab_target = constraints
        .must_target
        .iter()
        .any(|t| t.target_type == TargetType::Vocab);
    if has_vocab_target {
        let vocab_ids: std::collections::HashSet<&str> = constraints
            .must_target
            .iter()
            .filter(|t| t.target_type == TargetType::Vocab)
            .map(|t| t.id.as_str())
            .collect();
        if !response.targets_used.iter().any(|t| vocab_ids.contains(t.as_str())) {
            return Some(ContractViolation::MissingTargetWord);
        }
    }

    if instructions.max_corrections == 0
        && response.micro_feedback.feedback_type == MicroFeedbackType::Correction
    {
        return Some(ContractViolation::MaxCorrections);
    }

    let gloss_required = required_gloss_set(constraints);
    let mut missing_glosses = Vec::new();
    for token in tokenize(&response.assistant_reply_ko) {
        let required = convo_core::tokenize::token_is_allowed(&token, &gloss_required, PARTICLE_SUFFIXES);
        if required && !response.word_glosses.contains_nonempty(&token) {
            missing_glosses.push(token);
        }
    }
    if !missing_glosses.is_empty() {
        return Some(ContractViolation::MissingWordGlosses(missing_glosses));
    }

    let prev = &request.conversation_state.last_assistant_turn_ko;
    if !prev.is_empty() {
        let prev_tokens = tokenize(prev);
        let cur_tokens = tokenize(&response.assistant_reply_ko);
        if prev_tokens.len() >= 4 && cur_tokens.len() >= 4 {
            let prev_set: std::collections::HashSet<&str> =
                prev_tokens.iter().map(String::as_str).collect();
            let cur_set: std::collections::HashSet<&str> =
                cur_tokens.iter().map(String::as_str).collect();
            if jaccard(&prev_set, &cur_set) >= instructions.lexical_similarity_max {
                return Some(ContractViolation::LexicalSimilarity);
            }
        }
        let content_of = |tokens: &[String]| -> std::collections::HashSet<String> {
            tokens
                .iter()
                .filter(|t| !BASE_ALLOWED_SUPPORT.contains(&t.as_str()))
                .cloned()
                .collect()
        };
        let prev_content = content_of(&prev_tokens);
        let cur_content = content_of(&cur_tokens);
        if prev_content.len() >= 2 && cur_content.len() >= 2 {
            let prev_set: std::collections::HashSet<&str> =
                prev_content.iter().map(String::as_str).collect();
            let cur_set: std::collections::HashSet<&str> =
                cur_content.iter().map(String::as_str).collect();
            if jaccard(&prev_set, &cur_set) >= instructions.semantic_similarity_max {
                return Some(ContractViolation::SemanticSimilarity);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::types::{
        ConversationState, GenerationInstructions, LanguageConstraints, MicroFeedback, UserInput,
        WordGlosses,
    };

    fn base_request() -> ConversationRequest {
        ConversationRequest {
            system_role: "s".to_string(),
            conversation_state: ConversationState::default(),
            user_input: UserInput {
                text_ko: "안녕".to_string(),
                confidence: None,
            },
            language_constraints: LanguageConstraints::default(),
            generation_instructions: GenerationInstructions::default(),
        }
    }

    fn base_response() -> ConversationResponse {
        ConversationResponse {
            assistant_reply_ko: "네 맞아요.".to_string(),
            word_glosses: WordGlosses::default(),
            micro_feedback: MicroFeedback {
                feedback_type: MicroFeedbackType::None,
                content_ko: String::new(),
                content_en: "ok".to_string(),
            },
            suggested_user_reply_ko: Some("좋아요.".to_string()),
            suggested_user_reply_en: Some("Sounds good.".to_string()),
            suggested_user_intent_en: None,
            targets_used: vec![],
            unexpected_tokens: vec![],
        }
    }

    #[test]
    fn sentence_length_violation() {
        let mut request = base_request();
        request.language_constraints.forbidden.sentence_length_max = 2;
        let mut response = base_response();
        response.assistant_reply_ko = "하나 둘 셋 넷 다섯".to_string();
        let violation = check_response_against_request(&request, &response);
        assert_eq!(violation, Some(ContractViolation::SentenceLengthMax));
    }

    #[test]
    fn question_suggested_reply_is_rejected() {
        let request = base_request();
        let mut response = base_response();
        response.suggested_user_reply_ko = Some("정말요?".to_string());
        let violation = check_response_against_request(&request, &response);
        assert_eq!(
            violation,
            Some(ContractViolation::SuggestedUserReplyMustNotBeQuestion)
        );
    }

    #[test]
    fn repeated_suggested_reply_is_rejected() {
        let mut request = base_request();
        request.conversation_state.last_suggested_user_reply_ko =
            Some("좋아요".to_string());
        let response = base_response();
        let violation = check_response_against_request(&request, &response);
        assert_eq!(violation, Some(ContractViolation::RepeatedSuggestedUserReply));
    }

    #[test]
    fn max_corrections_zero_rejects_correction_feedback() {
        let mut request = base_request();
        request.generation_instructions.max_corrections = 0;
        let mut response = base_response();
        response.micro_feedback.feedback_type = MicroFeedbackType::Correction;
        let violation = check_response_against_request(&request, &response);
        assert_eq!(violation, Some(ContractViolation::MaxCorrections));
    }

    #[test]
    fn no_violation_on_clean_response() {
        let request = base_request();
        let response = base_response();
        assert_eq!(check_response_against_request(&request, &response), None);
    }

    #[test]
    fn always_allowed_interjection_without_gloss_is_not_flagged() {
        let request = base_request();
        let mut response = base_response();
        response.assistant_reply_ko = "음 좋아요.".to_string();
        assert_eq!(check_response_against_request(&request, &response), None);
    }
}
