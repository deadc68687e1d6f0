use std::collections::HashSet;

use convo_core::types::{ConversationRequest, ConversationResponse, LanguageConstraints, TargetType};
use convo_planner::{check_response_against_request, normalize_reply, ContractViolation};

use crate::error::{GatewayError, ProviderError, Result};
use crate::provider::Provider;
use crate::retry::{generate_with_retry, RetryPolicy};

/// Deterministic fallback suggested-reply pairs, tried in order against
/// the previous and current suggested replies until one differs from
/// both — used only on the final rewrite attempt when the model keeps
/// repeating itself.
const FALLBACK_REPLIES: &[(&str, &str)] = &[
    ("네, 그렇죠.", "Yes, that's right."),
    ("알겠어요.", "Got it."),
    ("좋아요, 감사해요.", "Great, thanks."),
    ("음, 한번 볼게요.", "Hmm, let me see."),
];

const REWRITE_MARKER: &str = "\n\nRewrite required:";

fn rewrite_directive(constraints: &LanguageConstraints) -> &'static str {
    if constraints.require_new_vocab {
        "Introduce exactly one new Korean word outside the allowed lists and gloss it in word_glosses."
    } else if !constraints.forbidden.introduce_new_vocab {
        "You may introduce at most one new word outside the allowed lists, with a gloss in word_glosses."
    } else {
        "Use only vocabulary from the must-target and allowed lists; do not introduce new words."
    }
}

/// Replaces any prior rewrite addendum rather than appending to it, so the
/// system role never grows across attempts.
fn apply_rewrite(request: &mut ConversationRequest, reason: &str) {
    if let Some(idx) = request.system_role.find(REWRITE_MARKER) {
        request.system_role.truncate(idx);
    }
    let directive = rewrite_directive(&request.language_constraints);
    request.system_role.push_str(&format!(
        "{REWRITE_MARKER} your previous output violated the contract ({reason}). {directive}"
    ));
}

/// Recomputes which must-targets the reply actually used — the gateway
/// never trusts the provider's own `targets_used`.
fn recompute_targets_used(reply_ko: &str, must_target: &[convo_core::types::MustTarget]) -> Vec<String> {
    let reply_tokens = convo_core::tokenize::tokenize(reply_ko);
    let mut used = Vec::new();
    for target in must_target {
        let hit = if target.target_type == TargetType::Collocation {
            target.surface_forms.iter().all(|sf| {
                let allowed: HashSet<&str> = [sf.as_str()].into_iter().collect();
                reply_tokens
                    .iter()
                    .any(|t| convo_core::tokenize::token_is_allowed(t, &allowed, convo_core::tokenize::PARTICLE_SUFFIXES))
            })
        } else {
            let allowed: HashSet<&str> = target.surface_forms.iter().map(String::as_str).collect();
            reply_tokens
                .iter()
                .any(|t| convo_core::tokenize::token_is_allowed(t, &allowed, convo_core::tokenize::PARTICLE_SUFFIXES))
        };
        if hit {
            used.push(target.id.as_str().to_string());
        }
    }
    used
}

/// Outcome of the safe_mode pre-checks: the deduplicated unexpected-token
/// set (always computed, even on violation, so a gracefully-degraded
/// response can still carry it) plus the rewrite reason if any.
struct SafeModeOutcome {
    unexpected_unique: Vec<String>,
    violation: Option<String>,
}

/// The safe_mode pre-checks from the rewrite loop.
fn safe_mode_check(request: &ConversationRequest, response: &ConversationResponse) -> SafeModeOutcome {
    use convo_planner::validator::validate_tokens;

    let constraints = &request.language_constraints;
    let has_vocab = constraints.must_target.iter().any(|t| t.target_type == TargetType::Vocab);
    if has_vocab && response.targets_used.is_empty() {
        return SafeModeOutcome { unexpected_unique: Vec::new(), violation: Some("missing_targets".to_string()) };
    }

    let assistant_unexpected = validate_tokens(&response.assistant_reply_ko, constraints);
    let suggested_unexpected = match &response.suggested_user_reply_ko {
        Some(s) => validate_tokens(s, constraints),
        None => Vec::new(),
    };
    let assistant_set: HashSet<&str> = assistant_unexpected.iter().map(String::as_str).collect();
    let extra_suggested: Vec<String> = suggested_unexpected
        .iter()
        .filter(|t| !assistant_set.contains(t.as_str()))
        .cloned()
        .collect();

    let mut unexpected_unique: Vec<String> = Vec::new();
    let mut seen = HashSet::new();
    for t in assistant_unexpected.into_iter().chain(suggested_unexpected) {
        if seen.insert(t.clone()) {
            unexpected_unique.push(t);
        }
    }

    if !extra_suggested.is_empty() {
        return SafeModeOutcome {
            unexpected_unique,
            violation: Some(format!("unexpected_tokens_suggested_reply:{}", extra_suggested.join(","))),
        };
    }

    let require_new_vocab = constraints.require_new_vocab;
    let allow_new_vocab = !constraints.forbidden.introduce_new_vocab;

    if unexpected_unique.is_empty() {
        if require_new_vocab {
            return SafeModeOutcome { unexpected_unique, violation: Some("missing_new_word".to_string()) };
        }
        return SafeModeOutcome { unexpected_unique, violation: None };
    }

    if !allow_new_vocab {
        return SafeModeOutcome {
            violation: Some(format!("unexpected_tokens:{}", unexpected_unique.join(","))),
            unexpected_unique,
        };
    }

    let mut too_many = unexpected_unique.len() > 1;
    if require_new_vocab && unexpected_unique.len() != 1 {
        too_many = true;
    }
    if too_many {
        return SafeModeOutcome { unexpected_unique, violation: Some("unexpected_tokens_limit".to_string()) };
    }
    let missing_glosses: Vec<String> = unexpected_unique
        .iter()
        .filter(|t| !response.word_glosses.contains_nonempty(t))
        .cloned()
        .collect();
    if !missing_glosses.is_empty() {
        return SafeModeOutcome {
            violation: Some(format!("missing_unexpected_glosses:{}", missing_glosses.join(","))),
            unexpected_unique,
        };
    }

    SafeModeOutcome { unexpected_unique, violation: None }
}

/// Contract violations a rewrite-budget exhaustion degrades gracefully
/// for (return the last response, with `unexpected_tokens` populated)
/// rather than raising.
fn is_gracefully_degradable(violation: &ContractViolation) -> bool {
    matches!(
        violation,
        ContractViolation::MissingWordGlosses(_) | ContractViolation::LexicalSimilarity | ContractViolation::SemanticSimilarity
    )
}

fn pick_fallback_reply(prev: &str, current: &str) -> (&'static str, &'static str) {
    let prev_norm = normalize_reply(prev);
    let current_norm = normalize_reply(current);
    FALLBACK_REPLIES
        .iter()
        .find(|(ko, _)| {
            let norm = normalize_reply(ko);
            norm != prev_norm && norm != current_norm
        })
        .copied()
        .unwrap_or(FALLBACK_REPLIES[0])
}

/// Runs the full Gateway rewrite loop: provider call (through the retry
/// policy) → structural parse → safe_mode pre-checks → contract check →
/// rewrite-and-retry, up to `max_rewrites` times.
pub async fn run_rewrite_loop(
    provider: &dyn Provider,
    base_request: &ConversationRequest,
    max_rewrites: u32,
    retry_policy: &RetryPolicy,
) -> Result<ConversationResponse> {
    let mut request = base_request.clone();
    let mut last_response: Option<ConversationResponse> = None;
    let mut last_reason = String::new();
    let mut last_graceful = false;

    for attempt in 0..=max_rewrites {
        let raw = match generate_with_retry(provider, &request, retry_policy).await {
            Ok(raw) => raw,
            Err(ProviderError::Timeout) => return Err(GatewayError::RequestTimedOut),
            Err(ProviderError::Transport { message, .. }) => return Err(GatewayError::Network(message)),
            Err(ProviderError::Parse(msg)) => {
                last_reason = format!("invalid_json:{msg}");
                last_graceful = false;
                last_response = None;
                apply_rewrite(&mut request, &last_reason);
                continue;
            }
        };

        let mut response = match ConversationResponse::parse(&raw) {
            Ok(r) => r,
            Err(e) => {
                last_reason = format!("invalid_json:{e}");
                last_graceful = false;
                last_response = None;
                apply_rewrite(&mut request, &last_reason);
                continue;
            }
        };

        response.targets_used = recompute_targets_used(&response.assistant_reply_ko, &request.language_constraints.must_target);

        if request.generation_instructions.safe_mode {
            let outcome = safe_mode_check(&request, &response);
            response.unexpected_tokens = outcome.unexpected_unique;
            if let Some(reason) = outcome.violation {
                last_reason = reason.clone();
                last_graceful = true;
                last_response = Some(response);
                apply_rewrite(&mut request, &reason);
                continue;
            }
        }

        match check_response_against_request(&request, &response) {
            None => return Ok(response),
            Some(violation) => {
                if attempt == max_rewrites && violation == ContractViolation::RepeatedSuggestedUserReply {
                    let prev = request
                        .conversation_state
                        .last_suggested_user_reply_ko
                        .clone()
                        .unwrap_or_default();
                    let current = response.suggested_user_reply_ko.clone().unwrap_or_default();
                    let (ko, en) = pick_fallback_reply(&prev, &current);
                    response.suggested_user_reply_ko = Some(ko.to_string());
                    response.suggested_user_reply_en = Some(en.to_string());
                    return Ok(response);
                }
                let graceful = is_gracefully_degradable(&violation);
                last_reason = format!("contract:{violation}");
                last_graceful = graceful;
                last_response = Some(response);
                apply_rewrite(&mut request, &last_reason);
                continue;
            }
        }
    }

    match (last_graceful, last_response) {
        (true, Some(response)) => Ok(response),
        (_, Some(_)) => Err(GatewayError::ContractViolation(last_reason)),
        (_, None) => Err(GatewayError::ProviderParse(last_reason)),
    }
}
