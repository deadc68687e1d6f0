use convo_core::tokenize::tokenize;
use convo_core::types::{Confidence, ConversationResponse, UserInput};

use crate::error::Result;
use crate::store::ConversationTelemetryStore;
use crate::types::MasteryCache;

/// Bumps `user_used` (and `used_unsure`/`used_guessing`) for every user
/// token that names a deck lexeme.
pub fn bump_user_used_lexemes(
    telemetry: &ConversationTelemetryStore,
    cache: &mut MasteryCache,
    lexeme_set: &std::collections::HashSet<String>,
    user_input: &UserInput,
) -> Result<()> {
    for token in tokenize(&user_input.text_ko) {
        if !lexeme_set.contains(&token) {
            continue;
        }
        let item_id = format!("lexeme:{token}");
        telemetry.bump_item_cached(cache, &item_id, "lexeme", &token, &[("user_used", 1)])?;
        match user_input.confidence {
            Some(Confidence::Unsure) => {
                telemetry.bump_item_cached(cache, &item_id, "lexeme", &token, &[("used_unsure", 1)])?;
            }
            Some(Confidence::Guessing) => {
                telemetry.bump_item_cached(cache, &item_id, "lexeme", &token, &[("used_guessing", 1)])?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Bumps `assistant_used` for every assistant-reply token that names a
/// deck lexeme.
pub fn bump_assistant_used_lexemes(
    telemetry: &ConversationTelemetryStore,
    cache: &mut MasteryCache,
    lexeme_set: &std::collections::HashSet<String>,
    response: &ConversationResponse,
) -> Result<()> {
    for token in tokenize(&response.assistant_reply_ko) {
        if !lexeme_set.contains(&token) {
            continue;
        }
        telemetry.bump_item_cached(
            cache,
            &format!("lexeme:{token}"),
            "lexeme",
            &token,
            &[("assistant_used", 1)],
        )?;
    }
    Ok(())
}

/// Logs the raw event, then interprets its `type`/payload to bump the
/// counters the corresponding behavior implies.
pub fn record_event_from_payload(
    telemetry: &ConversationTelemetryStore,
    cache: &mut MasteryCache,
    session_id: i64,
    turn_index: i64,
    payload: &serde_json::Value,
) -> Result<()> {
    let etype = payload
        .get("type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| crate::error::TelemetryError::InvalidPayload(
            "event.type must be a non-empty string".to_string(),
        ))?;

    telemetry.log_event(session_id, turn_index, etype, &payload.to_string())?;

    let token = payload.get("token").and_then(|v| v.as_str());

    match etype {
        "dont_know" | "practice_again" | "mark_confusing" => {
            if let Some(token) = token.filter(|t| !t.is_empty()) {
                telemetry.bump_item_cached(
                    cache,
                    &format!("lexeme:{token}"),
                    "lexeme",
                    token,
                    &[(etype, 1)],
                )?;
            }
        }
        "lookup" => {
            let ms = payload.get("ms").and_then(|v| v.as_i64());
            if let (Some(ms), Some(token)) = (ms, token.filter(|t| !t.is_empty())) {
                if ms >= 0 {
                    telemetry.bump_item_cached(
                        cache,
                        &format!("lexeme:{token}"),
                        "lexeme",
                        token,
                        &[("lookup_count", 1), ("lookup_ms_total", ms)],
                    )?;
                }
            }
        }
        "repair_move" => {
            if let Some(mv) = payload.get("move").and_then(|v| v.as_str()).filter(|m| !m.is_empty())
            {
                telemetry.bump_item_cached(cache, &format!("repair:{mv}"), "repair", mv, &[("used", 1)])?;
            }
        }
        "words_known" => {
            for token in string_array(payload.get("tokens")) {
                telemetry.bump_item_cached(
                    cache,
                    &format!("lexeme:{token}"),
                    "lexeme",
                    &token,
                    &[("user_understood", 1)],
                )?;
            }
        }
        "sentence_translated" => {
            for token in string_array(payload.get("tokens")) {
                telemetry.bump_item_cached(
                    cache,
                    &format!("lexeme:{token}"),
                    "lexeme",
                    &token,
                    &[("dont_know", 1)],
                )?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn string_array(value: Option<&serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Bumps `missed_target` for every item a turn failed to use, rescheduled
/// by the planner.
pub fn apply_missed_targets(
    telemetry: &ConversationTelemetryStore,
    cache: &mut MasteryCache,
    missed_item_ids: &[String],
) -> Result<()> {
    for item_id in missed_item_ids {
        let (kind, value) = if let Some(v) = item_id.strip_prefix("lexeme:") {
            ("lexeme", v.to_string())
        } else if item_id.starts_with("gram:") {
            ("grammar", item_id.clone())
        } else if item_id.starts_with("colloc:") {
            ("collocation", item_id.clone())
        } else if let Some(v) = item_id.strip_prefix("repair:") {
            ("repair", v.to_string())
        } else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        telemetry.bump_item_cached(cache, item_id, kind, &value, &[("missed_target", 1)])?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn store() -> ConversationTelemetryStore {
        ConversationTelemetryStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn record_event_bumps_dont_know() {
        let store = store();
        let mut cache = MasteryCache::new();
        let payload = serde_json::json!({"type": "dont_know", "token": "의자"});
        record_event_from_payload(&store, &mut cache, 1, 1, &payload).unwrap();
        assert_eq!(cache["lexeme:의자"]["dont_know"], 1);
    }

    #[test]
    fn record_event_bumps_lookup_with_ms() {
        let store = store();
        let mut cache = MasteryCache::new();
        let payload = serde_json::json!({"type": "lookup", "token": "의자", "ms": 1200});
        record_event_from_payload(&store, &mut cache, 1, 1, &payload).unwrap();
        assert_eq!(cache["lexeme:의자"]["lookup_count"], 1);
        assert_eq!(cache["lexeme:의자"]["lookup_ms_total"], 1200);
    }

    #[test]
    fn record_event_rejects_missing_type() {
        let store = store();
        let mut cache = MasteryCache::new();
        let payload = serde_json::json!({"token": "의자"});
        assert!(record_event_from_payload(&store, &mut cache, 1, 1, &payload).is_err());
    }

    #[test]
    fn apply_missed_targets_routes_by_kind() {
        let store = store();
        let mut cache = MasteryCache::new();
        apply_missed_targets(
            &store,
            &mut cache,
            &["lexeme:의자".to_string(), "repair:retry".to_string()],
        )
        .unwrap();
        assert_eq!(cache["lexeme:의자"]["missed_target"], 1);
        assert_eq!(cache["repair:retry"]["missed_target"], 1);
    }
}
