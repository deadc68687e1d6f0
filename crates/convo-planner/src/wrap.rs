use std::collections::HashMap;

use convo_core::snapshot::DeckSnapshot;
use convo_core::types::NewWordState;
use serde::{Deserialize, Serialize};

fn rustiness(stability: Option<f64>) -> f64 {
    match stability {
        Some(s) => 1.0 / (1.0 + s.max(0.0)),
        None => 0.0,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReinforceEntry {
    pub lexeme: String,
    pub weakness_score: f64,
}

/// A card the wrap suggests adding/refreshing — no persistence opinion of
/// its own, the caller decides what to do with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestedCard {
    pub front: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub back: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionWrap {
    pub strengths: Vec<String>,
    pub reinforce: Vec<ReinforceEntry>,
    pub reinforced_words: Vec<SuggestedCard>,
}

fn counter(mastery: &HashMap<String, i64>, key: &str) -> i64 {
    mastery.get(key).copied().unwrap_or(0)
}

/// Deterministic end-of-session summary from the snapshot, the
/// session's mastery counters, and the new-word pipeline state.
pub fn compute_session_wrap(
    snapshot: &DeckSnapshot,
    mastery: &HashMap<String, HashMap<String, i64>>,
    new_word_states: &HashMap<String, NewWordState>,
    strengths_n: usize,
    reinforce_n: usize,
) -> SessionWrap {
    let mut strength_candidates: Vec<(&str, i64, i64)> = Vec::new();
    let mut reinforce_candidates: Vec<ReinforceEntry> = Vec::new();

    for item in &snapshot.items {
        let m = mastery
            .get(item.item_id.as_str())
            .cloned()
            .unwrap_or_default();
        let user_used = counter(&m, "user_used");
        let dont_know = counter(&m, "dont_know");
        let practice_again = counter(&m, "practice_again");
        let mark_confusing = counter(&m, "mark_confusing");
        let used_guessing = counter(&m, "used_guessing");
        let lookup_count = counter(&m, "lookup_count");
        let lookup_ms_total = counter(&m, "lookup_ms_total");
        let avg_lookup_ms = if lookup_count > 0 {
            lookup_ms_total as f64 / lookup_count as f64
        } else {
            0.0
        };

        strength_candidates.push((item.lexeme.as_str(), user_used, dont_know));

        let weakness_score = 2.0 * practice_again as f64
            + 1.5 * dont_know as f64
            + mark_confusing as f64
            + used_guessing as f64
            + 0.5 * (avg_lookup_ms / 1000.0).min(2.0)
            + 0.5 * rustiness(item.stability);
        reinforce_candidates.push(ReinforceEntry {
            lexeme: item.lexeme.clone(),
            weakness_score,
        });
    }

    strength_candidates.sort_by(|a, b| {
        b.1.cmp(&a.1) // user_used desc
            .then_with(|| a.2.cmp(&b.2)) // dont_know asc (== -dont_know desc)
            .then_with(|| a.0.cmp(b.0))
    });
    let strengths: Vec<String> = strength_candidates
        .into_iter()
        .take(strengths_n)
        .map(|(lexeme, _, _)| lexeme.to_string())
        .collect();

    reinforce_candidates.sort_by(|a, b| {
        b.weakness_score
            .partial_cmp(&a.weakness_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lexeme.cmp(&b.lexeme))
    });
    reinforce_candidates.truncate(reinforce_n);

    let gloss_of: HashMap<&str, Option<&str>> = snapshot
        .items
        .iter()
        .map(|i| (i.lexeme.as_str(), i.gloss.as_deref()))
        .collect();

    let mut reinforced_words: Vec<SuggestedCard> = new_word_states
        .values()
        .filter(|s| s.current_stage.is_graduated())
        .map(|s| SuggestedCard {
            front: s.lexeme.clone(),
            back: s
                .gloss
                .clone()
                .or_else(|| gloss_of.get(s.lexeme.as_str()).and_then(|g| *g).map(str::to_string)),
            tags: vec!["conv_reinforced".to_string()],
        })
        .collect();
    reinforced_words.sort_by(|a, b| a.front.cmp(&b.front));

    SessionWrap {
        strengths,
        reinforce: reinforce_candidates,
        reinforced_words,
    }
}

/// Converts the reinforcement list into candidate cards, carrying over
/// the deck gloss where the snapshot has one. Supplements the distilled
/// wrap with the source's card-suggestion conversion — the wrap itself
/// only ranks lexemes, this turns a ranking into something a caller can
/// act on.
pub fn suggestions_from_wrap(wrap: &SessionWrap, snapshot: &DeckSnapshot) -> Vec<SuggestedCard> {
    let gloss_of: HashMap<&str, Option<&str>> = snapshot
        .items
        .iter()
        .map(|i| (i.lexeme.as_str(), i.gloss.as_deref()))
        .collect();

    wrap.reinforce
        .iter()
        .map(|entry| SuggestedCard {
            front: entry.lexeme.clone(),
            back: gloss_of
                .get(entry.lexeme.as_str())
                .and_then(|g| *g)
                .map(str::to_string),
            tags: vec!["conv_suggested".to_string()],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::snapshot::SnapshotItem;
    use convo_core::types::NewWordStage;
    use convo_core::ItemId;

    fn item(lexeme: &str, gloss: Option<&str>, stability: Option<f64>) -> SnapshotItem {
        SnapshotItem {
            item_id: ItemId::lexeme(lexeme),
            lexeme: lexeme.to_string(),
            source_note_id: 1,
            source_card_id: 1,
            gloss: gloss.map(str::to_string),
            stability,
            difficulty: None,
            decay: None,
            last_review_date: None,
            card_type: None,
            card_queue: None,
            due: None,
            ivl: None,
            reps: None,
            lapses: None,
        }
    }

    #[test]
    fn strengths_rank_by_user_used_then_dont_know() {
        let snapshot = DeckSnapshot {
            deck_ids: vec![1],
            items: vec![item("A", None, None), item("B", None, None)],
            today: None,
        };
        let mut mastery = HashMap::new();
        mastery.insert("lexeme:A".to_string(), HashMap::from([("user_used".to_string(), 3)]));
        mastery.insert("lexeme:B".to_string(), HashMap::from([("user_used".to_string(), 1)]));
        let wrap = compute_session_wrap(&snapshot, &mastery, &HashMap::new(), 5, 5);
        assert_eq!(wrap.strengths, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn reinforce_ranks_by_weakness_score() {
        let snapshot = DeckSnapshot {
            deck_ids: vec![1],
            items: vec![item("A", None, Some(1.0)), item("B", None, Some(1.0))],
            today: None,
        };
        let mut mastery = HashMap::new();
        mastery.insert("lexeme:A".to_string(), HashMap::from([("dont_know".to_string(), 3)]));
        let wrap = compute_session_wrap(&snapshot, &mastery, &HashMap::new(), 5, 1);
        assert_eq!(wrap.reinforce.len(), 1);
        assert_eq!(wrap.reinforce[0].lexeme, "A");
    }

    #[test]
    fn graduated_new_words_become_reinforced_cards() {
        let snapshot = DeckSnapshot { deck_ids: vec![1], items: vec![], today: None };
        let mut states = HashMap::new();
        let mut nw = NewWordState::new("강아지", Some("puppy".to_string()), 1);
        nw.current_stage = NewWordStage::Graduated;
        states.insert("강아지".to_string(), nw);
        let wrap = compute_session_wrap(&snapshot, &HashMap::new(), &states, 5, 5);
        assert_eq!(wrap.reinforced_words.len(), 1);
        assert_eq!(wrap.reinforced_words[0].front, "강아지");
        assert_eq!(wrap.reinforced_words[0].back.as_deref(), Some("puppy"));
        assert_eq!(wrap.reinforced_words[0].tags, vec!["conv_reinforced".to_string()]);
    }

    #[test]
    fn suggestions_from_wrap_carries_deck_gloss() {
        let snapshot = DeckSnapshot {
            deck_ids: vec![1],
            items: vec![item("A", Some("gloss-a"), Some(1.0))],
            today: None,
        };
        let mut mastery = HashMap::new();
        mastery.insert("lexeme:A".to_string(), HashMap::from([("dont_know".to_string(), 2)]));
        let wrap = compute_session_wrap(&snapshot, &mastery, &HashMap::new(), 5, 5);
        let suggestions = suggestions_from_wrap(&wrap, &snapshot);
        assert_eq!(suggestions[0].back.as_deref(), Some("gloss-a"));
    }
}
