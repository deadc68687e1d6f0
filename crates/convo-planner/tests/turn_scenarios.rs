//! End-to-end planner scenarios, driven only through `convo-planner`'s
//! public API.

use std::collections::HashMap;

use convo_core::snapshot::{DeckSnapshot, SnapshotItem};
use convo_core::types::{PlannerState, UserInput};
use convo_core::ItemId;
use convo_planner::{compute_session_wrap, introduce_new_word, observe_turn, plan_turn, PlannerConfig};

fn snapshot_item(lexeme: &str) -> SnapshotItem {
    SnapshotItem {
        item_id: ItemId::lexeme(lexeme),
        lexeme: lexeme.to_string(),
        source_note_id: 1,
        source_card_id: 1,
        gloss: None,
        stability: None,
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

/// Scenario 4: two otherwise-equal lexemes, one with `dont_know=3` bumped
/// in the mastery map; with `must_target_count=1`, that lexeme wins.
#[test]
fn mastery_weighted_selection_prefers_the_struggling_lexeme() {
    let snapshot = DeckSnapshot {
        deck_ids: vec![1],
        items: vec![snapshot_item("사과"), snapshot_item("바나나")],
        today: None,
    };
    let mut mastery = HashMap::new();
    mastery.insert("lexeme:바나나".to_string(), HashMap::from([("dont_know".to_string(), 3)]));

    let mut state = PlannerState::new("s");
    let config = PlannerConfig {
        must_target_count: 1,
        allow_new_words: false,
        ..Default::default()
    };
    let input = UserInput { text_ko: "안녕".to_string(), confidence: None };

    let (_, constraints, _) = plan_turn(&mut state, &snapshot, &input, &mastery, &config);

    assert_eq!(constraints.must_target.len(), 1);
    assert_eq!(constraints.must_target[0].surface_forms, vec!["바나나".to_string()]);
}

/// Scenario 6: a new word graduates after three exposures and then shows
/// up in the session wrap as a reinforced card.
#[test]
fn new_word_graduates_and_surfaces_in_session_wrap() {
    let mut state = PlannerState::new("s");
    state.turn_index = 1;
    introduce_new_word(&mut state, "강아지", Some("puppy".to_string()));

    let mut constraints = convo_core::types::LanguageConstraints::default();
    let mut target = convo_core::types::MustTarget::vocab(ItemId::lexeme("강아지"), "강아지", 1.0);
    target.target_type = convo_core::types::TargetType::NewWord;
    constraints.must_target.push(target);
    let input = UserInput { text_ko: "".to_string(), confidence: None };

    for turn in 2..=4 {
        state.turn_index = turn;
        observe_turn(&mut state, &constraints, &input, "강아지 좋아요");
    }
    assert!(state.new_word_states["강아지"].current_stage.is_graduated());

    let snapshot = DeckSnapshot { deck_ids: vec![1], items: vec![], today: None };
    let wrap = compute_session_wrap(&snapshot, &HashMap::new(), &state.new_word_states, 5, 5);

    assert!(wrap.reinforced_words.iter().any(|c| c.front == "강아지" && c.back.as_deref() == Some("puppy")));
}
