use std::collections::{HashMap, HashSet};

use convo_core::bands::{classify_item, compute_retrievability, BandThresholds, RetrievabilityBand, FSRS5_DEFAULT_DECAY};
use convo_core::ids::ItemId;
use convo_core::snapshot::{DeckSnapshot, SnapshotItem};
use convo_core::tokenize::tokenize;
use convo_core::types::{
    ConversationState, ForbiddenConstraints, GenerationInstructions, LanguageConstraints,
    MustTarget, NewWordStage, NewWordState, PlannerState, TargetType, UserInput,
};

use tracing::debug;

use crate::grammar::{collocation_target_for, grammar_patterns_for};

/// Tunable knobs the planner consults each turn. Distinct from
/// [`convo_core::config::ConvoSettings`] — this is the planner's own view,
/// assembled by the caller (typically the session orchestrator) from the
/// global settings plus session-scoped overrides.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub must_target_count: usize,
    pub allowed_support_count: usize,
    pub reuse_delay_turns: u64,
    pub max_patterns: usize,
    pub force_new_word_every_n_turns: u32,
    pub allow_new_words: bool,
    pub max_new_words_per_session: u32,
    pub treat_unseen_deck_words_as_support: bool,
    pub band_thresholds: BandThresholds,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            must_target_count: 3,
            allowed_support_count: 60,
            reuse_delay_turns: 3,
            max_patterns: 2,
            force_new_word_every_n_turns: 5,
            allow_new_words: true,
            max_new_words_per_session: 3,
            treat_unseen_deck_words_as_support: false,
            band_thresholds: BandThresholds::default(),
        }
    }
}

fn rustiness(stability: Option<f64>) -> f64 {
    match stability {
        Some(s) => 1.0 / (1.0 + s.max(0.0)),
        None => 0.0,
    }
}

/// Review-queue card (queue==2) with a positive interval, scaled by how
/// many intervals overdue it is, capped at 2.
fn overdue_score(item: &SnapshotItem, today: Option<i64>) -> f64 {
    let (Some(today), Some(due), Some(ivl)) = (today, item.due, item.ivl) else {
        return 0.0;
    };
    if item.card_queue != Some(2) || ivl <= 0 {
        return 0.0;
    }
    let overdue_days = (today - due).max(0) as f64;
    (overdue_days / ivl as f64).min(2.0) * 0.2
}

fn candidate_score(item: &SnapshotItem, today: Option<i64>, mastery: &HashMap<String, i64>) -> f64 {
    let dont_know = mastery.get("dont_know").copied().unwrap_or(0) as f64;
    let practice_again = mastery.get("practice_again").copied().unwrap_or(0) as f64;
    let missed_target = mastery.get("missed_target").copied().unwrap_or(0) as f64;
    let lookup_count = mastery.get("lookup_count").copied().unwrap_or(0) as f64;
    let lookup_ms_total = mastery.get("lookup_ms_total").copied().unwrap_or(0) as f64;
    let avg_lookup_ms = if lookup_count > 0.0 {
        lookup_ms_total / lookup_count
    } else {
        0.0
    };
    let difficulty = item.difficulty.unwrap_or(0.0);

    rustiness(item.stability)
        + overdue_score(item, today)
        + 0.5 * dont_know
        + 0.25 * practice_again
        + 0.2 * missed_target
        + 0.1 * (difficulty / 10.0).min(1.0)
        + 0.05 * lookup_count.min(2.0)
        + 0.05 * (avg_lookup_ms / 1500.0).min(2.0)
}

fn retrievability_for(item: &SnapshotItem, today: Option<i64>) -> f64 {
    let stability = match item.stability {
        Some(s) => s,
        None => return -1.0, // sentinel: no usable FSRS data
    };
    let elapsed = match (today, item.last_review_date) {
        (Some(today), Some(last)) => (today - last).max(0) as f64,
        _ => 0.0,
    };
    let decay = item.decay.unwrap_or(FSRS5_DEFAULT_DECAY);
    compute_retrievability(stability, elapsed, decay)
}

fn band_for(
    item: &SnapshotItem,
    today: Option<i64>,
    mastery: &HashMap<String, i64>,
    config: &PlannerConfig,
) -> RetrievabilityBand {
    if item.stability.is_none() {
        return if config.treat_unseen_deck_words_as_support {
            RetrievabilityBand::Support
        } else {
            RetrievabilityBand::Stretch
        };
    }
    let r = retrievability_for(item, today);
    classify_item(r, mastery, config.band_thresholds)
}

fn empty_mastery() -> &'static HashMap<String, i64> {
    static EMPTY: std::sync::OnceLock<HashMap<String, i64>> = std::sync::OnceLock::new();
    EMPTY.get_or_init(HashMap::new)
}

fn mastery_for<'a>(mastery: &'a HashMap<String, HashMap<String, i64>>, item_id: &ItemId) -> &'a HashMap<String, i64> {
    mastery.get(item_id.as_str()).unwrap_or_else(|| empty_mastery())
}

/// Deterministic, pure apart from incrementing `state.turn_index`.
pub fn plan_turn(
    state: &mut PlannerState,
    snapshot: &DeckSnapshot,
    user_input: &UserInput,
    mastery: &HashMap<String, HashMap<String, i64>>,
    config: &PlannerConfig,
) -> (ConversationState, LanguageConstraints, GenerationInstructions) {
    state.turn_index += 1;
    let turn_index = state.turn_index;

    // 1) classify every item into a band.
    let bands: HashMap<&str, RetrievabilityBand> = snapshot
        .items
        .iter()
        .map(|item| {
            let m = mastery_for(mastery, &item.item_id);
            (item.item_id.as_str(), band_for(item, snapshot.today, m, config))
        })
        .collect();

    // 2) candidate list: band != Cold, sorted by -score then lexeme. Items
    // already scheduled for a future reuse turn sit out of the general pool
    // until they come due — they reappear through the due-item path (4a)
    // instead, so the same word isn't offered again before its interval.
    let mut candidates: Vec<&SnapshotItem> = snapshot
        .items
        .iter()
        .filter(|item| bands.get(item.item_id.as_str()) != Some(&RetrievabilityBand::Cold))
        .filter(|item| {
            state
                .scheduled_reuse
                .get(item.item_id.as_str())
                .map(|due_turn| *due_turn <= turn_index)
                .unwrap_or(true)
        })
        .collect();
    candidates.sort_by(|a, b| {
        let sa = candidate_score(a, snapshot.today, mastery_for(mastery, &a.item_id));
        let sb = candidate_score(b, snapshot.today, mastery_for(mastery, &b.item_id));
        sb.partial_cmp(&sa)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.lexeme.cmp(&b.lexeme))
    });

    let lexeme_of_item: HashMap<&str, &str> = snapshot
        .items
        .iter()
        .map(|i| (i.item_id.as_str(), i.lexeme.as_str()))
        .collect();

    // 3) reserved new-word slot.
    let active_new_word = state.active_new_word().cloned();
    let reserved = if active_new_word.is_some() && config.allow_new_words {
        1
    } else {
        0
    };
    let must_target_budget = config.must_target_count.saturating_sub(reserved);

    let mut must_targets: Vec<MustTarget> = Vec::new();
    let mut used_lexemes: HashSet<String> = HashSet::new();

    // 4a) due items.
    let mut due_ids: Vec<String> = state
        .scheduled_reuse
        .iter()
        .filter(|(_, due_turn)| **due_turn <= turn_index)
        .map(|(id, _)| id.clone())
        .collect();
    due_ids.sort();
    for id in &due_ids {
        if must_targets.len() >= must_target_budget {
            break;
        }
        let Some(lexeme) = lexeme_of_item.get(id.as_str()) else {
            continue;
        };
        if used_lexemes.contains(*lexeme) {
            continue;
        }
        must_targets.push(MustTarget::vocab(ItemId::parse(id.clone()).unwrap(), lexeme, 1.0));
        used_lexemes.insert(lexeme.to_string());
    }

    // 4b) STRETCH band by candidate order.
    if must_targets.len() < must_target_budget {
        for item in &candidates {
            if must_targets.len() >= must_target_budget {
                break;
            }
            if bands.get(item.item_id.as_str()) != Some(&RetrievabilityBand::Stretch) {
                continue;
            }
            if used_lexemes.contains(&item.lexeme) {
                continue;
            }
            must_targets.push(MustTarget::vocab(item.item_id.clone(), &item.lexeme, 1.0));
            used_lexemes.insert(item.lexeme.clone());
        }
    }

    // 4c) at most one FRAGILE, scaffolding required.
    if must_targets.len() < must_target_budget {
        if let Some(item) = candidates.iter().find(|item| {
            bands.get(item.item_id.as_str()) == Some(&RetrievabilityBand::Fragile)
                && !used_lexemes.contains(&item.lexeme)
        }) {
            let mut target = MustTarget::vocab(item.item_id.clone(), &item.lexeme, 1.0);
            target.scaffolding_required = true;
            used_lexemes.insert(item.lexeme.clone());
            must_targets.push(target);
        }
    }

    // 4d) SUPPORT fallback if still empty.
    if must_targets.is_empty() {
        if let Some(item) = candidates.iter().find(|item| {
            bands.get(item.item_id.as_str()) == Some(&RetrievabilityBand::Support)
                && !used_lexemes.contains(&item.lexeme)
        }) {
            used_lexemes.insert(item.lexeme.clone());
            must_targets.push(MustTarget::vocab(item.item_id.clone(), &item.lexeme, 1.0));
        }
    }

    // 5) active new-word target.
    if let Some(nw) = &active_new_word {
        let mut target = MustTarget::vocab(ItemId::lexeme(&nw.lexeme), &nw.lexeme, 1.0);
        target.target_type = TargetType::NewWord;
        target.exposure_stage = Some(nw.current_stage as u8);
        target.gloss = nw.gloss.clone();
        used_lexemes.insert(nw.lexeme.clone());
        must_targets.push(target);
    }

    // 6) collocation target (cap 1).
    let target_lexemes: Vec<&str> = must_targets.iter().flat_map(|t| t.surface_forms.iter().map(String::as_str)).collect();
    if let Some(colloc) = collocation_target_for(&target_lexemes) {
        must_targets.push(MustTarget {
            id: ItemId::parse(colloc.id).expect("static collocation ids are well-formed"),
            target_type: TargetType::Collocation,
            surface_forms: colloc.surface_forms.iter().map(|s| s.to_string()).collect(),
            priority: 1.0,
            scaffolding_required: false,
            exposure_stage: None,
            gloss: None,
        });
    }

    // 7) pools.
    let target_lexeme_set: HashSet<&str> = must_targets
        .iter()
        .flat_map(|t| t.surface_forms.iter().map(String::as_str))
        .collect();
    let allowed_stretch: Vec<String> = candidates
        .iter()
        .filter(|item| bands.get(item.item_id.as_str()) == Some(&RetrievabilityBand::Stretch))
        .filter(|item| !target_lexeme_set.contains(item.lexeme.as_str()))
        .map(|item| item.lexeme.clone())
        .take(20)
        .collect();
    let allowed_support: Vec<String> = candidates
        .iter()
        .filter(|item| bands.get(item.item_id.as_str()) == Some(&RetrievabilityBand::Support))
        .filter(|item| !target_lexeme_set.contains(item.lexeme.as_str()))
        .map(|item| item.lexeme.clone())
        .take(config.allowed_support_count)
        .collect();
    let mut reinforced_words: Vec<String> = state
        .new_word_states
        .values()
        .filter(|s| s.current_stage.is_graduated())
        .map(|s| s.lexeme.clone())
        .collect();
    reinforced_words.sort();
    reinforced_words.dedup();

    // 8) grammar patterns.
    let allowed_grammar = grammar_patterns_for(&target_lexemes, config.max_patterns);

    // 9) new-word cadence.
    let session_budget_remaining =
        (state.new_word_states.len() as u32) < config.max_new_words_per_session;
    let allow_new_vocab =
        config.allow_new_words && active_new_word.is_none() && session_budget_remaining;
    let cadence = config.force_new_word_every_n_turns;
    let require_new_vocab =
        allow_new_vocab && state.turns_since_new_word >= cadence.saturating_sub(1);

    if require_new_vocab {
        debug!(turn_index, "planner requiring a new word this turn");
    }

    let forbidden = ForbiddenConstraints {
        introduce_new_vocab: !require_new_vocab,
        sentence_length_max: 20,
    };

    let constraints = LanguageConstraints {
        must_target: must_targets.clone(),
        allowed_support,
        allowed_stretch,
        reinforced_words,
        allowed_grammar,
        forbidden,
        require_new_vocab,
    };

    let instructions = GenerationInstructions::default();

    let conv_state = ConversationState {
        summary: state.conversation_summary.clone(),
        last_assistant_turn_ko: state.last_assistant_turn_ko.clone(),
        last_user_turn_ko: user_input.text_ko.clone(),
        last_suggested_user_reply_ko: state.last_suggested_user_reply_ko.clone(),
    };

    state.last_user_turn_ko = user_input.text_ko.clone();
    state.last_must_target_ids = must_targets.iter().map(|t| t.id.as_str().to_string()).collect();
    state.last_debug_vocab = target_lexeme_set.iter().map(|s| s.to_string()).collect();

    // 10) schedule reuse, skipping new_word targets (pipeline-driven).
    for target in &must_targets {
        if target.target_type == TargetType::NewWord {
            continue;
        }
        state
            .scheduled_reuse
            .insert(target.id.as_str().to_string(), turn_index + config.reuse_delay_turns);
    }

    (conv_state, constraints, instructions)
}

/// Tokenizes both sides and determines, for each must-target, whether it
/// was used. Missed targets are rescheduled to `turn_index+1` (preserving
/// an earlier schedule if one already existed) and returned. Advances the
/// new-word pipeline on assistant usage.
pub fn observe_turn(
    state: &mut PlannerState,
    constraints: &LanguageConstraints,
    user_input: &UserInput,
    assistant_reply_ko: &str,
) -> Vec<String> {
    let user_tokens: HashSet<String> = tokenize(&user_input.text_ko).into_iter().collect();
    let assistant_tokens: HashSet<String> = tokenize(assistant_reply_ko).into_iter().collect();

    let mut missed = Vec::new();
    let mut pipeline_used = false;

    for target in &constraints.must_target {
        let used = if target.target_type == TargetType::Collocation {
            target
                .surface_forms
                .iter()
                .all(|sf| user_tokens.contains(sf) || assistant_tokens.contains(sf))
        } else {
            target
                .surface_forms
                .iter()
                .any(|sf| user_tokens.contains(sf) || assistant_tokens.contains(sf))
        };

        if !used {
            let candidate = state.turn_index + 1;
            let entry = state.scheduled_reuse.entry(target.id.as_str().to_string()).or_insert(candidate);
            *entry = (*entry).min(candidate);
            missed.push(target.id.as_str().to_string());
        }

        if target.target_type == TargetType::NewWord {
            if let Some(nw) = state.new_word_states.get_mut(&target.surface_forms[0]) {
                let used_by_assistant = assistant_tokens.contains(&nw.lexeme);
                if used_by_assistant
                    && nw.last_seen_turn != Some(state.turn_index)
                    && nw.introduced_turn != state.turn_index
                {
                    nw.exposure_count += 1;
                    nw.last_seen_turn = Some(state.turn_index);
                    nw.current_stage = NewWordStage::from_exposure_count(nw.exposure_count);
                    pipeline_used = true;
                }
            }
        }
    }

    if pipeline_used {
        state.turns_since_new_word = 0;
    } else {
        state.turns_since_new_word += 1;
    }

    if !missed.is_empty() {
        debug!(turn_index = state.turn_index, missed = ?missed, "must-targets missed, rescheduling");
    }

    missed
}

/// Starts tracking a brand-new word once the gateway confirms the
/// assistant actually introduced one (see the rewrite loop's
/// `missing_new_word` handling).
pub fn introduce_new_word(state: &mut PlannerState, lexeme: &str, gloss: Option<String>) {
    let turn_index = state.turn_index;
    state.new_word_states.entry(lexeme.to_string()).or_insert_with(|| {
        debug!(turn_index, lexeme, "new word entering the pipeline");
        NewWordState::new(lexeme, gloss, turn_index)
    });
}
