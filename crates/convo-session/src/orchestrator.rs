use std::collections::HashSet;
use std::sync::Arc;

use convo_core::snapshot::DeckSnapshot;
use convo_core::types::{ConversationRequest, ConversationResponse, LanguageConstraints, PlannerState, UserInput};
use convo_core::ConvoSettings;
use convo_gateway::{run_rewrite_loop, Provider, RetryPolicy};
use convo_planner::{
    compute_session_wrap, introduce_new_word, observe_turn, plan_turn, suggestions_from_wrap, PlannerConfig,
    SessionWrap, SuggestedCard,
};
use convo_telemetry::events::{apply_missed_targets, bump_assistant_used_lexemes, bump_user_used_lexemes, record_event_from_payload};
use convo_telemetry::{ConversationTelemetryStore, MasteryCache};
use tracing::{debug, instrument};

use crate::error::Result;

const SYSTEM_ROLE: &str = "You are a Korean conversation partner for a vocabulary-focused learner. \
Follow the language constraints exactly; never introduce vocabulary outside the allowed envelope unless it is explicitly invited.";

/// What a single turn produced: the parsed response plus the must-targets
/// it failed to use (the planner has already rescheduled those).
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub response: ConversationResponse,
    pub missed_targets: Vec<String>,
}

/// Ties the planner, gateway, and telemetry store together for one
/// learner session — the per-turn sequencing from spec's data-flow
/// diagram: `UserInput → Planner → Gateway → Provider → Telemetry →
/// Planner.observe_turn`.
///
/// Owned by exactly one caller; `run_turn` is not reentrant (mirrors
/// the "single-session-single-inflight" concurrency model — enforcement
/// of that lives one layer up, in [`crate::job_manager::AsyncJobManager`]).
pub struct ConvoSession {
    session_id: i64,
    snapshot: DeckSnapshot,
    lexeme_set: HashSet<String>,
    state: PlannerState,
    planner_config: PlannerConfig,
    mastery: MasteryCache,
    telemetry: Arc<ConversationTelemetryStore>,
    provider: Arc<dyn Provider>,
    retry_policy: RetryPolicy,
    max_rewrites: u32,
    settings: ConvoSettings,
}

impl ConvoSession {
    /// Opens a telemetry session row, loads the mastery cache for every
    /// item in the snapshot, and starts fresh planner state.
    pub fn start(
        snapshot: DeckSnapshot,
        telemetry: Arc<ConversationTelemetryStore>,
        provider: Arc<dyn Provider>,
        settings: ConvoSettings,
    ) -> Result<Self> {
        let session_id = telemetry.start_session(&snapshot.deck_ids)?;
        let lexeme_set: HashSet<String> = snapshot.items.iter().map(|i| i.lexeme.clone()).collect();
        let item_ids: Vec<String> = snapshot.items.iter().map(|i| i.item_id.as_str().to_string()).collect();
        let mastery = telemetry.load_mastery_cache(&item_ids)?;

        let planner_config = PlannerConfig {
            allow_new_words: settings.allow_new_words,
            max_new_words_per_session: settings.max_new_words_per_session,
            force_new_word_every_n_turns: settings.force_new_word_every_n_turns,
            treat_unseen_deck_words_as_support: settings.treat_unseen_deck_words_as_support,
            band_thresholds: settings.band_thresholds,
            ..PlannerConfig::default()
        };

        Ok(Self {
            session_id,
            snapshot,
            lexeme_set,
            state: PlannerState::new(""),
            planner_config,
            mastery,
            telemetry,
            provider,
            retry_policy: RetryPolicy::default(),
            max_rewrites: settings.max_rewrites,
            settings,
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn turn_index(&self) -> u64 {
        self.state.turn_index
    }

    /// The last suggested reply offered to the learner, if any — used by
    /// the job manager's `plan_reply` handler to preview a reply without
    /// issuing a new LLM call.
    pub fn last_suggested_user_reply(&self) -> Option<String> {
        self.state.last_suggested_user_reply_ko.clone()
    }

    /// Runs one turn end to end: plan the envelope, drive the gateway's
    /// rewrite loop, bump telemetry counters, and let the planner observe
    /// the outcome.
    #[instrument(skip(self, user_input), fields(session_id = self.session_id))]
    pub async fn run_turn(&mut self, user_input: UserInput) -> Result<TurnOutcome> {
        let (conv_state, constraints, mut instructions) =
            plan_turn(&mut self.state, &self.snapshot, &user_input, &self.mastery, &self.planner_config);

        instructions.safe_mode = self.settings.safe_mode;
        instructions.lexical_similarity_max = self.settings.lexical_similarity_max;
        instructions.semantic_similarity_max = self.settings.semantic_similarity_max;

        let request = ConversationRequest {
            system_role: SYSTEM_ROLE.to_string(),
            conversation_state: conv_state,
            user_input: user_input.clone(),
            language_constraints: constraints.clone(),
            generation_instructions: instructions,
        };

        let response = run_rewrite_loop(self.provider.as_ref(), &request, self.max_rewrites, &self.retry_policy).await?;

        bump_user_used_lexemes(&self.telemetry, &mut self.mastery, &self.lexeme_set, &user_input)?;
        bump_assistant_used_lexemes(&self.telemetry, &mut self.mastery, &self.lexeme_set, &response)?;

        let missed = observe_turn(&mut self.state, &constraints, &user_input, &response.assistant_reply_ko);
        apply_missed_targets(&self.telemetry, &mut self.mastery, &missed)?;

        self.register_new_word_if_introduced(&constraints, &response);

        self.state.last_assistant_turn_ko = response.assistant_reply_ko.clone();
        self.state.last_suggested_user_reply_ko = response.suggested_user_reply_ko.clone();

        let payload = serde_json::json!({
            "type": "turn",
            "assistant_reply_ko": response.assistant_reply_ko,
            "targets_used": response.targets_used,
            "unexpected_tokens": response.unexpected_tokens,
            "missed_targets": missed,
        });
        self.telemetry
            .log_event(self.session_id, self.state.turn_index as i64, "turn", &payload.to_string())?;

        debug!(turn_index = self.state.turn_index, missed = missed.len(), "turn complete");

        Ok(TurnOutcome { response, missed_targets: missed })
    }

    /// The gateway only reports *that* a single unexpected token slipped
    /// in under `require_new_vocab` (§4.5's `missing_new_word` handling);
    /// registering it with the planner's new-word pipeline is the
    /// orchestrator's call.
    fn register_new_word_if_introduced(&mut self, constraints: &LanguageConstraints, response: &ConversationResponse) {
        if !constraints.require_new_vocab || self.state.active_new_word().is_some() {
            return;
        }
        if response.unexpected_tokens.len() != 1 {
            return;
        }
        let lexeme = &response.unexpected_tokens[0];
        let gloss = response.word_glosses.get(lexeme).map(str::to_string);
        introduce_new_word(&mut self.state, lexeme, gloss);
    }

    /// Records an out-of-band event (lookup, dont_know, repair move, …)
    /// outside the turn loop — see §4.6's `record_event_from_payload`.
    pub fn record_event(&mut self, payload: &serde_json::Value) -> Result<()> {
        record_event_from_payload(&self.telemetry, &mut self.mastery, self.session_id, self.state.turn_index as i64, payload)?;
        Ok(())
    }

    /// Computes the end-of-session wrap, persists it as the session
    /// summary, and returns it alongside card suggestions derived from it.
    pub fn end(self, strengths_n: usize, reinforce_n: usize) -> Result<(SessionWrap, Vec<SuggestedCard>)> {
        let wrap = compute_session_wrap(&self.snapshot, &self.mastery, &self.state.new_word_states, strengths_n, reinforce_n);
        let suggestions = suggestions_from_wrap(&wrap, &self.snapshot);
        let summary_json = serde_json::to_string(&wrap).unwrap_or_else(|_| "{}".to_string());
        self.telemetry.end_session(self.session_id, &summary_json)?;
        Ok((wrap, suggestions))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::snapshot::SnapshotItem;
    use convo_core::ItemId;
    use convo_gateway::FakeProvider;
    use rusqlite::Connection;

    fn snapshot() -> DeckSnapshot {
        DeckSnapshot {
            deck_ids: vec![1],
            items: vec![SnapshotItem {
                item_id: ItemId::lexeme("의자"),
                lexeme: "의자".to_string(),
                source_note_id: 1,
                source_card_id: 1,
                gloss: Some("chair".to_string()),
                stability: Some(0.2),
                difficulty: Some(3.0),
                decay: Some(0.5),
                last_review_date: Some(0),
                card_type: Some(2),
                card_queue: Some(2),
                due: Some(0),
                ivl: Some(1),
                reps: Some(1),
                lapses: Some(0),
            }],
            today: Some(10),
        }
    }

    #[tokio::test]
    async fn run_turn_produces_response_and_logs_event() {
        let telemetry = Arc::new(ConversationTelemetryStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let provider: Arc<dyn Provider> = Arc::new(FakeProvider::empty());
        let mut session = ConvoSession::start(snapshot(), telemetry, provider, ConvoSettings::default()).unwrap();

        let outcome = session
            .run_turn(UserInput { text_ko: "안녕".to_string(), confidence: None })
            .await
            .unwrap();

        assert!(outcome.response.assistant_reply_ko.contains("의자"));
        assert_eq!(session.turn_index(), 1);
    }

    #[tokio::test]
    async fn end_computes_wrap_and_persists_summary() {
        let telemetry = Arc::new(ConversationTelemetryStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let provider: Arc<dyn Provider> = Arc::new(FakeProvider::empty());
        let mut session = ConvoSession::start(snapshot(), telemetry, provider, ConvoSettings::default()).unwrap();
        session
            .run_turn(UserInput { text_ko: "의자 있어요".to_string(), confidence: None })
            .await
            .unwrap();

        let (wrap, suggestions) = session.end(5, 5).unwrap();
        assert!(wrap.strengths.contains(&"의자".to_string()));
        let _ = suggestions;
    }
}
