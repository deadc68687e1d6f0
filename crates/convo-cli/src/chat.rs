use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use convo_core::types::{Confidence, UserInput};
use convo_core::ConvoSettings;
use convo_gateway::Provider;
use convo_session::ConvoSession;
use tracing::warn;

/// Runs the learner side of the loop on stdin/stdout: one line of input
/// per turn, `:end` to close the session and print the wrap, `:lookup
/// <word>` / `:dontknow <word>` to log an out-of-band event without
/// spending a turn. Reads until EOF so it can be scripted from a file.
pub async fn run(
    snapshot: convo_core::DeckSnapshot,
    telemetry: Arc<convo_telemetry::ConversationTelemetryStore>,
    provider: Arc<dyn Provider>,
    settings: ConvoSettings,
) -> Result<()> {
    let mut session = ConvoSession::start(snapshot, telemetry, provider, settings)?;
    println!("convo-cli — type Korean, `:end` to finish, `:lookup <word>`/`:dontknow <word>` to log an event.");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line == ":end" {
            break;
        }

        if let Some(word) = line.strip_prefix(":lookup ") {
            if let Err(e) = session.record_event(&serde_json::json!({"type": "lookup", "token": word})) {
                warn!(error = %e, "failed to record lookup event");
            }
            continue;
        }

        if let Some(word) = line.strip_prefix(":dontknow ") {
            if let Err(e) = session.record_event(&serde_json::json!({"type": "dont_know", "token": word})) {
                warn!(error = %e, "failed to record dont_know event");
            }
            continue;
        }

        let user_input = UserInput { text_ko: line.to_string(), confidence: Some(Confidence::Confident) };
        match session.run_turn(user_input).await {
            Ok(outcome) => print_turn(&outcome),
            Err(e) => eprintln!("turn failed: {e}"),
        }
    }

    let (wrap, suggestions) = session.end(5, 5)?;
    print_wrap(&wrap, &suggestions);
    Ok(())
}

fn print_turn(outcome: &convo_session::TurnOutcome) {
    println!("< {}", outcome.response.assistant_reply_ko);
    if let Some(suggestion) = &outcome.response.suggested_user_reply_ko {
        println!("  (try: {suggestion})");
    }
    if !outcome.missed_targets.is_empty() {
        println!("  missed targets: {}", outcome.missed_targets.join(", "));
    }
    io::stdout().flush().ok();
}

fn print_wrap(wrap: &convo_planner::SessionWrap, suggestions: &[convo_planner::SuggestedCard]) {
    println!("\n--- session wrap ---");
    println!("strengths: {}", wrap.strengths.join(", "));
    println!(
        "reinforce: {}",
        wrap.reinforce.iter().map(|e| e.lexeme.as_str()).collect::<Vec<_>>().join(", ")
    );
    if !suggestions.is_empty() {
        println!("suggested cards:");
        for card in suggestions {
            match &card.back {
                Some(back) => println!("  {} — {}", card.front, back),
                None => println!("  {}", card.front),
            }
        }
    }
}
