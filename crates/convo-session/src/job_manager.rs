use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use convo_core::types::UserInput;
use convo_gateway::GatewayError;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SessionError};
use crate::orchestrator::{ConvoSession, TurnOutcome};

/// The request kinds a job can carry — the handler names from spec
/// §4.8 (`turn`, `translate`, `plan_reply`).
#[derive(Debug, Clone)]
pub enum JobKind {
    /// Runs a full turn through the planner/gateway/telemetry pipeline.
    Turn(UserInput),
    /// Thin pass-through translation — a quality translator is explicitly
    /// out of scope; this just hands the text back for the UI to display,
    /// matching the "thin pass-through" Non-goal.
    Translate(String),
    /// Returns the most recently suggested user reply without issuing a
    /// new LLM call, so the UI can preview a reply before the learner
    /// commits to it.
    PlanReply,
}

/// The outcome a job produces once done.
#[derive(Debug, Clone)]
pub enum JobResult {
    Turn(TurnOutcome),
    Translate(String),
    PlanReply(Option<String>),
    Error(String),
}

enum JobState {
    Pending,
    Done(JobResult),
}

struct Inner {
    busy: AtomicBool,
    next_job_id: AtomicU64,
    jobs: Mutex<HashMap<u64, JobState>>,
    pending_events: Mutex<VecDeque<serde_json::Value>>,
    session: Mutex<ConvoSession>,
}

/// Serializes LLM calls from a UI layer that may fire requests faster
/// than one session can process them — spec §4.8/§5's "single in-flight
/// job, FIFO event queue flushed before the next handler" model, built
/// the way the teacher's `PtySession` pairs a shared buffer with an
/// atomic liveness flag, generalized here to a busy flag plus a result map.
pub struct AsyncJobManager {
    inner: Arc<Inner>,
}

impl AsyncJobManager {
    pub fn new(session: ConvoSession) -> Self {
        Self {
            inner: Arc::new(Inner {
                busy: AtomicBool::new(false),
                next_job_id: AtomicU64::new(1),
                jobs: Mutex::new(HashMap::new()),
                pending_events: Mutex::new(VecDeque::new()),
                session: Mutex::new(session),
            }),
        }
    }

    /// Enqueues an out-of-band event (lookup, dont_know, …). If no job is
    /// running it is applied immediately; otherwise it waits in the FIFO
    /// to be flushed before the next handler runs.
    pub async fn submit_event(&self, payload: serde_json::Value) -> Result<()> {
        if self.inner.busy.load(Ordering::Acquire) {
            self.inner.pending_events.lock().await.push_back(payload);
            return Ok(());
        }
        self.inner.session.lock().await.record_event(&payload)
    }

    /// Tries to acquire the busy flag and, on success, spawns the handler
    /// in the background. Returns `Err(SessionError::Busy)` if a job is
    /// already in flight — mirrors the source's `{error:"busy"}` result.
    pub async fn start_job(&self, kind: JobKind) -> Result<u64> {
        if self
            .inner
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::Busy);
        }

        let job_id = self.inner.next_job_id.fetch_add(1, Ordering::Relaxed);
        self.inner.jobs.lock().await.insert(job_id, JobState::Pending);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            // Flush events queued while the previous job ran, before this
            // handler observes the session — never mid-handler.
            let queued: Vec<serde_json::Value> = {
                let mut q = inner.pending_events.lock().await;
                q.drain(..).collect()
            };
            {
                let mut session = inner.session.lock().await;
                for payload in queued {
                    if let Err(e) = session.record_event(&payload) {
                        warn!(error = %e, "failed to flush queued event");
                    }
                }
            }

            let result = run_handler(&inner.session, kind).await;

            // Busy flag is released even when the handler failed — the
            // failure is a structured `JobResult::Error`, never a stuck flag.
            inner.jobs.lock().await.insert(job_id, JobState::Done(result));
            inner.busy.store(false, Ordering::Release);
            debug!(job_id, "job complete, busy flag released");
        });

        Ok(job_id)
    }

    /// Returns `None` while the job is still running. Once done, the
    /// result is returned and the entry removed — a job can only be
    /// polled to completion once.
    pub async fn poll_job(&self, job_id: u64) -> Result<Option<JobResult>> {
        let mut jobs = self.inner.jobs.lock().await;
        match jobs.get(&job_id) {
            None => Err(SessionError::UnknownJob(job_id)),
            Some(JobState::Pending) => Ok(None),
            Some(JobState::Done(_)) => {
                let Some(JobState::Done(result)) = jobs.remove(&job_id) else {
                    unreachable!("checked Done above")
                };
                Ok(Some(result))
            }
        }
    }
}

async fn run_handler(session: &Mutex<ConvoSession>, kind: JobKind) -> JobResult {
    match kind {
        JobKind::Turn(user_input) => {
            let mut session = session.lock().await;
            match session.run_turn(user_input).await {
                Ok(outcome) => JobResult::Turn(outcome),
                Err(e) => JobResult::Error(transport_message(&e)),
            }
        }
        JobKind::Translate(text) => JobResult::Translate(text),
        JobKind::PlanReply => {
            let session = session.lock().await;
            JobResult::PlanReply(session.last_suggested_user_reply())
        }
    }
}

/// Maps transport failures to the structured strings spec §4.8 names;
/// every other error keeps its own display message.
fn transport_message(err: &SessionError) -> String {
    match err {
        SessionError::Gateway(GatewayError::RequestTimedOut) => "request timed out".to_string(),
        SessionError::Gateway(GatewayError::Network(msg)) => format!("network error: {msg}"),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::snapshot::DeckSnapshot;
    use convo_core::ConvoSettings;
    use convo_gateway::{FakeProvider, Provider};
    use convo_telemetry::ConversationTelemetryStore;
    use rusqlite::Connection;
    use std::time::Duration;

    fn empty_snapshot() -> DeckSnapshot {
        DeckSnapshot { deck_ids: vec![1], items: vec![], today: None }
    }

    fn manager() -> AsyncJobManager {
        let telemetry = Arc::new(ConversationTelemetryStore::new(Connection::open_in_memory().unwrap()).unwrap());
        let provider: Arc<dyn Provider> = Arc::new(FakeProvider::empty());
        let session = ConvoSession::start(empty_snapshot(), telemetry, provider, ConvoSettings::default()).unwrap();
        AsyncJobManager::new(session)
    }

    fn turn(text: &str) -> JobKind {
        JobKind::Turn(UserInput { text_ko: text.to_string(), confidence: None })
    }

    async fn await_result(mgr: &AsyncJobManager, job_id: u64) -> JobResult {
        for _ in 0..100 {
            if let Some(result) = mgr.poll_job(job_id).await.unwrap() {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {job_id} never completed");
    }

    #[tokio::test]
    async fn second_job_is_rejected_while_busy() {
        let mgr = manager();
        let first = mgr.start_job(turn("안녕")).await;
        assert!(first.is_ok());
        let second = mgr.start_job(turn("안녕")).await;
        assert!(matches!(second, Err(SessionError::Busy)));
    }

    #[tokio::test]
    async fn poll_job_removes_entry_once_read() {
        let mgr = manager();
        let job_id = mgr.start_job(turn("안녕")).await.unwrap();
        let result = await_result(&mgr, job_id).await;
        assert!(matches!(result, JobResult::Turn(_)));
        assert!(mgr.poll_job(job_id).await.is_err());
    }

    #[tokio::test]
    async fn busy_flag_releases_after_job_completes_allowing_a_new_one() {
        let mgr = manager();
        let first = mgr.start_job(turn("안녕")).await.unwrap();
        await_result(&mgr, first).await;
        let second = mgr.start_job(turn("안녕")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn plan_reply_reuses_last_suggested_reply_without_a_new_turn() {
        let mgr = manager();
        let turn_job = mgr.start_job(turn("안녕")).await.unwrap();
        await_result(&mgr, turn_job).await;

        let plan_job = mgr.start_job(JobKind::PlanReply).await.unwrap();
        match await_result(&mgr, plan_job).await {
            JobResult::PlanReply(Some(reply)) => assert!(!reply.is_empty()),
            other => panic!("expected a non-empty suggested reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn queued_event_does_not_error_while_job_is_busy() {
        let mgr = manager();
        let job_id = mgr.start_job(turn("안녕")).await.unwrap();
        let submitted = mgr
            .submit_event(serde_json::json!({"type": "dont_know", "token": "의자"}))
            .await;
        assert!(submitted.is_ok());
        await_result(&mgr, job_id).await;
    }
}
