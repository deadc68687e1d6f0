use std::collections::HashMap;

/// Per-item counters, e.g. `dont_know`, `practice_again`, `lookup_count`.
/// Invariant: monotonically non-decreasing within a session.
pub type MasteryCounters = HashMap<String, i64>;

/// `ItemId` (wire string) -> its counters.
pub type MasteryCache = HashMap<String, MasteryCounters>;

#[derive(Debug, Clone)]
pub struct SessionRow {
    pub id: i64,
    pub deck_ids_csv: String,
    pub started_ms: i64,
    pub ended_ms: Option<i64>,
    pub summary_json: Option<String>,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub session_id: i64,
    pub turn_index: i64,
    pub event_type: String,
    pub ts_ms: i64,
    pub payload_json: String,
}
