use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use rusqlite::{params, Connection};
use tracing::warn;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{MasteryCache, MasteryCounters};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Append-only session/event log plus upsert-style per-item mastery
/// counters, guarded by a single mutex — the only shared mutable
/// resource a session touches.
pub struct ConversationTelemetryStore {
    conn: Mutex<Connection>,
}

impl ConversationTelemetryStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn start_session(&self, deck_ids: &[i64]) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let csv = deck_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        conn.execute(
            "INSERT INTO elites_conversation_sessions(deck_ids, started_ms) VALUES (?1, ?2)",
            params![csv, now_ms()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn end_session(&self, session_id: i64, summary_json: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE elites_conversation_sessions SET ended_ms=?1, summary_json=?2 WHERE id=?3",
            params![now_ms(), summary_json, session_id],
        )?;
        Ok(())
    }

    pub fn log_event(
        &self,
        session_id: i64,
        turn_index: i64,
        event_type: &str,
        payload_json: &str,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        if let Err(e) = conn.execute(
            "INSERT INTO elites_conversation_events
                (session_id, turn_index, event_type, ts_ms, payload_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![session_id, turn_index, event_type, now_ms(), payload_json],
        ) {
            // A failed event write is logged and skipped, never fatal.
            warn!(error = %e, event_type, "failed to persist event");
        }
        Ok(())
    }

    /// Updates `cache[item_id][k] += v` for each delta, then upserts the
    /// merged counters. The cache is updated in-place without a
    /// read-before-write against the DB.
    pub fn bump_item_cached(
        &self,
        cache: &mut MasteryCache,
        item_id: &str,
        kind: &str,
        value: &str,
        deltas: &[(&str, i64)],
    ) -> Result<()> {
        let mastery = cache.entry(item_id.to_string()).or_insert_with(MasteryCounters::new);
        for (key, delta) in deltas {
            *mastery.entry((*key).to_string()).or_insert(0) += delta;
        }
        self.upsert_item(item_id, kind, value, mastery)
    }

    fn upsert_item(
        &self,
        item_id: &str,
        kind: &str,
        value: &str,
        mastery: &MasteryCounters,
    ) -> Result<()> {
        let payload = serde_json::to_string(mastery)?;
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO elites_conversation_items(item_id, kind, value, mastery_json, updated_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(item_id) DO UPDATE SET
               kind=excluded.kind,
               value=excluded.value,
               mastery_json=excluded.mastery_json,
               updated_ms=excluded.updated_ms",
            params![item_id, kind, value, payload, now_ms()],
        )?;
        Ok(())
    }

    /// Bulk-loads mastery counters for `item_ids`; unparseable rows are
    /// silently ignored rather than failing the whole load.
    pub fn load_mastery_cache(&self, item_ids: &[String]) -> Result<MasteryCache> {
        if item_ids.is_empty() {
            return Ok(MasteryCache::new());
        }
        let conn = self.conn.lock().unwrap();
        let placeholders = item_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT item_id, mastery_json FROM elites_conversation_items WHERE item_id IN ({placeholders})"
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            item_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let item_id: String = row.get(0)?;
            let mastery_json: String = row.get(1)?;
            Ok((item_id, mastery_json))
        })?;

        let mut out = MasteryCache::new();
        for row in rows {
            let (item_id, mastery_json) = match row {
                Ok(r) => r,
                Err(_) => continue,
            };
            let parsed: MasteryCounters = match serde_json::from_str(&mastery_json) {
                Ok(p) => p,
                Err(_) => continue,
            };
            out.insert(item_id, parsed);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationTelemetryStore {
        ConversationTelemetryStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn start_and_end_session_round_trips() {
        let store = store();
        let id = store.start_session(&[1, 2]).unwrap();
        assert!(id > 0);
        store.end_session(id, "{\"strengths\":[]}").unwrap();
    }

    #[test]
    fn bump_item_cached_accumulates_and_persists() {
        let store = store();
        let mut cache = MasteryCache::new();
        store
            .bump_item_cached(&mut cache, "lexeme:의자", "lexeme", "의자", &[("dont_know", 1)])
            .unwrap();
        store
            .bump_item_cached(&mut cache, "lexeme:의자", "lexeme", "의자", &[("dont_know", 1)])
            .unwrap();
        assert_eq!(cache["lexeme:의자"]["dont_know"], 2);

        let loaded = store.load_mastery_cache(&["lexeme:의자".to_string()]).unwrap();
        assert_eq!(loaded["lexeme:의자"]["dont_know"], 2);
    }

    #[test]
    fn load_mastery_cache_of_unknown_items_is_empty() {
        let store = store();
        let loaded = store
            .load_mastery_cache(&["lexeme:없음".to_string()])
            .unwrap();
        assert!(loaded.is_empty());
    }

    #[test]
    fn log_event_persists_without_error() {
        let store = store();
        let session_id = store.start_session(&[1]).unwrap();
        store
            .log_event(session_id, 1, "turn", "{}")
            .unwrap();
    }
}
