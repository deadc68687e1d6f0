use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionExport {
    pub id: i64,
    pub deck_ids: String,
    pub started_ms: i64,
    pub ended_ms: Option<i64>,
    pub summary_json: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventExport {
    pub session_id: i64,
    pub turn_index: i64,
    pub event_type: String,
    pub ts_ms: i64,
    pub payload_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemExport {
    pub item_id: String,
    pub kind: String,
    pub value: String,
    pub mastery_json: String,
    pub updated_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryExport {
    pub sessions: Vec<SessionExport>,
    pub events: Vec<EventExport>,
    pub items: Vec<ItemExport>,
}

impl TelemetryExport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Dumps the `limit_sessions` most recent sessions, their events, and the
/// full item table — intended for offline inspection or migration, not
/// for any per-turn path.
pub fn export_telemetry(conn: &Connection, limit_sessions: i64) -> Result<TelemetryExport> {
    let mut sessions = Vec::new();
    let mut session_ids = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT id, deck_ids, started_ms, ended_ms, summary_json
             FROM elites_conversation_sessions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit_sessions], |row| {
            Ok(SessionExport {
                id: row.get(0)?,
                deck_ids: row.get(1)?,
                started_ms: row.get(2)?,
                ended_ms: row.get(3)?,
                summary_json: row.get(4)?,
            })
        })?;
        for row in rows {
            let s = row?;
            session_ids.push(s.id);
            sessions.push(s);
        }
    }

    let mut events = Vec::new();
    if !session_ids.is_empty() {
        let placeholders = session_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT session_id, turn_index, event_type, ts_ms, payload_json
             FROM elites_conversation_events WHERE session_id IN ({placeholders}) ORDER BY id"
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> =
            session_ids.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(EventExport {
                session_id: row.get(0)?,
                turn_index: row.get(1)?,
                event_type: row.get(2)?,
                ts_ms: row.get(3)?,
                payload_json: row.get(4)?,
            })
        })?;
        for row in rows {
            events.push(row?);
        }
    }

    let mut items = Vec::new();
    {
        let mut stmt = conn.prepare(
            "SELECT item_id, kind, value, mastery_json, updated_ms
             FROM elites_conversation_items ORDER BY updated_ms DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ItemExport {
                item_id: row.get(0)?,
                kind: row.get(1)?,
                value: row.get(2)?,
                mastery_json: row.get(3)?,
                updated_ms: row.get(4)?,
            })
        })?;
        for row in rows {
            items.push(row?);
        }
    }

    Ok(TelemetryExport {
        sessions,
        events,
        items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;

    #[test]
    fn export_empty_db_returns_empty_lists() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let export = export_telemetry(&conn, 100).unwrap();
        assert!(export.sessions.is_empty());
        assert!(export.events.is_empty());
        assert!(export.items.is_empty());
    }

    #[test]
    fn export_round_trips_to_json() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO elites_conversation_sessions(deck_ids, started_ms) VALUES ('1', 1000)",
            [],
        )
        .unwrap();
        let export = export_telemetry(&conn, 100).unwrap();
        assert_eq!(export.sessions.len(), 1);
        let json = export.to_json().unwrap();
        assert!(json.contains("\"deck_ids\":\"1\""));
    }
}
