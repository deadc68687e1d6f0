use rusqlite::Connection;

use crate::error::Result;

/// Creates the telemetry schema if it does not already exist. Safe to call
/// on every startup.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS elites_conversation_sessions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            deck_ids      TEXT NOT NULL,
            started_ms    INTEGER NOT NULL,
            ended_ms      INTEGER,
            summary_json  BLOB
        );
        CREATE TABLE IF NOT EXISTS elites_conversation_events (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            session_id    INTEGER NOT NULL,
            turn_index    INTEGER NOT NULL,
            event_type    TEXT NOT NULL,
            ts_ms         INTEGER NOT NULL,
            payload_json  BLOB NOT NULL,
            FOREIGN KEY(session_id) REFERENCES elites_conversation_sessions(id)
        );
        CREATE INDEX IF NOT EXISTS idx_elites_conversation_events_session
            ON elites_conversation_events(session_id);
        CREATE TABLE IF NOT EXISTS elites_conversation_items (
            item_id       TEXT PRIMARY KEY,
            kind          TEXT NOT NULL,
            value         TEXT NOT NULL,
            mastery_json  BLOB NOT NULL,
            updated_ms    INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS elites_conversation_glossary (
            lexeme          TEXT PRIMARY KEY,
            gloss           TEXT,
            source_note_id  INTEGER,
            updated_ms      INTEGER NOT NULL
        );",
    )?;
    Ok(())
}
