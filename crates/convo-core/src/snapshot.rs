use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ConvoError, Result};
use crate::ids::ItemId;

/// One row backing a potential [`SnapshotItem`] as returned by a
/// [`DeckBackend`] — the field split, HTML, and FSRS lookup are the
/// backend's concern; everything downstream of this struct is pure.
#[derive(Debug, Clone)]
pub struct DeckCardRow {
    pub card_id: i64,
    pub note_id: i64,
    /// Note fields, in field order, HTML intact.
    pub fields: Vec<String>,
    pub card_type: Option<i64>,
    pub card_queue: Option<i64>,
    pub due: Option<i64>,
    pub ivl: Option<i64>,
    pub reps: Option<i64>,
    pub lapses: Option<i64>,
    pub stability: Option<f64>,
    pub difficulty: Option<f64>,
    pub decay: Option<f64>,
    pub last_review_date: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct DeckQueryResult {
    pub today: Option<i64>,
    pub rows: Vec<DeckCardRow>,
}

/// The deck/card database, queried through a single method — the only
/// thing the core needs to know about storage.
pub trait DeckBackend {
    fn query(&self, deck_ids: &[i64], max_items: usize) -> Result<DeckQueryResult>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    pub item_id: ItemId,
    pub lexeme: String,
    pub source_note_id: i64,
    pub source_card_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gloss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_review_date: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_type: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_queue: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivl: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reps: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lapses: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeckSnapshot {
    pub deck_ids: Vec<i64>,
    pub items: Vec<SnapshotItem>,
    pub today: Option<i64>,
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

fn lexeme_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9가-힣]+").expect("static regex"))
}

fn strip_html(s: &str) -> String {
    tag_re().replace_all(s, "").trim().to_string()
}

fn extract_lexeme(text: &str) -> Option<String> {
    lexeme_re().find(text).map(|m| m.as_str().to_string())
}

fn is_latin_only(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric())
}

fn has_non_latin(s: &str) -> bool {
    s.chars().any(|c| !c.is_ascii() && c.is_alphanumeric())
}

/// Pulls deck items + FSRS metrics from `backend` into an immutable
/// snapshot. Deduplicates by lexeme (first row wins) and caps at
/// `max_items` rows considered.
///
/// Lexeme extraction strips HTML then takes the first maximal
/// alphanumeric/Hangul run. If that run is Latin-only and the gloss field
/// is non-Latin, the fields are swapped — recovery heuristic for reversed
/// (front/back swapped) notes.
pub fn build_deck_snapshot(
    backend: &dyn DeckBackend,
    deck_ids: &[i64],
    lexeme_field_index: usize,
    gloss_field_index: Option<usize>,
    max_items: usize,
) -> Result<DeckSnapshot> {
    if deck_ids.is_empty() {
        return Err(ConvoError::Snapshot("no decks provided".to_string()));
    }
    let mut unique_dids: Vec<i64> = deck_ids.to_vec();
    unique_dids.sort_unstable();
    unique_dids.dedup();

    let result = backend.query(&unique_dids, max_items)?;

    let mut items = Vec::new();
    let mut seen_lexemes = std::collections::HashSet::new();

    for row in result.rows {
        if lexeme_field_index >= row.fields.len() {
            continue;
        }
        let mut raw = strip_html(&row.fields[lexeme_field_index]);
        let mut gloss = gloss_field_index
            .filter(|idx| *idx < row.fields.len())
            .map(|idx| strip_html(&row.fields[idx]))
            .filter(|g| !g.is_empty());

        if raw.is_empty() {
            continue;
        }

        let lexeme = match extract_lexeme(&raw) {
            Some(l) => l,
            None => continue,
        };

        if is_latin_only(&lexeme) {
            if let Some(g) = &gloss {
                if has_non_latin(g) {
                    let swapped_gloss = raw.clone();
                    raw = g.clone();
                    if let Some(swapped_lexeme) = extract_lexeme(&raw) {
                        gloss = Some(swapped_gloss);
                        if !seen_lexemes.insert(swapped_lexeme.clone()) {
                            continue;
                        }
                        items.push(build_item(&row, swapped_lexeme, gloss));
                        continue;
                    }
                }
            }
        }

        if !seen_lexemes.insert(lexeme.clone()) {
            continue;
        }
        items.push(build_item(&row, lexeme, gloss));
    }

    Ok(DeckSnapshot {
        deck_ids: unique_dids,
        items,
        today: result.today,
    })
}

fn build_item(row: &DeckCardRow, lexeme: String, gloss: Option<String>) -> SnapshotItem {
    SnapshotItem {
        item_id: ItemId::lexeme(&lexeme),
        lexeme,
        source_note_id: row.note_id,
        source_card_id: row.card_id,
        gloss,
        stability: row.stability,
        difficulty: row.difficulty,
        decay: row.decay,
        last_review_date: row.last_review_date,
        card_type: row.card_type,
        card_queue: row.card_queue,
        due: row.due,
        ivl: row.ivl,
        reps: row.reps,
        lapses: row.lapses,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        today: Option<i64>,
        rows: Vec<DeckCardRow>,
    }

    impl DeckBackend for FakeBackend {
        fn query(&self, _deck_ids: &[i64], max_items: usize) -> Result<DeckQueryResult> {
            Ok(DeckQueryResult {
                today: self.today,
                rows: self.rows.iter().take(max_items).cloned().collect(),
            })
        }
    }

    fn row(fields: Vec<&str>) -> DeckCardRow {
        DeckCardRow {
            card_id: 1,
            note_id: 1,
            fields: fields.into_iter().map(str::to_string).collect(),
            card_type: Some(0),
            card_queue: Some(0),
            due: Some(0),
            ivl: Some(0),
            reps: Some(0),
            lapses: Some(0),
            stability: Some(5.0),
            difficulty: Some(3.0),
            decay: Some(0.5),
            last_review_date: None,
        }
    }

    #[test]
    fn extracts_lexeme_and_gloss() {
        let backend = FakeBackend {
            today: Some(100),
            rows: vec![row(vec!["<b>의자</b>", "chair"])],
        };
        let snap = build_deck_snapshot(&backend, &[1], 0, Some(1), 100).unwrap();
        assert_eq!(snap.items.len(), 1);
        assert_eq!(snap.items[0].lexeme, "의자");
        assert_eq!(snap.items[0].gloss.as_deref(), Some("chair"));
        assert_eq!(snap.today, Some(100));
    }

    #[test]
    fn dedups_by_lexeme() {
        let backend = FakeBackend {
            today: None,
            rows: vec![row(vec!["의자", "chair"]), row(vec!["의자", "chair 2"])],
        };
        let snap = build_deck_snapshot(&backend, &[1], 0, Some(1), 100).unwrap();
        assert_eq!(snap.items.len(), 1);
    }

    #[test]
    fn recovers_reversed_notes() {
        // Front field is Latin-only ("chair"), back field is non-Latin
        // Hangul ("의자") — swap so the lexeme is the Hangul form.
        let backend = FakeBackend {
            today: None,
            rows: vec![row(vec!["chair", "의자"])],
        };
        let snap = build_deck_snapshot(&backend, &[1], 0, Some(1), 100).unwrap();
        assert_eq!(snap.items[0].lexeme, "의자");
        assert_eq!(snap.items[0].gloss.as_deref(), Some("chair"));
    }

    #[test]
    fn empty_deck_ids_is_an_error() {
        let backend = FakeBackend { today: None, rows: vec![] };
        assert!(build_deck_snapshot(&backend, &[], 0, None, 100).is_err());
    }

    #[test]
    fn deck_ids_are_sorted_and_deduped() {
        let backend = FakeBackend { today: None, rows: vec![] };
        let snap = build_deck_snapshot(&backend, &[3, 1, 1, 2], 0, None, 100).unwrap();
        assert_eq!(snap.deck_ids, vec![1, 2, 3]);
    }
}
