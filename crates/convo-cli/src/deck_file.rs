use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use convo_core::snapshot::{DeckBackend, DeckCardRow, DeckQueryResult};
use serde::Deserialize;

/// One row of a sample deck file — the JSON stand-in for the real
/// Anki/SQLite backend, which is out of scope here. Field order mirrors
/// [`DeckCardRow`] so a dump of a real backend's rows could be fed
/// straight through.
#[derive(Debug, Deserialize)]
struct SampleCard {
    card_id: i64,
    note_id: i64,
    fields: Vec<String>,
    #[serde(default)]
    card_type: Option<i64>,
    #[serde(default)]
    card_queue: Option<i64>,
    #[serde(default)]
    due: Option<i64>,
    #[serde(default)]
    ivl: Option<i64>,
    #[serde(default)]
    reps: Option<i64>,
    #[serde(default)]
    lapses: Option<i64>,
    #[serde(default)]
    stability: Option<f64>,
    #[serde(default)]
    difficulty: Option<f64>,
    #[serde(default)]
    decay: Option<f64>,
    #[serde(default)]
    last_review_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SampleDeck {
    #[serde(default)]
    today: Option<i64>,
    cards: Vec<SampleCard>,
}

/// A [`DeckBackend`] backed by a flat JSON file instead of a live
/// Anki collection — enough to drive the terminal loop and doc
/// examples without depending on the real deck database.
pub struct FileDeckBackend {
    deck: SampleDeck,
}

impl FileDeckBackend {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading deck file {}", path.display()))?;
        let deck: SampleDeck = serde_json::from_str(&raw)
            .with_context(|| format!("parsing deck file {}", path.display()))?;
        Ok(Self { deck })
    }
}

impl DeckBackend for FileDeckBackend {
    fn query(&self, _deck_ids: &[i64], max_items: usize) -> convo_core::Result<DeckQueryResult> {
        let rows = self
            .deck
            .cards
            .iter()
            .take(max_items)
            .map(|c| DeckCardRow {
                card_id: c.card_id,
                note_id: c.note_id,
                fields: c.fields.clone(),
                card_type: c.card_type,
                card_queue: c.card_queue,
                due: c.due,
                ivl: c.ivl,
                reps: c.reps,
                lapses: c.lapses,
                stability: c.stability,
                difficulty: c.difficulty,
                decay: c.decay,
                last_review_date: c.last_review_date,
            })
            .collect();

        Ok(DeckQueryResult { today: self.deck.today, rows })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_cards_and_caps_at_max_items() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"today": 10, "cards": [
                {{"card_id": 1, "note_id": 1, "fields": ["의자", "chair"]}},
                {{"card_id": 2, "note_id": 2, "fields": ["사과", "apple"]}}
            ]}}"#
        )
        .unwrap();

        let backend = FileDeckBackend::load(file.path()).unwrap();
        let result = backend.query(&[1], 1).unwrap();
        assert_eq!(result.today, Some(10));
        assert_eq!(result.rows.len(), 1);
        assert_eq!(result.rows[0].fields[0], "의자");
    }
}
