use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::bands::BandThresholds;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Fake,
    Local,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedactionLevel {
    None,
    Minimal,
    Strict,
}

/// The fully validated, defaulted settings the rest of the crate consumes.
/// Every field here is guaranteed in-range — [`RawSettings`] is where
/// out-of-range or malformed input gets caught and silently replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub safe_mode: bool,
    pub redaction_level: RedactionLevel,
    pub max_rewrites: u32,
    pub lexeme_field_index: usize,
    pub gloss_field_index: Option<usize>,
    pub snapshot_max_items: usize,
    pub band_thresholds: BandThresholds,
    pub allow_new_words: bool,
    pub max_new_words_per_session: u32,
    pub force_new_word_every_n_turns: u32,
    pub treat_unseen_deck_words_as_support: bool,
    pub lexical_similarity_max: f64,
    pub semantic_similarity_max: f64,
}

impl Default for ConvoSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Fake,
            model: "fake-default".to_string(),
            safe_mode: true,
            redaction_level: RedactionLevel::Minimal,
            max_rewrites: 2,
            lexeme_field_index: 0,
            gloss_field_index: Some(1),
            snapshot_max_items: 5000,
            band_thresholds: BandThresholds::default(),
            allow_new_words: true,
            max_new_words_per_session: 3,
            force_new_word_every_n_turns: 5,
            treat_unseen_deck_words_as_support: false,
            lexical_similarity_max: 0.6,
            semantic_similarity_max: 0.6,
        }
    }
}

/// Permissive mirror of [`ConvoSettings`] accepted straight out of
/// TOML/env merge — every field optional so a single bad value doesn't
/// fail the whole load. [`ConvoSettings::load`] validates and defaults
/// field-by-field from this.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawSettings {
    provider: Option<String>,
    model: Option<String>,
    safe_mode: Option<bool>,
    redaction_level: Option<String>,
    max_rewrites: Option<i64>,
    lexeme_field_index: Option<i64>,
    gloss_field_index: Option<i64>,
    snapshot_max_items: Option<i64>,
    band_cold_threshold: Option<f64>,
    band_fragile_threshold: Option<f64>,
    band_stretch_threshold: Option<f64>,
    allow_new_words: Option<bool>,
    max_new_words_per_session: Option<i64>,
    force_new_word_every_n_turns: Option<i64>,
    treat_unseen_deck_words_as_support: Option<bool>,
    lexical_similarity_max: Option<f64>,
    semantic_similarity_max: Option<f64>,
}

impl ConvoSettings {
    /// Loads from `path` (TOML) merged with `CONVO_*`-prefixed env vars.
    /// Invalid fields silently fall back to defaults rather than failing
    /// the load — a missing or unreadable file just yields defaults too.
    pub fn load(path: Option<&str>) -> Self {
        let figment = match path {
            Some(p) => Figment::new().merge(Toml::file(p)),
            None => Figment::new(),
        };
        let figment = figment.merge(Env::prefixed("CONVO_").split("_"));

        let raw: RawSettings = match figment.extract() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "config load failed entirely, using defaults");
                RawSettings::default()
            }
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Self {
        let defaults = ConvoSettings::default();

        let provider = raw
            .provider
            .as_deref()
            .and_then(|s| match s {
                "fake" => Some(ProviderKind::Fake),
                "local" => Some(ProviderKind::Local),
                "openai" => Some(ProviderKind::Openai),
                other => {
                    warn!(value = other, "invalid provider, falling back to default");
                    None
                }
            })
            .unwrap_or(defaults.provider);

        let redaction_level = raw
            .redaction_level
            .as_deref()
            .and_then(|s| match s {
                "none" => Some(RedactionLevel::None),
                "minimal" => Some(RedactionLevel::Minimal),
                "strict" => Some(RedactionLevel::Strict),
                other => {
                    warn!(value = other, "invalid redaction_level, falling back to default");
                    None
                }
            })
            .unwrap_or(defaults.redaction_level);

        let max_rewrites = raw
            .max_rewrites
            .filter(|v| (0..=10).contains(v))
            .map(|v| v as u32)
            .unwrap_or(defaults.max_rewrites);

        let lexeme_field_index = raw
            .lexeme_field_index
            .filter(|v| *v >= 0)
            .map(|v| v as usize)
            .unwrap_or(defaults.lexeme_field_index);

        let gloss_field_index = match raw.gloss_field_index {
            Some(v) if v >= 0 => Some(v as usize),
            Some(_) => {
                warn!("invalid gloss_field_index, falling back to default");
                defaults.gloss_field_index
            }
            None => defaults.gloss_field_index,
        };

        let snapshot_max_items = raw
            .snapshot_max_items
            .filter(|v| *v > 0)
            .map(|v| v as usize)
            .unwrap_or(defaults.snapshot_max_items);

        let band_thresholds = match (
            raw.band_cold_threshold,
            raw.band_fragile_threshold,
            raw.band_stretch_threshold,
        ) {
            (Some(cold), Some(fragile), Some(stretch)) => {
                let candidate = BandThresholds { cold, fragile, stretch };
                if candidate.is_valid() {
                    candidate
                } else {
                    warn!("band thresholds not strictly increasing in (0,1), falling back to default");
                    defaults.band_thresholds
                }
            }
            _ => defaults.band_thresholds,
        };

        let max_new_words_per_session = raw
            .max_new_words_per_session
            .filter(|v| *v >= 0)
            .map(|v| v as u32)
            .unwrap_or(defaults.max_new_words_per_session);

        let force_new_word_every_n_turns = raw
            .force_new_word_every_n_turns
            .filter(|v| (1..=10).contains(v))
            .map(|v| v as u32)
            .unwrap_or(defaults.force_new_word_every_n_turns);

        let lexical_similarity_max = raw
            .lexical_similarity_max
            .filter(|v| *v > 0.0 && *v < 1.0)
            .unwrap_or(defaults.lexical_similarity_max);

        let semantic_similarity_max = raw
            .semantic_similarity_max
            .filter(|v| *v > 0.0 && *v < 1.0)
            .unwrap_or(defaults.semantic_similarity_max);

        Self {
            provider,
            model: raw.model.unwrap_or(defaults.model),
            safe_mode: raw.safe_mode.unwrap_or(defaults.safe_mode),
            redaction_level,
            max_rewrites,
            lexeme_field_index,
            gloss_field_index,
            snapshot_max_items,
            band_thresholds,
            allow_new_words: raw.allow_new_words.unwrap_or(defaults.allow_new_words),
            max_new_words_per_session,
            force_new_word_every_n_turns,
            treat_unseen_deck_words_as_support: raw
                .treat_unseen_deck_words_as_support
                .unwrap_or(defaults.treat_unseen_deck_words_as_support),
            lexical_similarity_max,
            semantic_similarity_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let s = ConvoSettings::default();
        assert!(s.band_thresholds.is_valid());
        assert!(s.lexical_similarity_max > 0.0 && s.lexical_similarity_max < 1.0);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let s = ConvoSettings::load(Some("/nonexistent/path/convo.toml"));
        assert_eq!(s.provider, ProviderKind::Fake);
    }

    #[test]
    fn invalid_provider_falls_back_to_default() {
        let raw = RawSettings {
            provider: Some("bogus".to_string()),
            ..Default::default()
        };
        let settings = ConvoSettings::from_raw(raw);
        assert_eq!(settings.provider, ProviderKind::Fake);
    }

    #[test]
    fn out_of_range_max_rewrites_falls_back() {
        let raw = RawSettings {
            max_rewrites: Some(99),
            ..Default::default()
        };
        let settings = ConvoSettings::from_raw(raw);
        assert_eq!(settings.max_rewrites, ConvoSettings::default().max_rewrites);
    }

    #[test]
    fn inconsistent_band_thresholds_fall_back() {
        let raw = RawSettings {
            band_cold_threshold: Some(0.9),
            band_fragile_threshold: Some(0.1),
            band_stretch_threshold: Some(0.5),
            ..Default::default()
        };
        let settings = ConvoSettings::from_raw(raw);
        assert_eq!(settings.band_thresholds, BandThresholds::default());
    }

    #[test]
    fn valid_overrides_are_applied() {
        let raw = RawSettings {
            max_rewrites: Some(5),
            allow_new_words: Some(false),
            ..Default::default()
        };
        let settings = ConvoSettings::from_raw(raw);
        assert_eq!(settings.max_rewrites, 5);
        assert!(!settings.allow_new_words);
    }
}
