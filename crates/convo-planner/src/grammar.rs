use convo_core::types::GrammarPattern;
use convo_core::ItemId;

/// A deterministic, built-in grammar pattern entry: trigger lexemes that,
/// when selected as targets, pull this pattern into the envelope.
#[derive(Debug, Clone)]
pub struct GrammarEntry {
    pub id: &'static str,
    pub pattern: &'static str,
    pub triggers: &'static [&'static str],
}

/// A small deterministic table of grammar patterns. Supplements the
/// distilled core with the source's grammar-pattern lookup, scaled down
/// to a handful of illustrative entries rather than a full corpus.
pub const GRAMMAR_TABLE: &[GrammarEntry] = &[
    GrammarEntry {
        id: "progressive",
        pattern: "-고 있어요 (currently doing)",
        triggers: &["가다", "먹다", "보다", "하다"],
    },
    GrammarEntry {
        id: "past_tense",
        pattern: "-았/었어요 (past tense)",
        triggers: &["어제", "작년", "아까"],
    },
    GrammarEntry {
        id: "desire",
        pattern: "-고 싶어요 (want to)",
        triggers: &["먹다", "가다", "보다", "사다"],
    },
    GrammarEntry {
        id: "reason",
        pattern: "-아서/어서 (because, so)",
        triggers: &["왜", "그래서", "때문"],
    },
];

/// A collocation trigger: when all of `lead_lexemes` are among the
/// selected lexical targets, this collocation id becomes a must-target
/// candidate.
#[derive(Debug, Clone)]
pub struct CollocationEntry {
    pub id: &'static str,
    pub surface_forms: &'static [&'static str],
    pub triggers: &'static [&'static str],
}

pub const COLLOCATION_TABLE: &[CollocationEntry] = &[
    CollocationEntry {
        id: "colloc:beoseu_tada",
        surface_forms: &["버스", "타다"],
        triggers: &["버스"],
    },
    CollocationEntry {
        id: "colloc:sajin_jjikda",
        surface_forms: &["사진", "찍다"],
        triggers: &["사진"],
    },
    CollocationEntry {
        id: "colloc:yak_meokda",
        surface_forms: &["약", "먹다"],
        triggers: &["약"],
    },
];

/// Grammar entries whose triggers match any of `target_lexemes`, capped
/// at `max_patterns`.
pub fn grammar_patterns_for(target_lexemes: &[&str], max_patterns: usize) -> Vec<GrammarPattern> {
    let mut out = Vec::new();
    for entry in GRAMMAR_TABLE {
        if out.len() >= max_patterns {
            break;
        }
        if entry.triggers.iter().any(|t| target_lexemes.contains(t)) {
            out.push(GrammarPattern {
                id: ItemId::new(convo_core::ItemKind::Gram, entry.id),
                pattern: entry.pattern.to_string(),
                triggers: entry.triggers.iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    out
}

/// The first collocation (cap 1, per the planner's ordered selection)
/// whose trigger lexeme appears among `target_lexemes`.
pub fn collocation_target_for(target_lexemes: &[&str]) -> Option<&'static CollocationEntry> {
    COLLOCATION_TABLE
        .iter()
        .find(|entry| entry.triggers.iter().any(|t| target_lexemes.contains(t)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grammar_patterns_match_triggers() {
        let patterns = grammar_patterns_for(&["먹다"], 10);
        assert!(patterns.iter().any(|p| p.id.as_str() == "gram:progressive"));
        assert!(patterns.iter().any(|p| p.id.as_str() == "gram:desire"));
    }

    #[test]
    fn grammar_patterns_respect_cap() {
        let patterns = grammar_patterns_for(&["먹다", "어제", "왜"], 1);
        assert_eq!(patterns.len(), 1);
    }

    #[test]
    fn collocation_lookup_finds_trigger() {
        let target = collocation_target_for(&["버스"]);
        assert_eq!(target.unwrap().id, "colloc:beoseu_tada");
    }

    #[test]
    fn collocation_lookup_none_when_no_trigger() {
        assert!(collocation_target_for(&["고양이"]).is_none());
    }
}
