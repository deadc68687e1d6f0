use std::collections::HashSet;

use convo_core::tokenize::{unexpected_tokens, ALWAYS_ALLOWED_INTERJECTIONS, BASE_ALLOWED_SUPPORT, PARTICLE_SUFFIXES};
use convo_core::types::LanguageConstraints;

/// Builds the per-request allowed-token set: support ∪ stretch ∪
/// reinforced ∪ must-target surface forms ∪ base function words ∪
/// always-allowed interjections.
pub fn allowed_set(constraints: &LanguageConstraints) -> HashSet<&str> {
    let mut allowed: HashSet<&str> = HashSet::new();
    allowed.extend(constraints.allowed_support.iter().map(String::as_str));
    allowed.extend(constraints.allowed_stretch.iter().map(String::as_str));
    allowed.extend(constraints.reinforced_words.iter().map(String::as_str));
    allowed.extend(constraints.target_surface_forms());
    allowed.extend(BASE_ALLOWED_SUPPORT.iter().copied());
    allowed.extend(ALWAYS_ALLOWED_INTERJECTIONS.iter().copied());
    allowed
}

/// Tokens in `text` not covered by `constraints`' allowed envelope (after
/// particle-suffix stripping), deduplicated and insertion-ordered.
pub fn validate_tokens(text: &str, constraints: &LanguageConstraints) -> Vec<String> {
    let allowed = allowed_set(constraints);
    unexpected_tokens(text, &allowed, PARTICLE_SUFFIXES)
}

/// The set spec §4.4 requires a gloss for: `allowed_support ∪
/// allowed_stretch ∪ reinforced_words ∪ must-target surface forms`.
/// Unlike [`allowed_set`], this excludes base function words and
/// always-allowed interjections — neither needs a gloss.
pub fn required_gloss_set(constraints: &LanguageConstraints) -> HashSet<&str> {
    let mut required: HashSet<&str> = HashSet::new();
    required.extend(constraints.allowed_support.iter().map(String::as_str));
    required.extend(constraints.allowed_stretch.iter().map(String::as_str));
    required.extend(constraints.reinforced_words.iter().map(String::as_str));
    required.extend(constraints.target_surface_forms());
    required
}

#[cfg(test)]
mod tests {
    use super::*;
    use convo_core::types::MustTarget;
    use convo_core::ItemId;

    #[test]
    fn must_target_surface_forms_are_implicitly_allowed() {
        let mut constraints = LanguageConstraints::default();
        constraints
            .must_target
            .push(MustTarget::vocab(ItemId::lexeme("의자"), "의자", 1.0));
        let unexpected = validate_tokens("의자 있어요.", &constraints);
        assert!(unexpected.is_empty());
    }

    #[test]
    fn unknown_tokens_are_reported() {
        let constraints = LanguageConstraints::default();
        let unexpected = validate_tokens("고양이 있어요.", &constraints);
        assert_eq!(unexpected, vec!["고양이".to_string()]);
    }

    #[test]
    fn particle_suffixed_target_is_allowed() {
        let mut constraints = LanguageConstraints::default();
        constraints
            .must_target
            .push(MustTarget::vocab(ItemId::lexeme("의자"), "의자", 1.0));
        let unexpected = validate_tokens("의자가 있어요.", &constraints);
        assert!(unexpected.is_empty());
    }
}
