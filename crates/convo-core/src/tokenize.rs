use std::collections::HashSet;

use regex::Regex;
use std::sync::OnceLock;

/// Maximal runs of alphanumeric or Hangul code points. Digits are extracted
/// like any other run — callers that care (validation) filter them out
/// afterward, since a bare digit run is a legitimate token shape elsewhere.
fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{Alphabetic}\p{Nd}]+").expect("static regex"))
}

pub fn tokenize(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// The Korean particle suffix table — the single language-specific
/// constant in this module. Substitute this list (and only this list) to
/// port allowed-token extension to another language.
pub const PARTICLE_SUFFIXES: &[&str] = &[
    "이", "가", "은", "는", "을", "를", "에", "에서", "로", "으로", "와", "과", "랑", "하고",
    "도", "만",
];

/// ~70 Korean function words/particles always implicitly permitted,
/// independent of any per-turn allowed pool.
pub const BASE_ALLOWED_SUPPORT: &[&str] = &[
    "이", "가", "은", "는", "을", "를", "에", "에서", "로", "으로", "와", "과", "랑", "하고",
    "도", "만", "그리고", "그래서", "근데", "그런데", "네", "응", "아니요", "맞아요", "아니에요",
    "있어요", "없어요", "있어", "없어", "뭐", "뭐가", "뭐예요", "어디", "어디예요", "여기", "거기",
    "저기", "지금", "오늘", "내일", "좋아요", "싫어요", "이거", "저거", "그거", "네요", "군요",
    "죠", "잖아요", "거든요", "는데요", "해요", "했어요", "할게요", "할까요", "주세요", "될까요",
    "돼요", "왜요", "어떻게", "얼마나", "누가", "누구", "언제", "몇", "같이", "정말", "너무",
    "진짜", "아마", "아직", "벌써", "다시", "또", "좀",
];

/// Interjections permitted regardless of any allowed pool or particle
/// stripping — discourse glue the learner is never expected to "target".
pub const ALWAYS_ALLOWED_INTERJECTIONS: &[&str] =
    &["아", "응", "네", "그래", "그럼", "음", "아니", "그리고", "그래서"];

/// `t ∈ allowed`, or `t` ends in a known particle suffix `p` with
/// `len(t) > len(p)` and the stem `t[..t.len()-p.len()] ∈ allowed`.
pub fn token_is_allowed(token: &str, allowed: &HashSet<&str>, suffixes: &[&str]) -> bool {
    if allowed.contains(token) {
        return true;
    }
    for suffix in suffixes {
        if let Some(stem) = token.strip_suffix(suffix) {
            if !stem.is_empty() && allowed.contains(stem) {
                return true;
            }
        }
    }
    false
}

/// Validates `text` against `allowed`, returning unexpected tokens
/// (deduplicated, insertion-ordered). Pure digit tokens are ignored.
pub fn unexpected_tokens(text: &str, allowed: &HashSet<&str>, suffixes: &[&str]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for token in tokenize(text) {
        if token.chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        if token_is_allowed(&token, allowed, suffixes) {
            continue;
        }
        if seen.insert(token.clone()) {
            out.push(token);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizes_mixed_hangul_and_latin() {
        let tokens = tokenize("의자 있어요. Hello123 world!");
        assert_eq!(tokens, vec!["의자", "있어요", "Hello123", "world"]);
    }

    #[test]
    fn digit_only_tokens_are_ignored_by_validation() {
        let allowed: HashSet<&str> = HashSet::new();
        let unexpected = unexpected_tokens("42 의자", &allowed, PARTICLE_SUFFIXES);
        assert_eq!(unexpected, vec!["의자".to_string()]);
    }

    #[test]
    fn particle_suffix_stripping_allows_stem_plus_particle() {
        let allowed: HashSet<&str> = ["의자"].into_iter().collect();
        assert!(token_is_allowed("의자가", &allowed, PARTICLE_SUFFIXES));
        assert!(token_is_allowed("의자는", &allowed, PARTICLE_SUFFIXES));
        assert!(!token_is_allowed("고양이가", &allowed, PARTICLE_SUFFIXES));
    }

    #[test]
    fn suffix_alone_is_not_a_valid_stem() {
        let allowed: HashSet<&str> = ["가"].into_iter().collect();
        // "가" stripped of suffix "가" would leave an empty stem — rejected.
        assert!(!token_is_allowed("가", &allowed, PARTICLE_SUFFIXES));
    }

    #[test]
    fn dedup_is_insertion_ordered() {
        let allowed: HashSet<&str> = HashSet::new();
        let unexpected = unexpected_tokens("고양이 의자 고양이", &allowed, PARTICLE_SUFFIXES);
        assert_eq!(unexpected, vec!["고양이".to_string(), "의자".to_string()]);
    }
}
