//! Keyword extraction shared by attribution and relevance matching
//!
//! Both matchers work on plain lowercase word sets; there is no stemming
//! or weighting. Keywords of two characters or fewer never match.

use std::collections::BTreeSet;

use crate::storage::Capability;

/// Keywords this short are ignored when matching
pub const MIN_KEYWORD_LEN: usize = 3;

/// Split free text into a set of lowercase words
pub fn words(text: &str) -> BTreeSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// The first `limit` words of `text`, lowercased
pub fn leading_words(text: &str, limit: usize) -> BTreeSet<String> {
    text.split_whitespace()
        .take(limit)
        .flat_map(|w| words(w))
        .collect()
}

/// Keywords that attribute an experience to a capability: tags plus the
/// dash-separated parts of its id
pub fn attribution_keywords(id: &str, cap: &Capability) -> BTreeSet<String> {
    cap.tags
        .iter()
        .map(|t| t.to_lowercase())
        .chain(id.split('-').map(|part| part.to_lowercase()))
        .filter(|kw| kw.chars().count() >= MIN_KEYWORD_LEN)
        .collect()
}

/// Whether a keyword occurs in a tokenized text.
///
/// Multi-word or hyphenated keywords match when every word is present.
pub fn keyword_in(keyword: &str, tokens: &BTreeSet<String>) -> bool {
    let parts = words(keyword);
    !parts.is_empty() && parts.iter().all(|p| tokens.contains(p))
}

/// Words describing a capability for relevance matching: id tokens split
/// on any separator plus tag words
pub fn capability_words(id: &str, cap: &Capability) -> BTreeSet<String> {
    words(id)
        .into_iter()
        .chain(cap.tags.iter().flat_map(|t| words(t)))
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .collect()
}
