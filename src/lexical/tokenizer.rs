//! Tokenization for the BM25 index.
//!
//! Lowercases and splits on anything that is not alphanumeric, so prose,
//! identifiers, and file paths all break into comparable terms
//! (`"src/auth/refresh.rs"` -> `["src", "auth", "refresh", "rs"]`).

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[a-z0-9]+").expect("static token pattern is valid"))
}

/// Tokenize document text, preserving duplicates (term frequency matters).
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    token_pattern()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Tokenize a query into its set of distinct terms.
///
/// Duplicate query terms collapse so a repeated word cannot double-count
/// during scoring.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(query)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
