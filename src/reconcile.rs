//! Cross-source duplicate suggestions for sports fixtures.
//!
//! Different sites list the same match under slightly different titles
//! ("Real Madrid vs Barcelona" / "Real Madrid - Barcelona FC"). Word overlap
//! can spot these but also pairs two different matches of the same team, so
//! results are only ever reported for review and never merged automatically.

use crate::models::Record;
use serde_json::Value;
use std::collections::BTreeSet;

/// Two titles must share at least this many words to be suggested.
pub const MIN_SHARED_WORDS: usize = 2;

const SEPARATORS: &[&str] = &["vs", "vs.", "v/s", "v", "-", "x"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub left: usize,
    pub right: usize,
    pub left_title: String,
    pub right_title: String,
    pub shared: Vec<String>,
}

fn words(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .replace(':', " ")
        .split_whitespace()
        .filter(|w| !SEPARATORS.contains(w))
        .map(String::from)
        .collect()
}

/// Returns every pair of records whose `field` values share enough words.
/// Indices refer to positions in `records`.
pub fn suggest(records: &[Record], field: &str) -> Vec<Suggestion> {
    let titled: Vec<(usize, &str, BTreeSet<String>)> = records
        .iter()
        .enumerate()
        .filter_map(|(i, r)| {
            let title = r.get(field).and_then(Value::as_str)?;
            let set = words(title);
            (!set.is_empty()).then_some((i, title, set))
        })
        .collect();

    let mut suggestions = Vec::new();
    for (a, (left, left_title, left_words)) in titled.iter().enumerate() {
        for (right, right_title, right_words) in &titled[a + 1..] {
            let shared: Vec<String> = left_words.intersection(right_words).cloned().collect();
            if shared.len() >= MIN_SHARED_WORDS {
                suggestions.push(Suggestion {
                    left: *left,
                    right: *right,
                    left_title: left_title.to_string(),
                    right_title: right_title.to_string(),
                    shared,
                });
            }
        }
    }
    suggestions
}
