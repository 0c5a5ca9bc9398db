//! Keyword matching for auto-replies and complaint analytics.

use pesan_store::AutoReplyRule;

/// Find the matching rule for a message: case-insensitive substring match,
/// longest keyword first so insertion order never changes the outcome.
#[must_use]
pub fn match_rule<'a>(rules: &'a [AutoReplyRule], text: &str) -> Option<&'a AutoReplyRule> {
    let haystack = text.to_lowercase();
    rules
        .iter()
        .filter(|r| !r.keyword.is_empty())
        .filter(|r| haystack.contains(&r.keyword.to_lowercase()))
        .max_by_key(|r| r.keyword.chars().count())
}

/// Complaint keywords present in the text. Analytics only; matching a
/// complaint never blocks a reply.
#[must_use]
pub fn scan_complaints<'a>(keywords: &'a [String], text: &str) -> Vec<&'a str> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty() && haystack.contains(&k.to_lowercase()))
        .map(String::as_str)
        .collect()
}
