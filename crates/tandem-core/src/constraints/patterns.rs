//! Text patterns shared by the constraint rules.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// A word: a run of alphanumeric/underscore characters
    pub static ref WORD_PATTERN: Regex = Regex::new(r"\b\w+\b").unwrap();
}

/// Number of words in `content`.
pub fn count_words(content: &str) -> usize {
    WORD_PATTERN.find_iter(content).count()
}

/// Case-insensitive whole-word search for a literal keyword.
///
/// The keyword is escaped, so punctuation in it matches literally. Returns
/// false for a blank keyword.
pub fn contains_keyword(content: &str, keyword: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }
    match Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))) {
        Ok(pattern) => pattern.is_match(content),
        Err(e) => {
            tracing::warn!(keyword = %keyword, error = %e, "Keyword pattern failed to compile");
            false
        }
    }
}

/// Lowercased word tokens of a topic string.
pub fn topic_tokens(topic: &str) -> Vec<String> {
    WORD_PATTERN
        .find_iter(&topic.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Whether `content` mentions enough of the topic's tokens.
///
/// Each token counts when it appears anywhere in the lowercased content
/// (substring containment, not a word match). At least `max(1, n / 2)`
/// of the `n` tokens must appear.
pub fn covers_topic(content: &str, topic: &str) -> bool {
    let tokens = topic_tokens(topic);
    let haystack = content.to_lowercase();
    let matched = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched >= (tokens.len() / 2).max(1)
}
