//! Text preprocessing for embedding generation and duplicate checks.
//!
//! Every comparison in this crate goes through [`normalize_text`]:
//! 1. Lowercase
//! 2. Trim
//! 3. Collapse internal whitespace runs to a single space
//!
//! The content hash is computed over the normalized form, so "Run  5k" and
//! "run 5k" share one cache entry.

use sha2::{Digest, Sha256};

/// Default maximum canonical text length (characters, not tokens)
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 512;

/// Ellipsis suffix when content is truncated
const TRUNCATION_SUFFIX: &str = "...";

/// Normalize text for hashing and embedding.
///
/// Returns an empty string for blank input; callers decide whether that is
/// an error.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// SHA-256 of the normalized text, rendered as 64 lowercase hex characters.
pub fn content_hash(text: &str) -> String {
    hash_normalized(&normalize_text(text))
}

/// Hash text that has already been through [`normalize_text`].
pub(crate) fn hash_normalized(normalized: &str) -> String {
    let digest = Sha256::digest(normalized.as_bytes());
    to_hex(&digest)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;

    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}

/// Build the deduplication-relevant text for an entity from its title and
/// description.
///
/// Returns `None` if both are empty after trimming.
/// Otherwise, concatenates them and truncates to `max_len` characters.
pub fn canonical_text(title: &str, description: &str, max_len: usize) -> Option<String> {
    let title = title.trim();
    let description = description.trim();

    if title.is_empty() && description.is_empty() {
        return None;
    }

    let content = if title.is_empty() {
        description.to_string()
    } else if description.is_empty() {
        title.to_string()
    } else {
        format!("{} - {}", title, description)
    };

    Some(truncate_content(&content, max_len))
}

/// Truncate content to `max_len` characters, adding ellipsis if truncated.
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.chars().count() <= max_len {
        return content.to_string();
    }

    // Count chars, not bytes, so multi-byte text is never split
    let keep = max_len.saturating_sub(TRUNCATION_SUFFIX.len());
    let truncated: String = content.chars().take(keep).collect();

    format!("{}{}", truncated, TRUNCATION_SUFFIX)
}
