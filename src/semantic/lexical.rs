//! Lexical (string-edit) similarity for hybrid scoring.
//!
//! Embeddings can rate near-identical short titles ("Run 5k" vs "Run 5km")
//! further apart than they read. Edit similarity over the normalized text
//! corrects for this in the short-text regime.

use crate::semantic::preprocess::normalize_text;

/// `1 - levenshtein / max_len` over normalized text, in [0.0, 1.0].
///
/// Two blank strings are identical (1.0); blank against non-blank is 0.0.
pub fn normalized_edit_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    strsim::normalized_levenshtein(&a, &b)
}
