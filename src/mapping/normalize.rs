//! Dataset key normalization
//!
//! Collectors spell dataset keys loosely (`1301b`, `1301B`); the
//! `header_mappings.dataset` column stores them as `1301 B ...`.

use regex::Regex;
use std::sync::LazyLock;

/// Digit run immediately followed by a letter run
static DIGITS_THEN_LETTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)([A-Za-z]+)").expect("dataset key pattern is valid"));

/// Canonical prefix used for the `LIKE '{key}%'` match against stored labels.
///
/// Splits the first digits/letters pair with one space and upper-cases the
/// whole key. Already-normalized keys come back unchanged.
pub fn normalize_dataset_key(raw: &str) -> String {
    DIGITS_THEN_LETTERS
        .replacen(raw, 1, "$1 $2")
        .to_uppercase()
}
