//! Diacritic-insensitive title normalization.

use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::canonical_combining_class;

/// Strip diacritics from a title.
///
/// The text is decomposed (NFD), marks with a nonzero canonical combining
/// class are dropped and the remainder is recomposed (NFC), so `"señor"`
/// becomes `"senor"`. Spacing vowel signs such as Devanagari matras have
/// class 0 and are kept.
pub fn normalize_title(title: &str) -> String {
    title
        .nfd()
        .filter(|c| canonical_combining_class(*c) == 0)
        .nfc()
        .collect()
}

/// Lowercase normalized form stored alongside each book for local matching.
pub fn search_key(title: &str) -> String {
    normalize_title(title.trim()).to_lowercase()
}
