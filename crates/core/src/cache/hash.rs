//! Content-addressed cache key generation.
//!
//! Cache keys come from the analyzed label text, so two scans whose text
//! differs only in case, accents, whitespace or punctuation share a key.

use sha2::{Digest, Sha256};
use unicode_normalization::{UnicodeNormalization, char::is_combining_mark};

/// Normalize label text for keying.
///
/// Trim, decompose (NFD), drop combining marks, lowercase, then keep only
/// alphanumeric characters.
pub fn normalize_source_text(text: &str) -> String {
    text.trim()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Compute the cache key for a piece of label text.
///
/// A 31-multiplier rolling hash over UTF-16 code units with 32-bit
/// wraparound, rendered in base 36. Collisions are tolerated; this is not
/// a cryptographic digest.
pub fn compute_cache_key(source_text: &str) -> String {
    let normalized = normalize_source_text(source_text);
    let hash = normalized
        .encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(31).wrapping_add(u32::from(unit)));
    to_base36(hash)
}

/// SHA-256 of a label image, used as the correlation key across devices.
pub fn compute_label_hash(image: &[u8]) -> String {
    hex::encode(Sha256::digest(image))
}

fn to_base36(mut value: u32) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".into();
    }
    let mut out = Vec::with_capacity(7);
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_accents_case_and_punctuation() {
        assert_eq!(normalize_source_text("  Château Margaux, 2015!  "), "chateaumargaux2015");
        assert_eq!(normalize_source_text("Grüner Veltliner"), "grunerveltliner");
    }

    #[test]
    fn test_key_stable_across_equivalent_text() {
        let variants = [
            "Château Margaux 2015",
            "chateau margaux 2015",
            "CHATEAU-MARGAUX (2015)",
            "  Cha\u{0302}teau   Margaux\t2015 ",
        ];
        let expected = compute_cache_key(variants[0]);
        for variant in variants {
            assert_eq!(compute_cache_key(variant), expected, "variant {variant:?}");
        }
    }

    #[test]
    fn test_key_differs_for_different_text() {
        assert_ne!(compute_cache_key("Margaux 2015"), compute_cache_key("Margaux 2016"));
    }

    #[test]
    fn test_key_format() {
        let key = compute_cache_key("Barolo Riserva");
        assert!(!key.is_empty());
        assert!(key.len() <= 7);
        assert!(key.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
    }

    #[test]
    fn test_known_values() {
        assert_eq!(compute_cache_key(""), "0");
        assert_eq!(compute_cache_key("!!!"), "0");
        // 'a' = 97 = 2 * 36 + 25
        assert_eq!(compute_cache_key("A"), "2p");
        // 'a' * 31 + 'b' = 3105 = 2 * 1296 + 14 * 36 + 9
        assert_eq!(compute_cache_key("ab"), "2e9");
    }

    #[test]
    fn test_base36_max() {
        assert_eq!(to_base36(u32::MAX), "1z141z3");
    }

    #[test]
    fn test_label_hash_format() {
        let hash = compute_label_hash(b"label bytes");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, compute_label_hash(b"label bytes"));
        assert_ne!(hash, compute_label_hash(b"other label"));
    }
}
