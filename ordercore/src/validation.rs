//! Shared validation predicates for domain types.
//!
//! Column limits are measured the way the storage layer measures them, so a
//! value that constructs is a value that persists.

/// Maximum byte length of an idempotency key column.
pub(crate) const MAX_KEY_BYTES: usize = 255;

/// Maximum character length of an adjustment reason.
pub(crate) const MAX_REASON_CHARS: usize = 1000;

/// Validation predicate: idempotency keys are opaque, so surrounding
/// whitespace is kept, but a key of only whitespace carries no identity.
/// Bounded in bytes, not characters.
pub(crate) fn is_usable_key(s: &str) -> bool {
    !s.trim().is_empty() && s.len() <= MAX_KEY_BYTES
}

/// Validation predicate: adjustment reasons stay within the text column.
pub(crate) fn fits_reason_column(s: &str) -> bool {
    s.chars().count() <= MAX_REASON_CHARS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_length_counts_bytes() {
        assert!(is_usable_key(&"a".repeat(255)));
        assert!(!is_usable_key(&"a".repeat(256)));
        assert!(!is_usable_key(&"ü".repeat(200)));
    }

    #[test]
    fn blank_keys_are_unusable() {
        assert!(!is_usable_key(" \t "));
        assert!(is_usable_key(" key "));
    }

    #[test]
    fn reason_length_counts_characters() {
        assert!(fits_reason_column(""));
        assert!(fits_reason_column(&"ü".repeat(1000)));
        assert!(!fits_reason_column(&"x".repeat(1001)));
    }
}
