//! Mapping of caller keys onto file-name-safe strings

use sha2::{Digest, Sha256};

/// Turns a caller-supplied key into a string usable as a file name stem.
///
/// Implementations must be deterministic and must not emit `.`, since the
/// TTL suffix is split off at the last dot of the file name.
pub trait KeySanitizer: Send + Sync {
    fn sanitize(&self, raw: &str) -> String;
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
///
/// Readable on disk, but distinct raw keys may collapse onto the same
/// sanitized key (`a.b` and `a/b` both become `a_b`).
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameSanitizer;

impl KeySanitizer for FileNameSanitizer {
    fn sanitize(&self, raw: &str) -> String {
        if raw.is_empty() {
            return "_".to_string();
        }
        raw.chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

/// Lowercase hex SHA-256 of the raw key.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashSanitizer;

impl KeySanitizer for HashSanitizer {
    fn sanitize(&self, raw: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_sanitizer() {
        let s = FileNameSanitizer;
        assert_eq!(s.sanitize("abc"), "abc");
        assert_eq!(s.sanitize("with-dash_and_under"), "with-dash_and_under");
        assert_eq!(
            s.sanitize("https://example.com/a.png"),
            "https___example_com_a_png"
        );
        assert_eq!(s.sanitize("héllo"), "h_llo");
        assert_eq!(s.sanitize(""), "_");
        assert!(!s.sanitize("a.b.c").contains('.'));
    }

    #[test]
    fn test_hash_sanitizer() {
        let s = HashSanitizer;
        let key1 = s.sanitize("did:plc:abc123/bafyreiabc");
        let key2 = s.sanitize("did:plc:abc123/bafyreiabc");
        let key3 = s.sanitize("did:plc:xyz789/bafyreixyz");

        // Same inputs produce same key
        assert_eq!(key1, key2);
        assert_ne!(key1, key3);

        // Keys are hex strings (64 chars for SHA256)
        assert_eq!(key1.len(), 64);
        assert!(key1.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
