// ABOUTME: Content fingerprinting for error deduplication.
// ABOUTME: Strips volatile substrings from messages, then hashes the result with the severity level.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Normalized messages are cut to this many characters before hashing.
pub const MAX_NORMALIZED_LEN: usize = 500;

/// Volatile substrings and their placeholders, applied in order.
///
/// Line/column pairs must be rewritten before ports, otherwise `:10:5` would
/// be read as two ports. A port only counts when it follows a host: an IPv4
/// address, `localhost`, a bracketed IPv6 address, or a dotted name. Bare
/// `word:123` pairs such as status codes stay significant.
static VOLATILE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(
                r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:?\d{2})?",
            )
            .unwrap(),
            "<TIMESTAMP>",
        ),
        (Regex::new(r"\b\d{13}\b").unwrap(), "<EPOCH_MS>"),
        (Regex::new(r":\d+:\d+").unwrap(), ":<LINE>:<COL>"),
        (
            Regex::new(
                r"(?i)(\b(?:\d{1,3}\.){3}\d{1,3}|\blocalhost|\]|\b[a-z0-9-]+(?:\.[a-z0-9-]+)+):\d{2,5}\b",
            )
            .unwrap(),
            "${1}:<PORT>",
        ),
        (Regex::new(r"\?v=[0-9a-fA-F]+").unwrap(), "?v=<HASH>"),
    ]
});

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Rewrite a message into the form used for hashing.
///
/// Timestamps, epoch milliseconds, line/column positions, ports and
/// cache-busting query hashes are replaced with fixed tokens, whitespace runs
/// collapse to one space, and the result is trimmed and truncated to
/// [`MAX_NORMALIZED_LEN`] characters. The stored message is never normalized.
pub fn normalize_message(message: &str) -> String {
    let mut normalized = message.to_string();
    for (pattern, placeholder) in VOLATILE_PATTERNS.iter() {
        normalized = pattern.replace_all(&normalized, *placeholder).into_owned();
    }
    let collapsed = WHITESPACE.replace_all(&normalized, " ");
    collapsed.trim().chars().take(MAX_NORMALIZED_LEN).collect()
}

/// Compute the dedup hash for a message at a given severity level.
///
/// Returns a 64-character lowercase hex SHA-256 digest.
pub fn error_hash(message: &str, level: i32) -> String {
    let normalized = normalize_message(message);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|");
    hasher.update(level.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
