//! Fixed scan patterns for probe output.
//!
//! A probe prints one line. Depending on the field it feeds, the line is
//! scanned either for its first whitespace-delimited word or for a leading
//! unsigned integer; anything else is a parse failure.

use once_cell::sync::Lazy;
use regex::Regex;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\S+)").expect("Invalid regex pattern"));

static UNSIGNED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\+?(\d+)").expect("Invalid regex pattern"));

/// First whitespace-delimited token of `line`.
pub fn word(line: &str) -> Option<String> {
    WORD_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Leading decimal unsigned integer of `line`, if it fits in 64 bits.
pub fn unsigned(line: &str) -> Option<u64> {
    UNSIGNED_RE
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}
