//! Peer address sanitization
//!
//! Session identities issued by the room server may contain separators the
//! peer transport rejects as addresses. Every character outside
//! `[0-9a-zA-Z]` is replaced with a filler so the result is a legal address.
//! The mapping is lossy: distinct identities can collide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Filler used when no other is configured
pub const DEFAULT_FILLER: char = 'G';

/// A transport-legal peer address, the key for every registry lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeerAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Sanitize `raw` using [`DEFAULT_FILLER`].
pub fn sanitize(raw: &str) -> PeerAddress {
    sanitize_with(raw, DEFAULT_FILLER)
}

/// Sanitize `raw`, replacing disallowed characters with `filler`.
///
/// Lengths are counted the way the browser-side transport counts them, in
/// UTF-16 code units, so a character outside the BMP turns into two fillers.
/// `filler` is expected to be ASCII alphanumeric; the config layer enforces it.
pub fn sanitize_with(raw: &str, filler: char) -> PeerAddress {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            for _ in 0..c.len_utf16() {
                out.push(filler);
            }
        }
    }
    PeerAddress(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_separator_characters() {
        assert_eq!(sanitize("abc:123!xyz").as_str(), "abcG123Gxyz");
    }

    #[test]
    fn keeps_length_for_forbidden_only_input() {
        let raw = ":-_!.";
        let addr = sanitize(raw);
        assert_eq!(addr.as_str(), "GGGGG");
        assert_eq!(addr.as_str().len(), raw.len());
    }

    #[test]
    fn counts_utf16_units() {
        assert_eq!(sanitize("é").as_str(), "G");
        assert_eq!(sanitize("a😀b").as_str(), "aGGb");
    }

    #[test]
    fn deterministic_and_idempotent() {
        let raw = "RoomX/session#42";
        assert_eq!(sanitize(raw), sanitize(raw));
        let once = sanitize(raw);
        assert_eq!(sanitize(once.as_str()), once);
        assert!(once.as_str().chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn custom_filler() {
        assert_eq!(sanitize_with("a b", 'x').as_str(), "axb");
    }

    #[test]
    fn distinct_identities_can_collide() {
        assert_eq!(sanitize("a:b"), sanitize("a-b"));
    }
}
