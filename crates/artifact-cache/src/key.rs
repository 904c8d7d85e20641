//! Fingerprint derivation for (text, language) pairs

use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a rendered fingerprint (hex-encoded SHA-256)
pub const FINGERPRINT_LEN: usize = 64;

/// Stable identifier for a (text, language) pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Accept an already-rendered fingerprint, e.g. recovered from a filename
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == FINGERPRINT_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Derive the fingerprint for a (text, language) pair.
///
/// Both fields are length-prefixed so no two distinct pairs share an
/// encoding. Input validation happens before this is called.
pub fn fingerprint(text: &str, language: &str) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update((language.len() as u64).to_le_bytes());
    hasher.update(language.as_bytes());
    hasher.update((text.len() as u64).to_le_bytes());
    hasher.update(text.as_bytes());
    Fingerprint(hex::encode(hasher.finalize()))
}
