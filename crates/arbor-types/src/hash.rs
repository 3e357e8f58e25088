use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::TypeError;

/// Length of the textual form of an [`ObjectHash`].
pub const HASH_LENGTH: usize = 44;

/// Position of the `*` marker inside the textual form.
const SPLICE_AT: usize = 5;

/// Content-addressed identifier for any stored object.
///
/// An `ObjectHash` is the SHA-256 digest of an object's serialized string.
/// Its textual form is the URL-safe, unpadded base64 encoding (43 characters)
/// with a `*` spliced in after the fifth character, giving a fixed 44
/// characters that can never collide with the field separators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHash([u8; 32]);

impl ObjectHash {
    /// Hash a serialized object.
    pub fn of(serialized: &str) -> Self {
        let digest = Sha256::digest(serialized.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Create an `ObjectHash` from a pre-computed digest.
    pub fn from_digest(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// The raw 32-byte digest.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Cheap shape check: 44 characters with `*` at the splice position.
    ///
    /// Used to tell an inline field apart from a hash reference without
    /// decoding it.
    pub fn looks_like_hash(s: &str) -> bool {
        s.len() == HASH_LENGTH && s.as_bytes()[SPLICE_AT] == b'*'
    }

    /// Parse the 44-character textual form.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        if !Self::looks_like_hash(s) {
            return Err(TypeError::InvalidHash(s.to_owned()));
        }
        let mut joined = String::with_capacity(HASH_LENGTH - 1);
        joined.push_str(&s[..SPLICE_AT]);
        joined.push_str(&s[SPLICE_AT + 1..]);
        let bytes = URL_SAFE_NO_PAD
            .decode(joined.as_bytes())
            .map_err(|_| TypeError::InvalidHash(s.to_owned()))?;
        if bytes.len() != 32 {
            return Err(TypeError::InvalidHash(s.to_owned()));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Short form (first 8 characters), for logs.
    pub fn short(&self) -> String {
        let mut s = self.to_string();
        s.truncate(8);
        s
    }

    fn encode(&self) -> String {
        let plain = URL_SAFE_NO_PAD.encode(self.0);
        let mut out = String::with_capacity(HASH_LENGTH);
        out.push_str(&plain[..SPLICE_AT]);
        out.push('*');
        out.push_str(&plain[SPLICE_AT..]);
        out
    }
}

impl fmt::Debug for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHash({})", self.short())
    }
}

impl fmt::Display for ObjectHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ObjectHash {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ObjectHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ObjectHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_is_deterministic() {
        assert_eq!(ObjectHash::of("a/b/c"), ObjectHash::of("a/b/c"));
        assert_ne!(ObjectHash::of("a/b/c"), ObjectHash::of("a/b/d"));
    }

    #[test]
    fn textual_form_is_spliced() {
        let hash = ObjectHash::of("hello");
        let text = hash.to_string();
        assert_eq!(text.len(), HASH_LENGTH);
        assert_eq!(text.as_bytes()[5], b'*');
        assert_eq!(text.matches('*').count(), 1);
        assert!(ObjectHash::looks_like_hash(&text));
    }

    #[test]
    fn known_digest() {
        // sha256("") = e3b0c442...b855
        let hash = ObjectHash::of("");
        assert_eq!(hash.as_bytes()[0], 0xe3);
        assert_eq!(hash.as_bytes()[31], 0x55);
        assert_eq!(hash.to_string(), "47DEQ*pj8HBSa-_TImW-5JCeuQeRkm5NMpJWZG3hSuFU");
    }

    #[test]
    fn parse_roundtrip() {
        let hash = ObjectHash::of("roundtrip");
        let parsed: ObjectHash = hash.to_string().parse().unwrap();
        assert_eq!(hash, parsed);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(ObjectHash::parse("").is_err());
        assert!(ObjectHash::parse("not a hash").is_err());
        let text = ObjectHash::of("x").to_string().replace('*', "A");
        assert!(ObjectHash::parse(&text).is_err());
    }

    #[test]
    fn short_is_8_chars() {
        assert_eq!(ObjectHash::of("x").short().len(), 8);
    }

    #[test]
    fn serde_roundtrip() {
        let hash = ObjectHash::of("serde test");
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{hash}\""));
        let parsed: ObjectHash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, parsed);
    }
}
