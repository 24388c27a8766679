//! 12-byte document identifiers.

use crate::error::{Error, Result, UsageError, UsageErrorKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A 12-byte identifier: 4 bytes of seconds since the epoch, 5 bytes of
/// per-generator randomness and a 3-byte big-endian counter.
///
/// Generation lives with the identity generator that owns the counter;
/// this type only knows how to assemble and render the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Assemble an id from its three components. Only the low 24 bits of
    /// `counter` are used.
    pub fn from_parts(seconds: u32, random: [u8; 5], counter: u32) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&random);
        let counter = counter.to_be_bytes();
        bytes[9..12].copy_from_slice(&counter[1..4]);
        Self(bytes)
    }

    /// Parse a 24-character hex string.
    pub fn parse_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| {
            Error::Usage(UsageError::new(
                UsageErrorKind::InvalidIdentifier,
                format!("Invalid object id '{}': {}", s, e),
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Check whether a string is a well-formed hex object id.
    pub fn is_valid(s: &str) -> bool {
        s.len() == 24 && s.bytes().all(|b| b.is_ascii_hexdigit())
    }

    pub const fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Seconds since the epoch encoded in the first four bytes.
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]])
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for ObjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_layout() {
        let id = ObjectId::from_parts(0x0102_0304, [5, 6, 7, 8, 9], 0x00AB_CDEF);
        assert_eq!(id.bytes(), [1, 2, 3, 4, 5, 6, 7, 8, 9, 0xAB, 0xCD, 0xEF]);
        assert_eq!(id.timestamp(), 0x0102_0304);
    }

    #[test]
    fn counter_is_truncated_to_24_bits() {
        let id = ObjectId::from_parts(0, [0; 5], 0xFF00_0001);
        assert_eq!(&id.bytes()[9..], &[0, 0, 1]);
    }

    #[test]
    fn hex_parse_and_render() {
        let s = "5f1d7a3b9c0e4a2b1c3d4e5f";
        let id = ObjectId::parse_str(s).unwrap();
        assert_eq!(id.to_hex(), s);
        assert_eq!(id.to_string(), s);
        assert!(ObjectId::is_valid(s));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(!ObjectId::is_valid("xyz"));
        let err = ObjectId::parse_str("not-an-id").unwrap_err();
        assert_eq!(err.usage_kind(), Some(UsageErrorKind::InvalidIdentifier));
    }
}
