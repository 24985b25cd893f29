//! Protocol version tags.

use crate::error::{CryptoError, CryptoResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A supported protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProtocolVersion {
    /// 001: CBC with detached MAC and zero IV.
    V001,
    /// 002: CBC with inline MAC.
    V002,
    /// 003: CBC with inline MAC and derived salt.
    V003,
    /// 004: AES-GCM with authenticated data.
    V004,
}

impl ProtocolVersion {
    /// Every supported version, oldest first.
    pub const ALL: [ProtocolVersion; 4] = [
        ProtocolVersion::V001,
        ProtocolVersion::V002,
        ProtocolVersion::V003,
        ProtocolVersion::V004,
    ];

    /// The version used for new accounts and keys.
    pub fn latest() -> Self {
        ProtocolVersion::V004
    }

    /// Wire tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V001 => "001",
            ProtocolVersion::V002 => "002",
            ProtocolVersion::V003 => "003",
            ProtocolVersion::V004 => "004",
        }
    }

    /// Parses a wire tag.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::UnsupportedVersion`] for unknown tags.
    pub fn parse(tag: &str) -> CryptoResult<Self> {
        match tag {
            "001" => Ok(ProtocolVersion::V001),
            "002" => Ok(ProtocolVersion::V002),
            "003" => Ok(ProtocolVersion::V003),
            "004" => Ok(ProtocolVersion::V004),
            other => Err(CryptoError::UnsupportedVersion(other.to_string())),
        }
    }

    /// Reads the version prefix of a ciphertext string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is too short or the prefix is unknown.
    pub fn of_ciphertext(ciphertext: &str) -> CryptoResult<Self> {
        let tag = ciphertext
            .get(..3)
            .ok_or_else(|| CryptoError::malformed("ciphertext shorter than version tag"))?;
        Self::parse(tag)
    }

    /// Minimum key-derivation cost for new keys.
    pub fn cost_minimum(&self) -> u32 {
        match self {
            ProtocolVersion::V001 | ProtocolVersion::V002 => 3_000,
            ProtocolVersion::V003 => 110_000,
            ProtocolVersion::V004 => 500_000,
        }
    }

    /// True for versions that MAC with a separate authentication key.
    pub fn is_legacy(&self) -> bool {
        *self < ProtocolVersion::V004
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Self::parse(&tag).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        for version in ProtocolVersion::ALL {
            assert_eq!(ProtocolVersion::parse(version.as_str()).unwrap(), version);
        }
        assert!(matches!(
            ProtocolVersion::parse("005"),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn ciphertext_prefix() {
        assert_eq!(
            ProtocolVersion::of_ciphertext("003:abc").unwrap(),
            ProtocolVersion::V003
        );
        assert_eq!(
            ProtocolVersion::of_ciphertext("001U2FsdGVk").unwrap(),
            ProtocolVersion::V001
        );
        assert!(ProtocolVersion::of_ciphertext("00").unwrap_err().is_fatal());
    }

    #[test]
    fn cost_minimums() {
        assert_eq!(ProtocolVersion::V001.cost_minimum(), 3_000);
        assert_eq!(ProtocolVersion::V003.cost_minimum(), 110_000);
        assert_eq!(ProtocolVersion::V004.cost_minimum(), 500_000);
        assert!(ProtocolVersion::V003.is_legacy());
        assert!(!ProtocolVersion::latest().is_legacy());
    }
}
