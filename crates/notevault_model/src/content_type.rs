//! Content type tags.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Tag selecting an item's schema and behavior.
///
/// Known types serialize to their wire strings; anything else round-trips
/// through [`ContentType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContentType {
    /// A note.
    Note,
    /// A tag referencing notes.
    Tag,
    /// A tag whose membership is a predicate.
    SmartTag,
    /// An installed editor or extension.
    Component,
    /// An installed theme.
    Theme,
    /// A content-encryption key.
    ItemsKey,
    /// Account-wide preferences (singleton).
    UserPreferences,
    /// Privilege settings (singleton).
    Privileges,
    /// The wrapped storage values blob.
    EncryptedStorage,
    /// Any other content type.
    Other(String),
}

impl ContentType {
    /// Returns the wire string.
    pub fn as_str(&self) -> &str {
        match self {
            ContentType::Note => "Note",
            ContentType::Tag => "Tag",
            ContentType::SmartTag => "SN|SmartTag",
            ContentType::Component => "SN|Component",
            ContentType::Theme => "SN|Theme",
            ContentType::ItemsKey => "SN|ItemsKey",
            ContentType::UserPreferences => "SN|UserPreferences",
            ContentType::Privileges => "SN|Privileges",
            ContentType::EncryptedStorage => "SN|EncryptedStorage",
            ContentType::Other(other) => other,
        }
    }

    /// Parses a wire string.
    pub fn parse(value: &str) -> Self {
        match value {
            "Note" => ContentType::Note,
            "Tag" => ContentType::Tag,
            "SN|SmartTag" => ContentType::SmartTag,
            "SN|Component" => ContentType::Component,
            "SN|Theme" => ContentType::Theme,
            "SN|ItemsKey" => ContentType::ItemsKey,
            "SN|UserPreferences" => ContentType::UserPreferences,
            "SN|Privileges" => ContentType::Privileges,
            "SN|EncryptedStorage" => ContentType::EncryptedStorage,
            other => ContentType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for ContentType {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl Serialize for ContentType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ContentType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::parse(&value))
    }
}
