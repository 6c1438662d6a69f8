//! Core type definitions for Tessera
//!
//! Enumerations describing model roles, field annotations, encodings and
//! write/fetch policies, plus the record key used by storage backends.

use crate::error::Error;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a model type plays in the system
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    /// No role annotation
    #[default]
    Unspecified,
    /// Persistent business object, addressed by a key
    Object,
    /// Key record for an `Object`
    ObjectKey,
    /// Append-style event record
    Event,
    /// Key record for an `Event`
    EventKey,
    /// Row in a relational-like table
    Table,
    /// Transport-only message, never persisted on its own
    Wire,
}

impl Role {
    /// Roles whose schema may embed a KEY field
    pub const KEYED: &'static [Self] = &[Self::Object, Self::Event, Self::Table];

    /// Roles whose schema may carry an ID field, directly or through a key
    pub const IDENTIFIED: &'static [Self] = &[
        Self::Object,
        Self::ObjectKey,
        Self::Event,
        Self::EventKey,
        Self::Table,
    ];

    /// Roles describing key records
    pub const KEYS: &'static [Self] = &[Self::ObjectKey, Self::EventKey];

    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unspecified => "UNSPECIFIED",
            Self::Object => "OBJECT",
            Self::ObjectKey => "OBJECT_KEY",
            Self::Event => "EVENT",
            Self::EventKey => "EVENT_KEY",
            Self::Table => "TABLE",
            Self::Wire => "WIRE",
        }
    }

    /// Check if this role describes a key record
    #[must_use]
    pub fn is_key(self) -> bool {
        Self::KEYS.contains(&self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Annotation on a schema field
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldKind {
    /// Ordinary data field
    #[default]
    Standard,
    /// Identifier field (string or numeric)
    Id,
    /// Embedded key record
    Key,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Standard => "STANDARD",
            Self::Id => "ID",
            Self::Key => "KEY",
        })
    }
}

/// Serialization format of an encoded model
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingMode {
    /// Compact binary encoding
    #[default]
    Binary,
    /// JSON object keyed by field name
    Json,
    /// Human-readable text format
    Text,
}

impl fmt::Display for EncodingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Binary => "binary",
            Self::Json => "json",
            Self::Text => "text",
        })
    }
}

impl FromStr for EncodingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" | "bin" => Ok(Self::Binary),
            "json" => Ok(Self::Json),
            "text" | "txt" => Ok(Self::Text),
            other => Err(Error::invalid_argument(format!(
                "unknown encoding mode: {other}"
            ))),
        }
    }
}

/// Existence precondition applied to a write
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WriteDisposition {
    /// Write unconditionally
    #[default]
    Blind,
    /// The record must already exist
    MustExist,
    /// The record must not exist yet
    MustNotExist,
}

impl fmt::Display for WriteDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Blind => "BLIND",
            Self::MustExist => "MUST_EXIST",
            Self::MustNotExist => "MUST_NOT_EXIST",
        })
    }
}

impl FromStr for WriteDisposition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "blind" => Ok(Self::Blind),
            "must-exist" => Ok(Self::MustExist),
            "must-not-exist" => Ok(Self::MustNotExist),
            other => Err(Error::invalid_argument(format!(
                "unknown write disposition: {other}"
            ))),
        }
    }
}

/// Expectation that failed when a write conflicts
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WriteExpectation {
    /// Record was expected to exist but did not
    MustExist,
    /// Record was expected to be absent but was present
    MustNotExist,
    /// Record's last update time did not match the precondition
    UpdateTime,
}

impl fmt::Display for WriteExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::MustExist => "record to exist",
            Self::MustNotExist => "record to be absent",
            Self::UpdateTime => "matching update time",
        })
    }
}

/// How a field mask is applied to a read
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaskMode {
    /// Keep only the masked fields
    #[default]
    Include,
    /// Drop the masked fields
    Exclude,
}

impl FromStr for MaskMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include" => Ok(Self::Include),
            "exclude" => Ok(Self::Exclude),
            other => Err(Error::invalid_argument(format!("unknown mask mode: {other}"))),
        }
    }
}

/// Cache eviction policy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionMode {
    /// Evict the entry closest to expiry
    #[default]
    Ttl,
    /// Evict the least recently used entry
    Lru,
    /// Evict the least frequently used entry
    Lfu,
}

/// Classified reason for a failed persistence operation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PersistenceFailure {
    /// The operation was cancelled before it resolved
    Cancelled,
    /// The operation exceeded its time budget
    Timeout,
    /// The executing task was interrupted (shutdown, panic)
    Interrupted,
    /// The backend is temporarily unavailable
    Unavailable,
    /// Any other backend failure
    Internal,
}

impl fmt::Display for PersistenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Interrupted => "INTERRUPTED",
            Self::Unavailable => "UNAVAILABLE",
            Self::Internal => "INTERNAL",
        })
    }
}

/// Storage address of a record: `{key type}/{id}`
///
/// Namespacing by key type keeps unrelated model types apart inside a
/// shared map, cache or table.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display)]
#[display("{_0}")]
pub struct RecordKey(String);

impl RecordKey {
    /// Build a record key from a key type name and an ID
    #[must_use]
    pub fn new(type_name: &str, id: &str) -> Self {
        Self(format!("{type_name}/{id}"))
    }

    /// Get the record key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ID portion of the record key
    #[must_use]
    pub fn id(&self) -> &str {
        self.0.rsplit_once('/').map_or(self.0.as_str(), |(_, id)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_groups() {
        assert!(Role::KEYED.contains(&Role::Object));
        assert!(!Role::KEYED.contains(&Role::ObjectKey));
        assert!(Role::IDENTIFIED.contains(&Role::EventKey));
        assert!(!Role::IDENTIFIED.contains(&Role::Wire));
        assert!(Role::ObjectKey.is_key());
        assert!(!Role::Table.is_key());
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("JSON".parse::<EncodingMode>().unwrap(), EncodingMode::Json);
        assert_eq!(
            "must_not_exist".parse::<WriteDisposition>().unwrap(),
            WriteDisposition::MustNotExist
        );
        assert_eq!("exclude".parse::<MaskMode>().unwrap(), MaskMode::Exclude);
        assert!("yaml".parse::<EncodingMode>().is_err());
    }

    #[test]
    fn test_record_key() {
        let key = RecordKey::new("tessera.test.PersonKey", "abc123");
        assert_eq!(key.as_str(), "tessera.test.PersonKey/abc123");
        assert_eq!(key.id(), "abc123");
        assert_eq!(key.to_string(), "tessera.test.PersonKey/abc123");
    }
}
