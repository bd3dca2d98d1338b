//! Packs: named logical queues of actions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A registered pack. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub id: PackId,
    /// Display name. Unique across packs; workers address packs by it.
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Newtype for pack identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackId(pub String);

impl PackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for PackId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Request to register a pack. The id defaults to the name.
#[derive(Debug, Clone)]
pub struct NewPack {
    pub(crate) id: Option<PackId>,
    pub(crate) name: String,
}

impl NewPack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn id(mut self, id: impl Into<PackId>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl From<String> for PackId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
