//! Datastore items: namespaced JSON documents shared with packs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Address of a datastore item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    pub namespace: String,
    pub key: String,
}

impl ItemKey {
    /// Build a key, rejecting empty segments and embedded slashes.
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Result<Self> {
        let namespace = namespace.into();
        let key = key.into();
        validate_segment("namespace", &namespace)?;
        validate_segment("key", &key)?;
        Ok(Self { namespace, key })
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.key)
    }
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::InvalidInput(format!("{what} must not be empty")));
    }
    if value.contains('/') {
        return Err(Error::InvalidInput(format!(
            "{what} {value:?} must not contain '/'"
        )));
    }
    Ok(())
}

/// A stored item. `content` is the body exactly as it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataItem {
    pub key: ItemKey,
    pub content: String,
    pub content_type: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create or replace an item.
#[derive(Debug, Clone)]
pub struct NewDataItem {
    pub(crate) key: ItemKey,
    pub(crate) content: String,
    pub(crate) content_type: String,
    pub(crate) description: Option<String>,
}

impl NewDataItem {
    pub fn new(key: ItemKey, content: impl Into<String>) -> Self {
        Self {
            key,
            content: content.into(),
            content_type: "application/json".to_string(),
            description: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Whether a put created a new item or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Replaced,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_key_rejects_bad_segments() {
        assert!(ItemKey::new("", "k").is_err());
        assert!(ItemKey::new("ns", "").is_err());
        assert!(ItemKey::new("ns", "a/b").is_err());
        let key = ItemKey::new("techops", "rota").unwrap();
        assert_eq!(key.to_string(), "techops/rota");
    }
}
