//! Datastore: namespaced JSON documents packs can read and write.
//!
//! Plain create/replace/get/delete. Bodies are validated as JSON on the way
//! in and returned byte-for-byte on the way out.

use std::sync::Arc;

use opentelemetry::KeyValue;
use serde::de::IgnoredAny;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::datastore::{DataItem, ItemKey, NewDataItem, PutOutcome};
use crate::store::DatastoreStore;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct Datastore {
    store: Arc<dyn DatastoreStore>,
}

impl Datastore {
    pub fn new(store: Arc<dyn DatastoreStore>) -> Self {
        Self { store }
    }

    /// Create or replace an item. Content must be valid JSON.
    pub async fn put(&self, item: NewDataItem) -> Result<PutOutcome> {
        if let Err(e) = serde_json::from_str::<IgnoredAny>(&item.content) {
            count("put", "invalid");
            return Err(Error::InvalidInput(format!(
                "datastore item {} is not valid JSON: {e}",
                item.key
            )));
        }

        let key = item.key.clone();
        let outcome = self.store.put_item(item).await?;
        let result = match outcome {
            PutOutcome::Created => "created",
            PutOutcome::Replaced => "replaced",
        };
        count("put", result);
        debug!(key = %key, result, "datastore item stored");
        Ok(outcome)
    }

    pub async fn get(&self, key: &ItemKey) -> Result<DataItem> {
        match self.store.get_item(key).await? {
            Some(item) => {
                count("get", "ok");
                Ok(item)
            }
            None => {
                count("get", "not_found");
                Err(Error::NotFound(format!("datastore item {key}")))
            }
        }
    }

    pub async fn delete(&self, key: &ItemKey) -> Result<()> {
        if self.store.delete_item(key).await? {
            count("delete", "ok");
            debug!(key = %key, "datastore item deleted");
            Ok(())
        } else {
            count("delete", "not_found");
            Err(Error::NotFound(format!("datastore item {key}")))
        }
    }
}

fn count(operation: &'static str, result: &'static str) {
    metrics::datastore_operations().add(
        1,
        &[
            KeyValue::new("operation", operation),
            KeyValue::new("result", result),
        ],
    );
}
