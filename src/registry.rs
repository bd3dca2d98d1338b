//! Pack registry: resolves pack names to identities before dispatch.

use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::model::pack::{NewPack, Pack, PackId};
use crate::store::{PackStore, Stamp};

/// Thin addressing layer over the pack records. Holds no pack state of its
/// own; every lookup goes to the store.
#[derive(Clone)]
pub struct PackRegistry {
    store: Arc<dyn PackStore>,
}

impl PackRegistry {
    pub fn new(store: Arc<dyn PackStore>) -> Self {
        Self { store }
    }

    /// Register a pack. Fails with `Conflict` if the id or name is taken.
    pub async fn register(&self, new: NewPack) -> Result<Pack> {
        if new.name.trim().is_empty() {
            return Err(Error::InvalidInput("pack name must not be empty".to_string()));
        }
        let pack = Pack {
            id: new.id.unwrap_or_else(|| PackId::new(new.name.clone())),
            name: new.name,
            created_at: Stamp::now().at,
        };
        self.store.insert_pack(&pack).await?;
        info!(pack_id = %pack.id, name = %pack.name, "pack registered");
        Ok(pack)
    }

    /// Resolve a pack by display name.
    pub async fn resolve(&self, name: &str) -> Result<Pack> {
        self.store
            .find_pack_by_name(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pack {name}")))
    }

    /// Look a pack up by identity.
    pub async fn get(&self, id: &PackId) -> Result<Pack> {
        self.store
            .get_pack(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("pack {id}")))
    }

    pub async fn list(&self) -> Result<Vec<Pack>> {
        self.store.list_packs().await
    }
}
