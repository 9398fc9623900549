//! Collection lifecycle, settings, and the two-tier admin ACL
//!
//! Every collection has exactly one genesis admin at all times. Genesis
//! authority covers the admin set, genesis transfer, and deletion; regular
//! admins may ingest and update settings. The genesis principal can only
//! leave the role by transferring it.

use crate::cache::VectorCache;
use crate::domain::{
    validate_collection_id, Collection, CollectionSettings, CollectionWithStats,
    CreateCollectionRequest, Principal,
};
use crate::error::{Result, VecBaseError};
use crate::repositories::DurableStore;
use tracing::{debug, info};

/// Per-operation collection management over the store and cache.
pub struct CollectionManager<'a> {
    store: &'a mut DurableStore,
    cache: &'a mut VectorCache,
}

impl<'a> CollectionManager<'a> {
    pub fn new(store: &'a mut DurableStore, cache: &'a mut VectorCache) -> Self {
        Self { store, cache }
    }

    /// Create a collection; the caller becomes its genesis admin.
    pub fn create_collection(
        &mut self,
        caller: &Principal,
        req: &CreateCollectionRequest,
    ) -> Result<Collection> {
        validate_collection_id(&req.id)?;
        if req.name.trim().is_empty() {
            return Err(VecBaseError::invalid("name", "must not be empty"));
        }

        let settings = req.settings.clone().unwrap_or_default();
        settings.validate()?;

        let collection = Collection::new(
            req.id.clone(),
            req.name.clone(),
            req.description.clone(),
            caller.clone(),
            settings,
        );
        self.store.insert_collection(&collection)?;

        info!("Created collection {} (genesis: {})", collection.id, caller);
        Ok(collection)
    }

    /// Look up a collection or fail with `NotFound`.
    pub fn get(&self, collection_id: &str) -> Result<Collection> {
        self.store
            .get_collection(collection_id)?
            .ok_or_else(|| VecBaseError::not_found(format!("collection '{collection_id}'")))
    }

    pub fn list(&self) -> Result<Vec<Collection>> {
        self.store.list_collections()
    }

    pub fn get_with_stats(&self, collection_id: &str) -> Result<CollectionWithStats> {
        let collection = self.get(collection_id)?;
        let document_count = self.store.document_count(collection_id)?;
        let vector_count = self.store.vector_count(collection_id)?;
        Ok(CollectionWithStats {
            collection,
            document_count,
            vector_count,
        })
    }

    pub fn list_with_stats(&self) -> Result<Vec<CollectionWithStats>> {
        self.list()?
            .into_iter()
            .map(|c| self.get_with_stats(&c.id))
            .collect()
    }

    /// Update display metadata. Admin-only.
    pub fn update_metadata(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Collection> {
        let mut collection = self.require_admin(collection_id, caller)?;

        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(VecBaseError::invalid("name", "must not be empty"));
            }
            collection.name = name;
        }
        if description.is_some() {
            collection.description = description;
        }
        self.touch_and_save(collection)
    }

    /// Replace the collection's settings. Admin-only.
    ///
    /// Chunking geometry and the embedding model are frozen once vectors
    /// exist, since changing them would break the dimensionality and
    /// embedded-state invariants.
    pub fn update_settings(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        settings: CollectionSettings,
    ) -> Result<Collection> {
        let mut collection = self.require_admin(collection_id, caller)?;
        settings.validate()?;

        let frozen_changed = settings.chunk_size != collection.settings.chunk_size
            || settings.chunk_overlap != collection.settings.chunk_overlap
            || settings.embedding_model != collection.settings.embedding_model;
        if frozen_changed && self.store.vector_count(collection_id)? > 0 {
            return Err(VecBaseError::invalid(
                "settings",
                "chunk_size, chunk_overlap, and embedding_model cannot change while vectors exist",
            ));
        }

        collection.settings = settings;
        let saved = self.touch_and_save(collection)?;
        self.cache.invalidate(collection_id);
        Ok(saved)
    }

    /// Add a regular admin. Genesis-only; duplicates are a no-op.
    pub fn add_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        principal: &Principal,
    ) -> Result<Collection> {
        let mut collection = self.require_genesis(collection_id, caller)?;

        if collection.genesis_admin == *principal || collection.admins.contains(principal) {
            debug!("Principal {} is already an admin of {}", principal, collection_id);
            return Ok(collection);
        }

        collection.admins.insert(principal.clone());
        self.touch_and_save(collection)
    }

    /// Remove a regular admin. Genesis-only; the genesis principal itself
    /// cannot be removed, only transferred away from.
    pub fn remove_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        principal: &Principal,
    ) -> Result<Collection> {
        let mut collection = self.require_genesis(collection_id, caller)?;

        if collection.genesis_admin == *principal {
            return Err(VecBaseError::invalid(
                "principal",
                "the genesis admin cannot be removed; transfer it first",
            ));
        }

        collection.admins.remove(principal);
        self.touch_and_save(collection)
    }

    /// Hand the genesis role to an existing admin. The old genesis stays on
    /// as a regular admin.
    pub fn transfer_genesis_admin(
        &mut self,
        caller: &Principal,
        collection_id: &str,
        new_genesis: &Principal,
    ) -> Result<Collection> {
        let mut collection = self.require_genesis(collection_id, caller)?;

        if *new_genesis == collection.genesis_admin {
            return Ok(collection);
        }
        if !collection.admins.contains(new_genesis) {
            return Err(VecBaseError::invalid(
                "principal",
                "the new genesis must already be an admin",
            ));
        }

        collection.admins.remove(new_genesis);
        let old_genesis = std::mem::replace(&mut collection.genesis_admin, new_genesis.clone());
        collection.admins.insert(old_genesis);

        info!(
            "Transferred genesis of {} to {}",
            collection_id, new_genesis
        );
        self.touch_and_save(collection)
    }

    /// Destroy a collection and everything it owns. Genesis-only.
    pub fn delete_collection(&mut self, caller: &Principal, collection_id: &str) -> Result<()> {
        self.require_genesis(collection_id, caller)?;
        self.store.delete_collection_cascade(collection_id)?;
        self.cache.invalidate(collection_id);
        Ok(())
    }

    fn require_admin(&self, collection_id: &str, caller: &Principal) -> Result<Collection> {
        let collection = self.get(collection_id)?;
        if !collection.is_admin(caller) {
            return Err(VecBaseError::NotAuthorized);
        }
        Ok(collection)
    }

    fn require_genesis(&self, collection_id: &str, caller: &Principal) -> Result<Collection> {
        let collection = self.get(collection_id)?;
        if collection.genesis_admin != *caller {
            return Err(VecBaseError::NotAuthorized);
        }
        Ok(collection)
    }

    fn touch_and_save(&mut self, mut collection: Collection) -> Result<Collection> {
        collection.updated_at = crate::domain::now_nanos();
        self.store.put_collection(&collection)?;
        Ok(collection)
    }
}
