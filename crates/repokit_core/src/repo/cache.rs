//! Caller-owned identity cache.
//!
//! # Responsibility
//! - Hold loaded entities of one type keyed by identifier.
//! - Drop every entry when a bulk statement touched that type.
//!
//! # Invariants
//! - Entries without an identifier are never cached.
//! - Invalidation for another entity name leaves the cache untouched.

use crate::metadata::Entity;
use crate::model::value::Value;
use crate::repo::bulk::InvalidationHook;
use crate::repo::RepoResult;
use log::debug;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identity cache for entities of type `E`.
///
/// Register it (wrapped in an `Arc`) as the repository's invalidation hook so
/// bulk statements clear it before they return.
#[derive(Debug)]
pub struct EntityCache<E> {
    entries: RwLock<HashMap<String, E>>,
}

impl<E: Entity + Clone> EntityCache<E> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, id: &Value) -> Option<E> {
        self.read().get(&cache_key(id)).cloned()
    }

    /// Caches `entity` under its identifier. Unsaved entities are ignored.
    pub fn put(&self, entity: E) {
        if let Some(id) = entity.id() {
            self.write().insert(cache_key(&id), entity);
        }
    }

    pub fn remove(&self, id: &Value) -> Option<E> {
        self.write().remove(&cache_key(id))
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Returns the cached entity or loads and caches it.
    pub fn get_or_load<F>(&self, id: &Value, load: F) -> RepoResult<Option<E>>
    where
        F: FnOnce() -> RepoResult<Option<E>>,
    {
        if let Some(hit) = self.get(id) {
            return Ok(Some(hit));
        }
        let loaded = load()?;
        if let Some(entity) = &loaded {
            self.put(entity.clone());
        }
        Ok(loaded)
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, E>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, E>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: Entity + Clone> Default for EntityCache<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> InvalidationHook for EntityCache<E>
where
    E: Entity + Clone + Send + Sync,
{
    fn on_bulk_invalidate(&self, entity: &str) {
        if entity != E::NAME {
            return;
        }
        let dropped = {
            let mut entries = self.write();
            let dropped = entries.len();
            entries.clear();
            dropped
        };
        debug!(
            "event=cache_invalidate module=repo status=ok entity={} dropped={}",
            entity, dropped
        );
    }
}

/// Storage class plus value, so `1` and `"1"` stay distinct entries.
fn cache_key(id: &Value) -> String {
    format!("{}:{id}", id.type_name())
}
