//! Concurrent entity storage with per-entity fine-grained locking.
//!
//! [`Registry`] stores entities in a `HashMap` where each entry is
//! individually protected by a [`tokio::sync::RwLock`]. Reads of the same
//! entity run concurrently, writes to different entities run concurrently,
//! and writes to the same entity are serialized. The per-vehicle lock is the
//! mutual-exclusion scope of offer acceptance; the per-wallet lock
//! serializes escrow operations.

use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::DispatchError;

/// Central store for one kind of entity.
#[derive(Debug)]
pub struct Registry<K, V> {
    kind: &'static str,
    entries: RwLock<HashMap<K, Arc<RwLock<V>>>>,
}

impl<K, V> Registry<K, V>
where
    K: Copy + Eq + Hash + Display,
    V: Clone,
{
    /// Creates an empty registry; `kind` names the entity in errors.
    #[must_use]
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidRequest`] if the key is already taken.
    pub async fn insert(&self, key: K, value: V) -> Result<Arc<RwLock<V>>, DispatchError> {
        let mut map = self.entries.write().await;
        if map.contains_key(&key) {
            return Err(DispatchError::InvalidRequest(format!(
                "{} {key} already exists",
                self.kind
            )));
        }
        let entry = Arc::new(RwLock::new(value));
        map.insert(key, Arc::clone(&entry));
        Ok(entry)
    }

    /// Returns the entity behind its own lock.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if the key is unknown.
    pub async fn get(&self, key: K) -> Result<Arc<RwLock<V>>, DispatchError> {
        let map = self.entries.read().await;
        map.get(&key)
            .cloned()
            .ok_or_else(|| DispatchError::not_found(self.kind, key))
    }

    /// Returns a copy of the entity's current state.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if the key is unknown.
    pub async fn snapshot(&self, key: K) -> Result<V, DispatchError> {
        let entry = self.get(key).await?;
        let guard = entry.read().await;
        Ok(guard.clone())
    }

    /// Removes the entity.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotFound`] if the key is unknown.
    pub async fn remove(&self, key: K) -> Result<(), DispatchError> {
        let mut map = self.entries.write().await;
        map.remove(&key)
            .map(|_| ())
            .ok_or_else(|| DispatchError::not_found(self.kind, key))
    }

    /// Returns `true` if the key is present.
    pub async fn contains(&self, key: K) -> bool {
        self.entries.read().await.contains_key(&key)
    }

    /// Handles to every entity, in no particular order.
    pub async fn entries(&self) -> Vec<Arc<RwLock<V>>> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Copies of every entity matching `filter`.
    pub async fn snapshot_where(&self, filter: impl Fn(&V) -> bool) -> Vec<V> {
        let entries = self.entries().await;
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            let guard = entry.read().await;
            if filter(&guard) {
                out.push(guard.clone());
            }
        }
        out
    }

    /// Returns the number of entities.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Returns `true` if the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::ids::WalletId;

    #[tokio::test]
    async fn insert_get_and_snapshot() {
        let registry: Registry<WalletId, u64> = Registry::new("wallet");
        let id = WalletId::new();
        assert!(registry.insert(id, 10).await.is_ok());

        let Ok(entry) = registry.get(id).await else {
            panic!("entry should exist");
        };
        *entry.write().await += 5;
        assert_eq!(registry.snapshot(id).await.ok(), Some(15));
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let registry: Registry<WalletId, u64> = Registry::new("wallet");
        let id = WalletId::new();
        let _ = registry.insert(id, 1).await;
        assert!(matches!(
            registry.insert(id, 2).await,
            Err(DispatchError::InvalidRequest(_))
        ));
        assert_eq!(registry.snapshot(id).await.ok(), Some(1));
    }

    #[tokio::test]
    async fn missing_key_is_not_found() {
        let registry: Registry<WalletId, u64> = Registry::new("wallet");
        assert!(matches!(
            registry.get(WalletId::new()).await,
            Err(DispatchError::NotFound { kind: "wallet", .. })
        ));
        assert!(registry.remove(WalletId::new()).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_where_filters() {
        let registry: Registry<WalletId, u64> = Registry::new("wallet");
        for v in [1, 5, 10] {
            let _ = registry.insert(WalletId::new(), v).await;
        }
        let big = registry.snapshot_where(|v| *v >= 5).await;
        assert_eq!(big.len(), 2);
        assert_eq!(registry.len().await, 3);
        assert!(!registry.is_empty().await);
    }
}
