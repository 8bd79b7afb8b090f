//! In-memory credential store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use keyward_auth::{CredentialRecord, CredentialStore, StoreError};
use keyward_core::Username;

/// Credential records held in process memory.
///
/// `set_offline(true)` makes every call fail with a storage error, which is
/// how tests exercise the fail-closed paths.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    records: RwLock<HashMap<Username, CredentialRecord>>,
    offline: AtomicBool,
    updates: AtomicU64,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of successful `update` calls so far.
    pub fn update_count(&self) -> u64 {
        self.updates.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Storage("credential store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Storage("credential store lock poisoned".to_string())
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn get(&self, username: &Username) -> Result<Option<CredentialRecord>, StoreError> {
        self.check_online()?;
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(username).cloned())
    }

    async fn create(&self, record: CredentialRecord) -> Result<(), StoreError> {
        self.check_online()?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        if records.contains_key(&record.username) {
            return Err(StoreError::AlreadyExists(record.username.to_string()));
        }
        records.insert(record.username.clone(), record);
        Ok(())
    }

    async fn update(&self, record: CredentialRecord) -> Result<(), StoreError> {
        self.check_online()?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.get_mut(&record.username) {
            Some(existing) => {
                *existing = record;
                self.updates.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            None => Err(StoreError::NotFound(record.username.to_string())),
        }
    }

    async fn delete(&self, username: &Username) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut records = self.records.write().map_err(|_| poisoned())?;
        Ok(records.remove(username).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn crud_round() {
        let store = InMemoryCredentialStore::new();
        let record = CredentialRecord::new("frank", "$argon2id$placeholder", 1, Utc::now());

        store.create(record.clone()).await.unwrap();
        assert!(matches!(store.create(record.clone()).await, Err(StoreError::AlreadyExists(_))));

        let updated = record.rehashed("$argon2id$other".to_string(), 2, Utc::now());
        store.update(updated).await.unwrap();
        assert_eq!(store.get(&record.username).await.unwrap().unwrap().hash_version, 2);
        assert_eq!(store.update_count(), 1);

        assert!(store.delete(&record.username).await.unwrap());
        assert!(!store.delete(&record.username).await.unwrap());
        assert!(matches!(store.update(record).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn offline_store_fails_instead_of_reporting_absence() {
        let store = InMemoryCredentialStore::new();
        store.set_offline(true);
        assert!(matches!(store.get(&Username::new("x")).await, Err(StoreError::Storage(_))));
    }
}
