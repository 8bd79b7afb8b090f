use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::Username;

use crate::Role;
use crate::store::StoreError;

/// Locally stored credential.
///
/// `password_hash` is a self-describing PHC string; `hash_version` is the
/// hashing-policy generation that wrote it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub username: Username,
    pub password_hash: String,
    pub hash_version: u32,
    pub display_name: Option<String>,
    pub roles: Vec<Role>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    pub fn new(
        username: impl Into<Username>,
        password_hash: impl Into<String>,
        hash_version: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            username: username.into(),
            password_hash: password_hash.into(),
            hash_version,
            display_name: None,
            roles: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Copy of this record carrying a new hash.
    pub fn rehashed(&self, password_hash: String, hash_version: u32, now: DateTime<Utc>) -> Self {
        Self {
            password_hash,
            hash_version,
            updated_at: now,
            ..self.clone()
        }
    }
}

/// Local credential storage, keyed by username.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, username: &Username) -> Result<Option<CredentialRecord>, StoreError>;

    /// Insert a new record; fails with `AlreadyExists` on a taken username.
    async fn create(&self, record: CredentialRecord) -> Result<(), StoreError>;

    /// Replace an existing record; fails with `NotFound` if absent.
    async fn update(&self, record: CredentialRecord) -> Result<(), StoreError>;

    /// Returns whether a record was removed.
    async fn delete(&self, username: &Username) -> Result<bool, StoreError>;
}
