use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use keyward_auth::{RevokeOutcome, RotateOutcome, SessionEntry, SessionStore, StoreError};
use keyward_core::{TokenId, Username};

/// Sharded in-process session store.
///
/// Each entry is guarded by its shard lock, so unrelated logins never
/// serialize on each other.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    entries: DashMap<TokenId, SessionEntry>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn register(&self, entry: SessionEntry) -> Result<(), StoreError> {
        match self.entries.entry(entry.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(entry.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    async fn get(&self, id: &TokenId) -> Result<Option<SessionEntry>, StoreError> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }

    async fn is_live(&self, id: &TokenId, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self.entries.get(id).is_some_and(|e| e.is_live(now)))
    }

    async fn revoke(&self, id: &TokenId) -> Result<RevokeOutcome, StoreError> {
        Ok(match self.entries.get_mut(id) {
            None => RevokeOutcome::Missing,
            Some(e) if e.revoked => RevokeOutcome::AlreadyRevoked,
            Some(mut e) => {
                e.revoked = true;
                RevokeOutcome::Revoked
            }
        })
    }

    async fn rotate(
        &self,
        old: &TokenId,
        new: SessionEntry,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        // The successor goes in first: anyone who loses the race below and
        // revokes the principal's sessions must also catch it.
        let new_id = new.id;
        self.register(new).await?;

        let outcome = match self.entries.get_mut(old) {
            None => RotateOutcome::Missing,
            Some(e) if e.revoked => RotateOutcome::AlreadyRevoked(e.value().clone()),
            Some(e) if e.is_expired(now) => RotateOutcome::Expired(e.value().clone()),
            Some(mut e) => {
                e.revoked = true;
                RotateOutcome::Rotated
            }
        };

        if outcome != RotateOutcome::Rotated {
            self.entries.remove(&new_id);
        }
        Ok(outcome)
    }

    async fn revoke_all_for(&self, principal: &Username) -> Result<u64, StoreError> {
        let mut count = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.principal == *principal && !entry.revoked {
                entry.revoked = true;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn live_sessions(
        &self,
        principal: &Username,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEntry>, StoreError> {
        let mut live: Vec<SessionEntry> = self
            .entries
            .iter()
            .filter(|e| e.principal == *principal && e.is_live(now))
            .map(|e| e.value().clone())
            .collect();
        live.sort_by_key(|e| e.issued_at);
        Ok(live)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn entry(user: &str, ttl_secs: i64) -> SessionEntry {
        SessionEntry::new(TokenId::new(), Username::new(user), t0(), t0() + Duration::seconds(ttl_secs))
    }

    #[tokio::test]
    async fn duplicate_ids_are_rejected() {
        let store = InMemorySessionStore::new();
        let e = entry("alice", 60);
        store.register(e.clone()).await.unwrap();
        assert!(matches!(store.register(e).await, Err(StoreError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn revoke_is_idempotent() {
        let store = InMemorySessionStore::new();
        let e = entry("alice", 60);
        store.register(e.clone()).await.unwrap();

        assert_eq!(store.revoke(&e.id).await.unwrap(), RevokeOutcome::Revoked);
        assert_eq!(store.revoke(&e.id).await.unwrap(), RevokeOutcome::AlreadyRevoked);
        assert_eq!(store.revoke(&TokenId::new()).await.unwrap(), RevokeOutcome::Missing);
        assert!(!store.is_live(&e.id, t0()).await.unwrap());
    }

    #[tokio::test]
    async fn rotate_replaces_live_entry_once() {
        let store = InMemorySessionStore::new();
        let old = entry("alice", 60);
        store.register(old.clone()).await.unwrap();

        let first = entry("alice", 120);
        assert_eq!(store.rotate(&old.id, first.clone(), t0()).await.unwrap(), RotateOutcome::Rotated);
        assert!(store.is_live(&first.id, t0()).await.unwrap());

        let second = entry("alice", 120);
        let outcome = store.rotate(&old.id, second.clone(), t0()).await.unwrap();
        assert!(matches!(outcome, RotateOutcome::AlreadyRevoked(_)));
        assert!(store.get(&second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rotate_refuses_expired_and_unknown() {
        let store = InMemorySessionStore::new();
        let old = entry("alice", 60);
        store.register(old.clone()).await.unwrap();

        let later = t0() + Duration::seconds(60);
        assert!(matches!(
            store.rotate(&old.id, entry("alice", 120), later).await.unwrap(),
            RotateOutcome::Expired(_)
        ));
        assert_eq!(
            store.rotate(&TokenId::new(), entry("alice", 120), t0()).await.unwrap(),
            RotateOutcome::Missing
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn revoke_all_only_touches_the_principal() {
        let store = InMemorySessionStore::new();
        for e in [entry("alice", 60), entry("alice", 60), entry("bob", 60)] {
            store.register(e).await.unwrap();
        }

        assert_eq!(store.revoke_all_for(&Username::new("alice")).await.unwrap(), 2);
        assert_eq!(store.revoke_all_for(&Username::new("alice")).await.unwrap(), 0);
        assert!(store.live_sessions(&Username::new("alice"), t0()).await.unwrap().is_empty());
        assert_eq!(store.live_sessions(&Username::new("bob"), t0()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sweep_drops_expired_regardless_of_revocation() {
        let store = InMemorySessionStore::new();
        let revoked = entry("alice", 10);
        store.register(revoked.clone()).await.unwrap();
        store.revoke(&revoked.id).await.unwrap();
        store.register(entry("alice", 10)).await.unwrap();
        let live = entry("alice", 100);
        store.register(live.clone()).await.unwrap();

        let removed = store.sweep_expired(t0() + Duration::seconds(10)).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
        assert!(store.get(&live.id).await.unwrap().is_some());
    }
}
