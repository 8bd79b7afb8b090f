//! Refresh-token session tracking.
//!
//! The session store is the only authority on whether a refresh token may
//! still be honored. Access tokens never consult it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keyward_core::{TokenId, Username};

use crate::claims::Claims;
use crate::store::StoreError;

/// Liveness record for one issued refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: TokenId,
    pub principal: Username,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl SessionEntry {
    pub fn new(
        id: TokenId,
        principal: Username,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            principal,
            issued_at,
            expires_at,
            revoked: false,
        }
    }

    /// Entry for a just-minted refresh token.
    pub fn for_refresh_token(claims: &Claims) -> Self {
        Self::new(claims.jti, claims.sub.clone(), claims.issued_at(), claims.expires_at())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Result of an atomic revoke-and-replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// The old entry was live; it is now revoked and the new one registered.
    Rotated,
    /// The old entry had already been revoked. Nothing was written.
    AlreadyRevoked(SessionEntry),
    /// The old entry had expired. Nothing was written.
    Expired(SessionEntry),
    /// No entry exists for the old id. Nothing was written.
    Missing,
}

/// Outcome of revoking a single session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    AlreadyRevoked,
    Missing,
}

/// Concurrent-safe refresh-session storage.
///
/// Implementations provide per-entry atomicity (compare-and-set); callers must
/// not wrap them in an external lock.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Register a new entry. Fails with `AlreadyExists` if the id is taken.
    async fn register(&self, entry: SessionEntry) -> Result<(), StoreError>;

    async fn get(&self, id: &TokenId) -> Result<Option<SessionEntry>, StoreError>;

    /// Whether the entry exists, is unrevoked and unexpired at `now`.
    async fn is_live(&self, id: &TokenId, now: DateTime<Utc>) -> Result<bool, StoreError>;

    async fn revoke(&self, id: &TokenId) -> Result<RevokeOutcome, StoreError>;

    /// Revoke `old` if and only if it is live, then register `new`.
    ///
    /// Exactly one of any number of concurrent callers presenting the same
    /// `old` observes `Rotated`.
    async fn rotate(
        &self,
        old: &TokenId,
        new: SessionEntry,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;

    /// Revoke every unrevoked entry owned by `principal`; returns how many.
    async fn revoke_all_for(&self, principal: &Username) -> Result<u64, StoreError>;

    /// Live entries owned by `principal`.
    async fn live_sessions(
        &self,
        principal: &Username,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionEntry>, StoreError>;

    /// Delete every entry expired at `now`, revoked or not; returns how many.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn liveness_needs_unrevoked_and_unexpired() {
        let now = Utc::now();
        let mut entry = SessionEntry::new(TokenId::new(), Username::new("bob"), now, now + Duration::hours(1));

        assert!(entry.is_live(now));
        assert!(!entry.is_live(now + Duration::hours(1)));

        entry.revoked = true;
        assert!(!entry.is_live(now));
        assert!(!entry.is_expired(now));
    }
}
