//! Signing key material and rotation.
//!
//! Key state is an immutable [`KeySet`] snapshot. Rotation builds a new set and
//! publishes it with a single atomic swap, so validations in flight keep the
//! snapshot they loaded and never observe a half-rotated state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretSlice};
use tracing::info;

/// One HMAC signing key and its identifier (`kid`).
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    secret: Arc<SecretSlice<u8>>,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl SigningKey {
    pub fn new(kid: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        let secret: Vec<u8> = secret.into();
        let encoding = EncodingKey::from_secret(&secret);
        let decoding = DecodingKey::from_secret(&secret);
        Self {
            kid: kid.into(),
            secret: Arc::new(SecretSlice::from(secret)),
            encoding,
            decoding,
        }
    }

    /// 256-bit random key with a random `kid`.
    pub fn generate() -> Self {
        let mut secret = vec![0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(uuid::Uuid::new_v4().simple().to_string(), secret)
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn secret_len(&self) -> usize {
        self.secret.expose_secret().len()
    }

    pub(crate) fn encoding(&self) -> &EncodingKey {
        &self.encoding
    }

    pub(crate) fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

/// A key that was current until `retired_at`.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    pub key: SigningKey,
    pub retired_at: DateTime<Utc>,
}

/// Immutable (current, previous) key snapshot.
#[derive(Debug, Clone)]
pub struct KeySet {
    current: SigningKey,
    previous: Option<RetiredKey>,
}

impl KeySet {
    pub fn new(current: SigningKey) -> Self {
        Self {
            current,
            previous: None,
        }
    }

    pub fn current(&self) -> &SigningKey {
        &self.current
    }

    pub fn previous(&self) -> Option<&RetiredKey> {
        self.previous.as_ref()
    }

    /// Snapshot that results from retiring the current key at `now`.
    pub fn rotated(&self, next: SigningKey, now: DateTime<Utc>) -> Self {
        Self {
            current: next,
            previous: Some(RetiredKey {
                key: self.current.clone(),
                retired_at: now,
            }),
        }
    }

    /// Resolve the key a token claims to be signed with.
    ///
    /// The previous key only resolves while `now < retired_at + grace`; a
    /// grace end past the calendar range never closes. Without a `kid` the
    /// current key is assumed.
    pub fn resolve(&self, kid: Option<&str>, now: DateTime<Utc>, grace: Duration) -> Option<&SigningKey> {
        match kid {
            None => Some(&self.current),
            Some(kid) if kid == self.current.kid => Some(&self.current),
            Some(kid) => self
                .previous
                .as_ref()
                .filter(|p| {
                    p.key.kid == kid && p.retired_at.checked_add_signed(grace).is_none_or(|end| now < end)
                })
                .map(|p| &p.key),
        }
    }
}

/// Source of signing key snapshots.
pub trait SigningKeyProvider: Send + Sync {
    fn keys(&self) -> Arc<KeySet>;
}

/// In-process key holder with atomic rotation.
#[derive(Debug)]
pub struct KeyRing {
    keys: ArcSwap<KeySet>,
}

impl KeyRing {
    pub fn new(current: SigningKey) -> Self {
        Self {
            keys: ArcSwap::from_pointee(KeySet::new(current)),
        }
    }

    pub fn arc(current: SigningKey) -> Arc<Self> {
        Arc::new(Self::new(current))
    }

    /// Make `next` current and keep the outgoing key as previous.
    ///
    /// Concurrent rotations serialize through `rcu`; each one retires whatever
    /// key was current when it committed.
    pub fn rotate(&self, next: SigningKey, now: DateTime<Utc>) {
        let kid = next.kid().to_string();
        self.keys.rcu(|set| set.rotated(next.clone(), now));
        info!(kid = %kid, "signing key rotated");
    }
}

impl SigningKeyProvider for KeyRing {
    fn keys(&self) -> Arc<KeySet> {
        self.keys.load_full()
    }
}
