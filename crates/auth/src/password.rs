//! Local secret hashing (Argon2id, PHC string records).
//!
//! A record carries its own algorithm, version and cost parameters, so records
//! written under an older policy stay verifiable after the policy changes;
//! `HashVerdict::needs_upgrade` tells the caller to re-hash.

use argon2::password_hash::{self, rand_core::OsRng, PasswordHash, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHasher as _, PasswordVerifier, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HashError {
    #[error("invalid hash parameters: {0}")]
    InvalidParams(String),

    #[error("unreadable hash record: {0}")]
    InvalidRecord(String),

    #[error("hashing failed: {0}")]
    Hashing(String),
}

/// Current hashing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashPolicy {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
    /// Policy generation stamped on credential records.
    pub version: u32,
}

impl Default for HashPolicy {
    /// OWASP-recommended Argon2id baseline (19 MiB, t=2, p=1).
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
            version: 2,
        }
    }
}

/// Outcome of checking a secret against a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashVerdict {
    pub matches: bool,
    /// Only ever true for a matching secret.
    pub needs_upgrade: bool,
}

#[derive(Clone)]
pub struct PasswordHasher {
    policy: HashPolicy,
    argon: Argon2<'static>,
    /// Record used to burn comparable time when no record exists.
    decoy: String,
}

impl core::fmt::Debug for PasswordHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordHasher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher {
    pub fn new(policy: HashPolicy) -> Result<Self, HashError> {
        let params = Params::new(policy.memory_kib, policy.iterations, policy.parallelism, None)
            .map_err(|e| HashError::InvalidParams(e.to_string()))?;
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let decoy = hash_with(&argon, "keyward-decoy-secret")?;

        Ok(Self {
            policy,
            argon,
            decoy,
        })
    }

    pub fn policy(&self) -> &HashPolicy {
        &self.policy
    }

    /// Hash a secret under the current policy with a fresh salt.
    pub fn hash(&self, secret: &SecretString) -> Result<String, HashError> {
        hash_with(&self.argon, secret.expose_secret())
    }

    /// Verify a secret against a stored record.
    pub fn verify(&self, secret: &SecretString, record: &str) -> Result<HashVerdict, HashError> {
        let parsed = PasswordHash::new(record).map_err(|e| HashError::InvalidRecord(e.to_string()))?;

        match self.argon.verify_password(secret.expose_secret().as_bytes(), &parsed) {
            Ok(()) => Ok(HashVerdict {
                matches: true,
                needs_upgrade: self.is_outdated(&parsed)?,
            }),
            Err(password_hash::Error::Password) => Ok(HashVerdict {
                matches: false,
                needs_upgrade: false,
            }),
            Err(e) => Err(HashError::InvalidRecord(e.to_string())),
        }
    }

    /// Spend roughly one verification worth of work without a real record.
    ///
    /// Keeps "unknown user" indistinguishable from "wrong secret" by timing.
    pub fn verify_decoy(&self, secret: &SecretString) {
        let _ = self.verify(secret, &self.decoy);
    }

    fn is_outdated(&self, parsed: &PasswordHash<'_>) -> Result<bool, HashError> {
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return Ok(true);
        }
        if parsed.version != Some(Version::V0x13.into()) {
            return Ok(true);
        }
        let params =
            Params::try_from(parsed).map_err(|e| HashError::InvalidRecord(e.to_string()))?;
        Ok(params.m_cost() != self.policy.memory_kib
            || params.t_cost() != self.policy.iterations
            || params.p_cost() != self.policy.parallelism)
    }
}

fn hash_with(argon: &Argon2<'_>, secret: &str) -> Result<String, HashError> {
    let salt = SaltString::generate(&mut OsRng);
    argon
        .hash_password(secret.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| HashError::Hashing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap(version: u32, iterations: u32) -> HashPolicy {
        HashPolicy {
            memory_kib: 64,
            iterations,
            parallelism: 1,
            version,
        }
    }

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[test]
    fn hash_then_verify() {
        let hasher = PasswordHasher::new(cheap(1, 1)).unwrap();
        let record = hasher.hash(&secret("hunter2")).unwrap();

        assert!(record.starts_with("$argon2id$v=19$m=64,t=1,p=1$"));
        let verdict = hasher.verify(&secret("hunter2"), &record).unwrap();
        assert_eq!(
            verdict,
            HashVerdict {
                matches: true,
                needs_upgrade: false
            }
        );
    }

    #[test]
    fn wrong_secret_does_not_match() {
        let hasher = PasswordHasher::new(cheap(1, 1)).unwrap();
        let record = hasher.hash(&secret("hunter2")).unwrap();

        let verdict = hasher.verify(&secret("hunter3"), &record).unwrap();
        assert!(!verdict.matches);
        assert!(!verdict.needs_upgrade);
    }

    #[test]
    fn salts_differ_between_hashes() {
        let hasher = PasswordHasher::new(cheap(1, 1)).unwrap();
        let a = hasher.hash(&secret("same")).unwrap();
        let b = hasher.hash(&secret("same")).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn old_parameters_still_verify_and_request_upgrade() {
        let old = PasswordHasher::new(cheap(1, 1)).unwrap();
        let current = PasswordHasher::new(cheap(2, 2)).unwrap();
        let record = old.hash(&secret("s3cret")).unwrap();

        let verdict = current.verify(&secret("s3cret"), &record).unwrap();
        assert!(verdict.matches);
        assert!(verdict.needs_upgrade);

        let upgraded = current.hash(&secret("s3cret")).unwrap();
        let verdict = current.verify(&secret("s3cret"), &upgraded).unwrap();
        assert!(verdict.matches);
        assert!(!verdict.needs_upgrade);
    }

    #[test]
    fn other_argon2_variants_request_upgrade() {
        let params = Params::new(64, 1, 1, None).unwrap();
        let argon2i = Argon2::new(Algorithm::Argon2i, Version::V0x13, params);
        let record = hash_with(&argon2i, "legacy").unwrap();

        let current = PasswordHasher::new(cheap(2, 1)).unwrap();
        let verdict = current.verify(&secret("legacy"), &record).unwrap();
        assert!(verdict.matches);
        assert!(verdict.needs_upgrade);
    }

    #[test]
    fn garbage_record_is_an_error() {
        let hasher = PasswordHasher::new(cheap(1, 1)).unwrap();
        assert!(matches!(
            hasher.verify(&secret("x"), "plaintext"),
            Err(HashError::InvalidRecord(_))
        ));
    }

    #[test]
    fn invalid_policy_is_rejected() {
        let policy = HashPolicy {
            memory_kib: 1,
            ..cheap(1, 1)
        };
        assert!(matches!(PasswordHasher::new(policy), Err(HashError::InvalidParams(_))));
    }
}
