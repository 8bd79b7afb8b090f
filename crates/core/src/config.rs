//! Configuration surface consumed by the authentication core.
//!
//! Loading is the embedding process's job; `from_env` is a convenience for
//! processes that configure through `KEYWARD_*` environment variables.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// A credential backend the verifier may consult.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Directory,
    Local,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Directory => "directory",
            BackendKind::Local => "local",
        }
    }
}

impl core::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" | "ldap" => Ok(BackendKind::Directory),
            "local" => Ok(BackendKind::Local),
            other => Err(ConfigError::Invalid {
                key: "backend_order".to_string(),
                reason: format!("unknown backend '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Authentication core settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access-token lifetime.
    pub access_ttl_secs: u64,
    /// Refresh-token lifetime (must exceed the access lifetime).
    pub refresh_ttl_secs: u64,
    /// How long the previous signing key stays valid after a rotation.
    pub key_grace_secs: u64,
    /// Backends tried in order on login.
    pub backend_order: Vec<BackendKind>,
    /// Continue to the next backend when the directory answers but rejects
    /// the credential (by default only unavailability falls through).
    pub fallback_on_rejection: bool,
    /// Skip the directory without a network call while it is known down.
    pub fail_fast_when_down: bool,
    pub sweep_interval_secs: u64,
    pub probe_interval_secs: u64,
    pub directory_timeout_ms: u64,
    pub store_timeout_ms: u64,
    /// Roles that satisfy an administrator check.
    pub admin_roles: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_ttl_secs: 30 * 60,
            refresh_ttl_secs: 30 * 24 * 60 * 60,
            key_grace_secs: 60 * 60,
            backend_order: vec![BackendKind::Directory, BackendKind::Local],
            fallback_on_rejection: false,
            fail_fast_when_down: true,
            sweep_interval_secs: 5 * 60,
            probe_interval_secs: 60,
            directory_timeout_ms: 5_000,
            store_timeout_ms: 2_000,
            admin_roles: vec!["admin".to_string(), "superuser".to_string()],
        }
    }
}

/// Upper bound for token lifetimes and the key grace window (ten years).
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::try_seconds(i64::try_from(secs).unwrap_or(i64::MAX)).unwrap_or(chrono::Duration::MAX)
}

impl AuthConfig {
    pub fn access_ttl(&self) -> chrono::Duration {
        seconds(self.access_ttl_secs)
    }

    pub fn refresh_ttl(&self) -> chrono::Duration {
        seconds(self.refresh_ttl_secs)
    }

    pub fn key_grace(&self) -> chrono::Duration {
        seconds(self.key_grace_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Build from `KEYWARD_*` environment variables, defaulting anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            access_ttl_secs: env_or("KEYWARD_ACCESS_TTL_SECS", defaults.access_ttl_secs)?,
            refresh_ttl_secs: env_or("KEYWARD_REFRESH_TTL_SECS", defaults.refresh_ttl_secs)?,
            key_grace_secs: env_or("KEYWARD_KEY_GRACE_SECS", defaults.key_grace_secs)?,
            backend_order: match std::env::var("KEYWARD_BACKEND_ORDER") {
                Ok(raw) => parse_list(&raw)
                    .into_iter()
                    .map(|s| s.parse())
                    .collect::<Result<Vec<_>, _>>()?,
                Err(_) => defaults.backend_order,
            },
            fallback_on_rejection: env_or(
                "KEYWARD_FALLBACK_ON_REJECTION",
                defaults.fallback_on_rejection,
            )?,
            fail_fast_when_down: env_or("KEYWARD_FAIL_FAST_WHEN_DOWN", defaults.fail_fast_when_down)?,
            sweep_interval_secs: env_or("KEYWARD_SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs)?,
            probe_interval_secs: env_or("KEYWARD_PROBE_INTERVAL_SECS", defaults.probe_interval_secs)?,
            directory_timeout_ms: env_or(
                "KEYWARD_DIRECTORY_TIMEOUT_MS",
                defaults.directory_timeout_ms,
            )?,
            store_timeout_ms: env_or("KEYWARD_STORE_TIMEOUT_MS", defaults.store_timeout_ms)?,
            admin_roles: match std::env::var("KEYWARD_ADMIN_ROLES") {
                Ok(raw) => parse_list(&raw),
                Err(_) => defaults.admin_roles,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.access_ttl_secs == 0 {
            return Err(ConfigError::invalid("access_ttl_secs", "must be positive"));
        }
        for (key, value) in [
            ("access_ttl_secs", self.access_ttl_secs),
            ("refresh_ttl_secs", self.refresh_ttl_secs),
            ("key_grace_secs", self.key_grace_secs),
        ] {
            if value > MAX_LIFETIME_SECS {
                return Err(ConfigError::invalid(key, format!("must not exceed {MAX_LIFETIME_SECS}")));
            }
        }
        if self.refresh_ttl_secs <= self.access_ttl_secs {
            return Err(ConfigError::invalid(
                "refresh_ttl_secs",
                "must be longer than the access-token lifetime",
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::invalid("sweep_interval_secs", "must be positive"));
        }
        if self.probe_interval_secs == 0 {
            return Err(ConfigError::invalid("probe_interval_secs", "must be positive"));
        }
        if self.directory_timeout_ms == 0 {
            return Err(ConfigError::invalid("directory_timeout_ms", "must be positive"));
        }
        if self.store_timeout_ms == 0 {
            return Err(ConfigError::invalid("store_timeout_ms", "must be positive"));
        }
        if self.backend_order.is_empty() {
            return Err(ConfigError::invalid("backend_order", "at least one backend is required"));
        }
        let unique: HashSet<_> = self.backend_order.iter().collect();
        if unique.len() != self.backend_order.len() {
            return Err(ConfigError::invalid("backend_order", "backends must not repeat"));
        }
        Ok(())
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: core::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::invalid(key, e.to_string())),
        Err(_) => {
            debug!(key, "not set; using default");
            Ok(default)
        }
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
