//! Directory backend port and the shared connection state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keyward_core::Username;

/// Identity attributes returned by a successful bind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryAttributes {
    /// Distinguished name or equivalent directory key.
    pub dn: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    /// Group memberships, mapped onto roles by the verifier.
    pub groups: Vec<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The directory answered and refused the credentials.
    #[error("directory rejected the credentials")]
    InvalidCredentials,

    /// The directory could not be reached or did not answer.
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Health as reported by a probe.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectoryHealth {
    Up,
    Degraded,
    Down,
}

impl core::fmt::Display for DirectoryHealth {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            DirectoryHealth::Up => "up",
            DirectoryHealth::Degraded => "degraded",
            DirectoryHealth::Down => "down",
        })
    }
}

/// Directory protocol client.
///
/// Binds always use the caller's own credentials.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    async fn bind(&self, username: &Username, secret: &SecretString) -> Result<DirectoryAttributes, DirectoryError>;

    async fn health_check(&self) -> DirectoryHealth;
}

/// Point-in-time directory connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectorySnapshot {
    pub health: DirectoryHealth,
    pub last_success: Option<DateTime<Utc>>,
    pub last_checked: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

impl Default for DirectorySnapshot {
    /// Unprobed directories are presumed up so the first login still tries.
    fn default() -> Self {
        Self {
            health: DirectoryHealth::Up,
            last_success: None,
            last_checked: None,
            consecutive_failures: 0,
        }
    }
}

/// Shared, lock-free directory connection state.
///
/// Read on every directory login; written by the health probe only.
#[derive(Debug, Clone, Default)]
pub struct DirectoryStatus {
    inner: Arc<ArcSwap<DirectorySnapshot>>,
}

impl DirectoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.inner.load_full()
    }

    pub fn health(&self) -> DirectoryHealth {
        self.inner.load().health
    }

    pub fn publish(&self, snapshot: DirectorySnapshot) {
        self.inner.store(Arc::new(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_observe_published_state() {
        let status = DirectoryStatus::new();
        let reader = status.clone();
        assert_eq!(reader.health(), DirectoryHealth::Up);

        status.publish(DirectorySnapshot {
            health: DirectoryHealth::Down,
            consecutive_failures: 3,
            ..Default::default()
        });

        assert_eq!(reader.health(), DirectoryHealth::Down);
        assert_eq!(reader.snapshot().consecutive_failures, 3);
    }
}
