use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use keyward_auth::{DirectoryAttributes, DirectoryClient, DirectoryError, DirectoryHealth};
use keyward_core::Username;

/// How the scripted directory behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryMode {
    Up,
    /// Answers binds but reports itself degraded.
    Degraded,
    /// Refuses connections immediately.
    Unreachable,
    /// Accepts connections and never answers.
    Hanging,
}

struct DirectoryUser {
    secret: SecretString,
    attributes: DirectoryAttributes,
}

/// Scriptable directory for tests and local development.
pub struct InMemoryDirectory {
    users: RwLock<HashMap<Username, DirectoryUser>>,
    mode: RwLock<DirectoryMode>,
    binds: AtomicU64,
}

impl core::fmt::Debug for InMemoryDirectory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryDirectory")
            .field("mode", &self.mode())
            .field("binds", &self.bind_count())
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            mode: RwLock::new(DirectoryMode::Up),
            binds: AtomicU64::new(0),
        }
    }
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn with_user(self, username: &str, secret: &str, groups: &[&str]) -> Self {
        self.add_user(
            username,
            secret,
            DirectoryAttributes {
                dn: Some(format!("uid={username},ou=people")),
                groups: groups.iter().map(|g| g.to_string()).collect(),
                ..Default::default()
            },
        );
        self
    }

    pub fn add_user(&self, username: &str, secret: &str, attributes: DirectoryAttributes) {
        if let Ok(mut users) = self.users.write() {
            users.insert(
                Username::new(username),
                DirectoryUser {
                    secret: SecretString::from(secret.to_string()),
                    attributes,
                },
            );
        }
    }

    pub fn set_mode(&self, mode: DirectoryMode) {
        if let Ok(mut current) = self.mode.write() {
            *current = mode;
        }
    }

    pub fn mode(&self) -> DirectoryMode {
        self.mode.read().map(|m| *m).unwrap_or(DirectoryMode::Unreachable)
    }

    /// Bind attempts that reached this directory.
    pub fn bind_count(&self) -> u64 {
        self.binds.load(Ordering::SeqCst)
    }
}

const HANG: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
impl DirectoryClient for InMemoryDirectory {
    async fn bind(&self, username: &Username, secret: &SecretString) -> Result<DirectoryAttributes, DirectoryError> {
        self.binds.fetch_add(1, Ordering::SeqCst);

        match self.mode() {
            DirectoryMode::Unreachable => {
                return Err(DirectoryError::Unavailable("connection refused".to_string()));
            }
            DirectoryMode::Hanging => {
                tokio::time::sleep(HANG).await;
                return Err(DirectoryError::Unavailable("no response".to_string()));
            }
            DirectoryMode::Up | DirectoryMode::Degraded => {}
        }

        let users = self
            .users
            .read()
            .map_err(|_| DirectoryError::Unavailable("directory state poisoned".to_string()))?;
        match users.get(username) {
            Some(user) if user.secret.expose_secret() == secret.expose_secret() => Ok(user.attributes.clone()),
            _ => Err(DirectoryError::InvalidCredentials),
        }
    }

    async fn health_check(&self) -> DirectoryHealth {
        match self.mode() {
            DirectoryMode::Up => DirectoryHealth::Up,
            DirectoryMode::Degraded => DirectoryHealth::Degraded,
            DirectoryMode::Unreachable => DirectoryHealth::Down,
            DirectoryMode::Hanging => {
                tokio::time::sleep(HANG).await;
                DirectoryHealth::Down
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretString {
        SecretString::from(s.to_string())
    }

    #[tokio::test]
    async fn binds_follow_mode() {
        let dir = InMemoryDirectory::new().with_user("gina", "pw", &["staff"]);
        let gina = Username::new("gina");

        let attrs = dir.bind(&gina, &secret("pw")).await.unwrap();
        assert_eq!(attrs.groups, vec!["staff"]);
        assert_eq!(dir.bind(&gina, &secret("nope")).await, Err(DirectoryError::InvalidCredentials));

        dir.set_mode(DirectoryMode::Unreachable);
        assert!(matches!(dir.bind(&gina, &secret("pw")).await, Err(DirectoryError::Unavailable(_))));
        assert_eq!(dir.health_check().await, DirectoryHealth::Down);
        assert_eq!(dir.bind_count(), 3);
    }
}
