//! Credential verification across the configured backends.
//!
//! Backends are tried in policy order. A directory that cannot be reached is
//! never reported as a credential verdict: unavailability moves on to the next
//! backend and, if nothing else decides, surfaces as `BackendUnavailable`.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument, warn};

use keyward_core::{AuthConfig, AuthError, BackendKind, Clock, Username};

use crate::credentials::{CredentialRecord, CredentialStore};
use crate::directory::{DirectoryClient, DirectoryError, DirectoryHealth, DirectoryStatus};
use crate::password::{HashVerdict, PasswordHasher};
use crate::principal::Principal;
use crate::roles::RoleMapping;
use crate::store::with_deadline;

/// Backend order and fallback rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPolicy {
    pub order: Vec<BackendKind>,
    /// Try later backends after the directory *rejects* a credential.
    pub fallback_on_rejection: bool,
    /// Skip the directory without binding while it is marked down.
    pub fail_fast_when_down: bool,
    pub directory_timeout: Duration,
    pub store_timeout: Duration,
}

impl From<&AuthConfig> for BackendPolicy {
    fn from(config: &AuthConfig) -> Self {
        Self {
            order: config.backend_order.clone(),
            fallback_on_rejection: config.fallback_on_rejection,
            fail_fast_when_down: config.fail_fast_when_down,
            directory_timeout: config.directory_timeout(),
            store_timeout: config.store_timeout(),
        }
    }
}

impl Default for BackendPolicy {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

/// What a single backend said about a credential.
enum Attempt {
    Accepted(Principal),
    /// The backend holds the identity and the secret is wrong.
    Rejected,
    /// The backend does not know the identity.
    Unknown,
    Unavailable(String),
}

pub struct CredentialVerifier {
    policy: BackendPolicy,
    directory: Option<Arc<dyn DirectoryClient>>,
    status: DirectoryStatus,
    credentials: Option<Arc<dyn CredentialStore>>,
    hasher: Arc<PasswordHasher>,
    roles: RoleMapping,
    clock: Arc<dyn Clock>,
}

impl core::fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("policy", &self.policy)
            .field("directory", &self.directory.is_some())
            .field("local", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    pub fn new(policy: BackendPolicy, hasher: Arc<PasswordHasher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            directory: None,
            status: DirectoryStatus::new(),
            credentials: None,
            hasher,
            roles: RoleMapping::default(),
            clock,
        }
    }

    /// Attach the directory client and the health state its probe publishes.
    pub fn with_directory(mut self, client: Arc<dyn DirectoryClient>, status: DirectoryStatus) -> Self {
        self.directory = Some(client);
        self.status = status;
        self
    }

    pub fn with_local_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn with_role_mapping(mut self, roles: RoleMapping) -> Self {
        self.roles = roles;
        self
    }

    pub fn policy(&self) -> &BackendPolicy {
        &self.policy
    }

    pub fn directory_status(&self) -> &DirectoryStatus {
        &self.status
    }

    /// Authenticate a username/secret pair.
    ///
    /// Never issues tokens. A directory rejection ends the attempt unless
    /// `fallback_on_rejection` is set.
    #[instrument(skip(self, secret), fields(username = %username))]
    pub async fn verify(&self, username: &Username, secret: &SecretString) -> Result<Principal, AuthError> {
        // Directories treat an empty password as an anonymous bind.
        if username.is_empty() || secret.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let mut unavailable: Option<String> = None;
        let mut rejected = false;

        for backend in &self.policy.order {
            let attempt = match backend {
                BackendKind::Directory => self.try_directory(username, secret).await,
                BackendKind::Local => self.try_local(username, secret).await?,
            };

            match attempt {
                Attempt::Accepted(principal) => {
                    info!(backend = %backend, "credentials verified");
                    return Ok(principal);
                }
                Attempt::Rejected => {
                    debug!(backend = %backend, "credentials rejected");
                    rejected = true;
                    if *backend == BackendKind::Local || !self.policy.fallback_on_rejection {
                        return Err(AuthError::InvalidCredentials);
                    }
                }
                Attempt::Unknown => {
                    debug!(backend = %backend, "unknown principal");
                }
                Attempt::Unavailable(reason) => {
                    warn!(backend = %backend, error = %reason, "backend unavailable");
                    unavailable.get_or_insert(reason);
                }
            }
        }

        match unavailable {
            Some(reason) if !rejected => Err(AuthError::unavailable(reason)),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn try_directory(&self, username: &Username, secret: &SecretString) -> Attempt {
        let Some(client) = &self.directory else {
            return Attempt::Unavailable("no directory client configured".to_string());
        };

        if self.policy.fail_fast_when_down && self.status.health() == DirectoryHealth::Down {
            return Attempt::Unavailable("directory marked down".to_string());
        }

        let timeout = self.policy.directory_timeout;
        match tokio::time::timeout(timeout, client.bind(username, secret)).await {
            Ok(Ok(attrs)) => {
                let mut principal = Principal::new(username.clone(), BackendKind::Directory)
                    .with_roles(self.roles.map_groups(&attrs.groups));
                principal.display_name = attrs.display_name;
                principal.email = attrs.email;
                Attempt::Accepted(principal)
            }
            Ok(Err(DirectoryError::InvalidCredentials)) => Attempt::Rejected,
            Ok(Err(DirectoryError::Unavailable(reason))) => Attempt::Unavailable(reason),
            Err(_) => Attempt::Unavailable(format!("directory bind timed out after {timeout:?}")),
        }
    }

    async fn try_local(&self, username: &Username, secret: &SecretString) -> Result<Attempt, AuthError> {
        let Some(store) = &self.credentials else {
            return Ok(Attempt::Unavailable("no local credential store configured".to_string()));
        };

        let record = match with_deadline("credential lookup", self.policy.store_timeout, store.get(username)).await {
            Ok(record) => record,
            Err(AuthError::BackendUnavailable(reason)) => return Ok(Attempt::Unavailable(reason)),
            Err(err) => return Err(err),
        };

        let Some(record) = record else {
            let hasher = Arc::clone(&self.hasher);
            let secret = secret.clone();
            blocking(move || hasher.verify_decoy(&secret)).await?;
            return Ok(Attempt::Unknown);
        };

        let verdict = {
            let hasher = Arc::clone(&self.hasher);
            let secret = secret.clone();
            let stored = record.password_hash.clone();
            blocking(move || hasher.verify(&secret, &stored)).await?
        };

        let HashVerdict { matches, needs_upgrade } = verdict.map_err(|e| {
            warn!(username = %username, error = %e, "unreadable credential record");
            AuthError::internal(format!("credential record for {username}: {e}"))
        })?;

        if !matches {
            return Ok(Attempt::Rejected);
        }

        if needs_upgrade || record.hash_version < self.hasher.policy().version {
            self.upgrade(&record, secret).await;
        }

        let mut principal = Principal::new(record.username.clone(), BackendKind::Local).with_roles(record.roles.clone());
        principal.display_name = record.display_name.clone();
        Ok(Attempt::Accepted(principal))
    }

    /// Re-hash under the current policy and persist. Failures only warn: the
    /// login already succeeded and the next one retries the upgrade.
    async fn upgrade(&self, record: &CredentialRecord, secret: &SecretString) {
        let Some(store) = &self.credentials else {
            return;
        };

        let hasher = Arc::clone(&self.hasher);
        let secret = secret.clone();
        let hashed = match blocking(move || hasher.hash(&secret)).await {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => {
                warn!(username = %record.username, error = %e, "re-hash failed");
                return;
            }
            Err(e) => {
                warn!(username = %record.username, error = %e, "re-hash task failed");
                return;
            }
        };

        let version = self.hasher.policy().version;
        let upgraded = record.rehashed(hashed, version, self.clock.now());
        match with_deadline("credential update", self.policy.store_timeout, store.update(upgraded)).await {
            Ok(()) => info!(
                username = %record.username,
                from_version = record.hash_version,
                to_version = version,
                "credential hash upgraded"
            ),
            Err(e) => warn!(username = %record.username, error = %e, "persisting upgraded hash failed"),
        }
    }
}

/// Run CPU-heavy hashing off the async workers.
async fn blocking<T, F>(f: F) -> Result<T, AuthError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AuthError::internal(format!("hashing task failed: {e}")))
}
