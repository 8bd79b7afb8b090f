//! `keyward-auth` — authentication boundary.
//!
//! Credential verification, password hashing, token issuance/validation and
//! the orchestrator tying them together. Storage, directory protocol and
//! audit delivery are ports implemented elsewhere.

pub mod audit;
pub mod authorize;
pub mod claims;
pub mod credentials;
pub mod directory;
pub mod keys;
pub mod password;
pub mod principal;
pub mod roles;
pub mod service;
pub mod session;
pub mod store;
pub mod token;
pub mod verifier;

pub use audit::{AuditSink, MemoryAuditSink, NoopAuditSink, SecurityEvent};
pub use authorize::{AuthzError, explain_role_check, require_admin, require_any_role};
pub use claims::{Claims, validate_claims};
pub use credentials::{CredentialRecord, CredentialStore};
pub use directory::{
    DirectoryAttributes, DirectoryClient, DirectoryError, DirectoryHealth, DirectorySnapshot,
    DirectoryStatus,
};
pub use keys::{KeyRing, KeySet, SigningKey, SigningKeyProvider};
pub use password::{HashError, HashPolicy, HashVerdict, PasswordHasher};
pub use principal::Principal;
pub use roles::{Role, RoleMapping};
pub use service::AuthService;
pub use session::{RevokeOutcome, RotateOutcome, SessionEntry, SessionStore};
pub use store::{StoreError, with_deadline};
pub use token::{IssuedToken, TokenConfig, TokenPair, TokenService};
pub use verifier::{BackendPolicy, CredentialVerifier};
