use serde::{Deserialize, Serialize};

use keyward_core::{BackendKind, Username};

use crate::Role;

/// An authenticated identity.
///
/// Built by the credential verifier after a successful bind or hash check and
/// discarded once its tokens are minted; nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: Username,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    /// Backend that vouched for this identity.
    pub source: BackendKind,
}

impl Principal {
    pub fn new(username: impl Into<Username>, source: BackendKind) -> Self {
        Self {
            username: username.into(),
            display_name: None,
            email: None,
            roles: Vec::new(),
            source,
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

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.as_str() == role)
    }
}
