use std::collections::BTreeSet;

use serde::Serialize;
use thiserror::Error;

use keyward_core::Username;

use crate::Role;
use crate::claims::Claims;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("forbidden: requires one of [{0}]")]
    Forbidden(String),
}

/// Require that the token carries at least one of `required`.
///
/// An empty `required` list never grants access.
///
/// - No IO
/// - No panics
pub fn require_any_role<R: AsRef<str>>(claims: &Claims, required: &[R]) -> Result<(), AuthzError> {
    if required.iter().any(|r| claims.has_role(r.as_ref())) {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(
            required.iter().map(|r| r.as_ref()).collect::<Vec<_>>().join(", "),
        ))
    }
}

/// Require one of the configured administrator roles.
pub fn require_admin<R: AsRef<str>>(claims: &Claims, admin_roles: &[R]) -> Result<(), AuthzError> {
    require_any_role(claims, admin_roles)
}

/// Why a role check passed or failed, for audit trails and debugging.
#[derive(Debug, Clone, Serialize)]
pub struct RoleCheckExplanation {
    pub subject: Username,
    pub granted: bool,
    /// Roles from `required` the token carries.
    pub matched: Vec<String>,
    pub missing: Vec<String>,
    pub held: Vec<String>,
}

pub fn explain_role_check<R: AsRef<str>>(claims: &Claims, required: &[R]) -> RoleCheckExplanation {
    let held: BTreeSet<&str> = claims.roles.iter().map(Role::as_str).collect();
    let (matched, missing): (Vec<String>, Vec<String>) = required
        .iter()
        .map(|r| r.as_ref().to_string())
        .partition(|r| held.contains(r.as_str()));

    RoleCheckExplanation {
        subject: claims.sub.clone(),
        granted: !matched.is_empty(),
        matched,
        missing,
        held: held.into_iter().map(str::to_string).collect(),
    }
}
