use std::borrow::Cow;
use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

/// Role claim carried by a principal and its tokens.
///
/// Roles are opaque strings here; what a role permits is decided by whoever
/// consumes the claims.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Role {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

/// Maps directory groups onto role claims.
///
/// Group names are compared case-insensitively. Groups without a mapping are
/// dropped unless `passthrough` is set, in which case they become roles
/// verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleMapping {
    groups: HashMap<String, Vec<Role>>,
    #[serde(default)]
    passthrough: bool,
}

impl RoleMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mapping that turns every group into a role of the same name.
    pub fn passthrough() -> Self {
        Self {
            groups: HashMap::new(),
            passthrough: true,
        }
    }

    pub fn with_group(mut self, group: impl AsRef<str>, roles: impl IntoIterator<Item = Role>) -> Self {
        self.groups
            .entry(group.as_ref().to_ascii_lowercase())
            .or_default()
            .extend(roles);
        self
    }

    /// Resolve a group list into a sorted, de-duplicated role set.
    pub fn map_groups<S: AsRef<str>>(&self, groups: &[S]) -> Vec<Role> {
        let mut roles = BTreeSet::new();
        for group in groups {
            let group = group.as_ref().trim();
            if group.is_empty() {
                continue;
            }
            match self.groups.get(&group.to_ascii_lowercase()) {
                Some(mapped) => roles.extend(mapped.iter().cloned()),
                None if self.passthrough => {
                    roles.insert(Role::new(group.to_string()));
                }
                None => {}
            }
        }
        roles.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmapped_groups_are_dropped_by_default() {
        let mapping = RoleMapping::new().with_group("Domain Admins", [Role::new("admin")]);
        let roles = mapping.map_groups(&["domain admins", "printers"]);
        assert_eq!(roles, vec![Role::new("admin")]);
    }

    #[test]
    fn passthrough_keeps_unmapped_groups() {
        let mapping = RoleMapping::passthrough().with_group("ops", [Role::new("operator")]);
        let roles = mapping.map_groups(&["ops", "viewer", " "]);
        assert_eq!(roles, vec![Role::new("operator"), Role::new("viewer")]);
    }

    #[test]
    fn duplicate_grants_collapse() {
        let mapping = RoleMapping::new()
            .with_group("a", [Role::new("user")])
            .with_group("b", [Role::new("user"), Role::new("auditor")]);
        let roles = mapping.map_groups(&["a", "b"]);
        assert_eq!(roles, vec![Role::new("auditor"), Role::new("user")]);
    }
}
