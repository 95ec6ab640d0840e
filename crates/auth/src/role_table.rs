//! Static role → permission mapping, passed in as configuration.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{Permission, Role};

/// Role → permission table.
///
/// Built once from configuration and shared read-only (`Arc`) by the claims
/// processor, the decision engine and the session manager. Lookups are
/// deterministic and a principal holding several roles gets the union.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Vec<String>>", into = "BTreeMap<String, Vec<String>>")]
pub struct RolePermissionTable {
    roles: BTreeMap<Role, BTreeSet<Permission>>,
}

impl RolePermissionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or extend) a role. Names are normalized, so `Curator` and
    /// `curator` land in the same entry.
    pub fn with_role<I, P>(mut self, role: impl Into<Role>, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Permission>,
    {
        self.roles
            .entry(role.into())
            .or_default()
            .extend(permissions.into_iter().map(Into::into));
        self
    }

    pub fn contains_role(&self, role: &Role) -> bool {
        self.roles.contains_key(role)
    }

    /// Permissions of one role; unknown roles map to nothing.
    pub fn permissions_of(&self, role: &Role) -> Option<&BTreeSet<Permission>> {
        self.roles.get(role)
    }

    /// Union of permissions over `roles`. Unknown roles contribute nothing.
    pub fn permissions_for<'a, I>(&self, roles: I) -> BTreeSet<Permission>
    where
        I: IntoIterator<Item = &'a Role>,
    {
        roles
            .into_iter()
            .filter_map(|r| self.roles.get(r))
            .flat_map(|perms| perms.iter().cloned())
            .collect()
    }

    /// Whether `role` grants `permission` (directly or via `*`).
    pub fn role_grants(&self, role: &Role, permission: &Permission) -> bool {
        self.roles
            .get(role)
            .is_some_and(|perms| perms.contains(permission) || perms.iter().any(|p| p.is_wildcard()))
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.keys()
    }

    /// The built-in table for zoo tenants.
    pub fn zoo_defaults() -> Self {
        const VIEWER: [&str; 3] = ["ANIMALS:VIEW", "RECORDS:VIEW", "ENCLOSURES:VIEW"];

        Self::new()
            .with_role(Role::new("viewer"), VIEWER)
            .with_role(Role::new("keeper"), VIEWER)
            .with_role(Role::new("keeper"), ["FEEDING:VIEW", "FEEDING:EDIT", "ANIMALS:EDIT"])
            .with_role(Role::new("veterinarian"), VIEWER)
            .with_role(Role::new("veterinarian"), ["MEDICAL:VIEW", "MEDICAL:EDIT"])
            .with_role(Role::new("curator"), VIEWER)
            .with_role(
                Role::new("curator"),
                ["RECORDS:EDIT", "ANIMALS:EDIT", "ENCLOSURES:EDIT", "REPORTS:VIEW", "TRANSFERS:EDIT"],
            )
            .with_role(Role::new("tenant-admin"), VIEWER)
            .with_role(
                Role::new("tenant-admin"),
                [
                    "RECORDS:EDIT",
                    "ANIMALS:EDIT",
                    "ENCLOSURES:EDIT",
                    "REPORTS:VIEW",
                    "USERS:VIEW",
                    "USERS:EDIT",
                    "SETTINGS:EDIT",
                    "AUDIT:VIEW",
                ],
            )
            .with_role(Role::super_admin(), ["*"])
    }
}

impl From<BTreeMap<String, Vec<String>>> for RolePermissionTable {
    fn from(value: BTreeMap<String, Vec<String>>) -> Self {
        value
            .into_iter()
            .fold(Self::new(), |table, (role, perms)| {
                table.with_role(Role::new(role), perms.into_iter().map(Permission::new))
            })
    }
}

impl From<RolePermissionTable> for BTreeMap<String, Vec<String>> {
    fn from(value: RolePermissionTable) -> Self {
        value
            .roles
            .into_iter()
            .map(|(role, perms)| (role.into(), perms.into_iter().map(Into::into).collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_over_roles_is_order_independent() {
        let table = RolePermissionTable::zoo_defaults();
        let a = table.permissions_for(&[Role::new("keeper"), Role::new("veterinarian")]);
        let b = table.permissions_for(&[Role::new("veterinarian"), Role::new("keeper")]);

        assert_eq!(a, b);
        assert!(a.contains(&Permission::new("MEDICAL:EDIT")));
        assert!(a.contains(&Permission::new("FEEDING:EDIT")));
    }

    #[test]
    fn unknown_roles_contribute_nothing() {
        let table = RolePermissionTable::zoo_defaults();
        assert!(table.permissions_for(&[Role::new("janitor")]).is_empty());
        assert!(!table.role_grants(&Role::new("janitor"), &Permission::new("RECORDS:VIEW")));
    }

    #[test]
    fn wildcard_role_grants_everything() {
        let table = RolePermissionTable::zoo_defaults();
        assert!(table.role_grants(&Role::super_admin(), &Permission::new("TENANTS:DELETE")));
    }

    #[test]
    fn deserializes_from_a_plain_map() {
        let table: RolePermissionTable = serde_json::from_value(serde_json::json!({
            "Curator": ["records:edit"],
            "curator": ["records:view"]
        }))
        .unwrap();

        let perms = table.permissions_of(&Role::new("curator")).unwrap();
        assert_eq!(perms.len(), 2);
        assert!(perms.contains(&Permission::new("RECORDS:EDIT")));
    }
}
