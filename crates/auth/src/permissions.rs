use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Permission identifier, by convention `RESOURCE:ACTION` (e.g. `RECORDS:EDIT`).
///
/// Permissions are normalized to uppercase. The special wildcard `"*"` grants
/// everything and is reserved for platform roles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.len() == name.len() && !trimmed.chars().any(|c| c.is_ascii_lowercase()) {
            return Self(name);
        }
        Self(Cow::Owned(trimmed.to_ascii_uppercase()))
    }

    pub fn wildcard() -> Self {
        Self(Cow::Borrowed("*"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.as_str() == "*"
    }

    /// Part before the first `:` (the whole name if there is none).
    pub fn resource(&self) -> &str {
        self.as_str().split_once(':').map_or(self.as_str(), |(r, _)| r)
    }

    /// Part after the first `:` (empty if there is none).
    pub fn action(&self) -> &str {
        self.as_str().split_once(':').map_or("", |(_, a)| a)
    }
}

impl From<String> for Permission {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&'static str> for Permission {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

impl From<Permission> for String {
    fn from(value: Permission) -> Self {
        value.0.into_owned()
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
}

/// Classifies permissions into reads/writes and administrative resources.
///
/// The cross-tenant super-admin rules treat reads of administrative resources
/// differently from everything else, so the classification is configuration,
/// not string matching scattered across call sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PermissionClassifier {
    /// Actions that only read (`VIEW`, ...). Anything else is a write.
    pub read_actions: BTreeSet<String>,
    /// Resources that belong to platform administration (`TENANTS`, ...).
    pub admin_resources: BTreeSet<String>,
}

impl Default for PermissionClassifier {
    fn default() -> Self {
        Self {
            read_actions: ["READ", "VIEW", "LIST"].into_iter().map(String::from).collect(),
            admin_resources: ["ADMIN", "TENANTS", "AUDIT", "USERS"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl PermissionClassifier {
    pub fn access_kind(&self, permission: &Permission) -> AccessKind {
        let action = permission.action().to_ascii_uppercase();
        if self.read_actions.iter().any(|a| a.eq_ignore_ascii_case(&action)) {
            AccessKind::Read
        } else {
            AccessKind::Write
        }
    }

    pub fn is_administrative(&self, permission: &Permission) -> bool {
        let resource = permission.resource();
        self.admin_resources
            .iter()
            .any(|r| r.eq_ignore_ascii_case(resource))
    }
}
