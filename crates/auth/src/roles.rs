use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role name of the platform super-administrator.
pub const SUPER_ADMIN_ROLE: &str = "superadmin";

/// Role identifier used for RBAC.
///
/// Identity providers are inconsistent about casing (`Curator`, `CURATOR`),
/// so role names are normalized to lowercase on construction and compared
/// case-insensitively by construction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.len() == name.len() && !trimmed.chars().any(|c| c.is_ascii_uppercase()) {
            return Self(name);
        }
        Self(Cow::Owned(trimmed.to_ascii_lowercase()))
    }

    pub fn super_admin() -> Self {
        Self(Cow::Borrowed(SUPER_ADMIN_ROLE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_super_admin(&self) -> bool {
        self.as_str() == SUPER_ADMIN_ROLE
    }
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.0.into_owned()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
