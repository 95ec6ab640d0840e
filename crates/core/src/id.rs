//! Strongly-typed identifiers used across the core.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maximum length of a tenant slug (fits a DNS label).
pub const MAX_TENANT_ID_LEN: usize = 63;

/// Identifier of a tenant (multi-tenant boundary), e.g. `zoo-praha`.
///
/// Tenant ids double as subdomain labels, so they are normalized to lowercase
/// and restricted to `[a-z0-9-]` without leading or trailing dashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

/// Identifier of an authenticated subject as issued by the identity provider
/// (e.g. `auth0|65f0c1`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubjectId(String);

impl TenantId {
    /// Parse and normalize a tenant slug.
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let slug = raw.trim().to_ascii_lowercase();
        if slug.is_empty() {
            return Err(DomainError::invalid_id("TenantId: empty"));
        }
        if slug.len() > MAX_TENANT_ID_LEN {
            return Err(DomainError::invalid_id(format!(
                "TenantId: longer than {MAX_TENANT_ID_LEN} characters"
            )));
        }
        if slug.starts_with('-') || slug.ends_with('-') {
            return Err(DomainError::invalid_id(format!(
                "TenantId: '{slug}' starts or ends with '-'"
            )));
        }
        if let Some(bad) = slug
            .chars()
            .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-'))
        {
            return Err(DomainError::invalid_id(format!(
                "TenantId: invalid character '{bad}' in '{slug}'"
            )));
        }
        Ok(Self(slug))
    }
}

impl SubjectId {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let sub = raw.trim();
        if sub.is_empty() {
            return Err(DomainError::invalid_id("SubjectId: empty"));
        }
        Ok(Self(sub.to_string()))
    }
}

macro_rules! impl_string_newtype {
    ($t:ty) => {
        impl $t {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl TryFrom<String> for $t {
            type Error = DomainError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::parse(&value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(TenantId);
impl_string_newtype!(SubjectId);
