//! Tenant record as seen by the authorization core.
//!
//! Tenants are owned by the persistence layer. The core only reads `id`,
//! `active`, quotas and feature flags; theme/config blobs are carried through
//! untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{DomainError, DomainResult, TenantId};

/// Resource limits of a tenant. `None` means unlimited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantQuotas {
    pub max_users: Option<u64>,
    pub max_records: Option<u64>,
    pub storage_cap_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaKind {
    Users,
    Records,
    StorageBytes,
}

impl core::fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            QuotaKind::Users => f.write_str("users"),
            QuotaKind::Records => f.write_str("records"),
            QuotaKind::StorageBytes => f.write_str("storage_bytes"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub display_name: String,
    pub active: bool,
    #[serde(default)]
    pub quotas: TenantQuotas,
    #[serde(default)]
    pub feature_flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub theme: serde_json::Value,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl Tenant {
    /// An active tenant with no quotas and no flags.
    pub fn new(id: TenantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            active: true,
            quotas: TenantQuotas::default(),
            feature_flags: BTreeMap::new(),
            theme: serde_json::Value::Null,
            config: serde_json::Value::Null,
        }
    }

    pub fn with_quotas(mut self, quotas: TenantQuotas) -> Self {
        self.quotas = quotas;
        self
    }

    pub fn with_feature(mut self, name: impl Into<String>, enabled: bool) -> Self {
        self.feature_flags.insert(name.into(), enabled);
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }

    /// Unknown flags are off.
    pub fn feature_enabled(&self, name: &str) -> bool {
        self.feature_flags.get(name).copied().unwrap_or(false)
    }

    pub fn quota(&self, kind: QuotaKind) -> Option<u64> {
        match kind {
            QuotaKind::Users => self.quotas.max_users,
            QuotaKind::Records => self.quotas.max_records,
            QuotaKind::StorageBytes => self.quotas.storage_cap_bytes,
        }
    }

    /// Check that usage after the operation (`requested`) stays within the quota.
    pub fn check_quota(&self, kind: QuotaKind, requested: u64) -> DomainResult<()> {
        match self.quota(kind) {
            Some(limit) if requested > limit => Err(DomainError::QuotaExceeded {
                kind: kind.to_string(),
                limit,
                requested,
            }),
            _ => Ok(()),
        }
    }
}
