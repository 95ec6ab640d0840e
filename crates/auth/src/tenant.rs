//! Tenant lookup and request tenant resolution.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use zoo_core::{Tenant, TenantId};

/// Read access to tenant records owned by the persistence layer.
pub trait TenantDirectory: Send + Sync {
    fn get(&self, id: &TenantId) -> Option<Tenant>;

    fn is_active(&self, id: &TenantId) -> bool {
        self.get(id).is_some_and(|t| t.active)
    }
}

/// In-memory tenant directory for tests/dev and static deployments.
#[derive(Debug, Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<TenantId, Tenant>>,
}

impl InMemoryTenantDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenants(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        let dir = Self::new();
        for t in tenants {
            dir.upsert(t);
        }
        dir
    }

    pub fn upsert(&self, tenant: Tenant) {
        self.tenants
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(tenant.id.clone(), tenant);
    }

    /// Returns false if the tenant does not exist.
    pub fn set_active(&self, id: &TenantId, active: bool) -> bool {
        let mut tenants = self.tenants.write().unwrap_or_else(PoisonError::into_inner);
        match tenants.get_mut(id) {
            Some(t) => {
                t.active = active;
                true
            }
            None => false,
        }
    }
}

impl TenantDirectory for InMemoryTenantDirectory {
    fn get(&self, id: &TenantId) -> Option<Tenant> {
        self.tenants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

/// Tenant hint carried by the request itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum TenantHint {
    /// Request host, e.g. `zoo-praha.zoorecords.cz` (port allowed).
    Host(String),
    /// Explicit tenant header value.
    Header(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantSource {
    Claim,
    Subdomain,
    Header,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTenant {
    pub tenant: Tenant,
    pub source: TenantSource,
}

impl ResolvedTenant {
    pub fn id(&self) -> &TenantId {
        &self.tenant.id
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantResolutionError {
    /// A source named a tenant that is unknown, inactive or malformed.
    #[error("tenant not found: {candidate} (from {origin:?})")]
    TenantNotFound {
        candidate: String,
        origin: TenantSource,
    },

    /// No source produced a candidate and no default is configured.
    #[error("no tenant could be resolved for the request")]
    NoTenant,
}

/// Settings for [`TenantResolver`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantResolverConfig {
    /// Domain under which tenants are served as subdomains (`zoorecords.cz`).
    pub base_domain: Option<String>,
    /// Subdomains that never name a tenant (`www`, `app`).
    pub reserved_subdomains: Vec<String>,
    pub default_tenant: Option<TenantId>,
}

/// Determines the effective tenant for a request.
///
/// First match wins: token claim, then request hint, then the configured
/// default. A source that names a tenant which is not active fails the
/// resolution; it never falls through to the next source.
pub struct TenantResolver {
    directory: Arc<dyn TenantDirectory>,
    config: TenantResolverConfig,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn TenantDirectory>, config: TenantResolverConfig) -> Self {
        Self { directory, config }
    }

    pub fn resolve(
        &self,
        claim: Option<&TenantId>,
        hint: Option<&TenantHint>,
    ) -> Result<ResolvedTenant, TenantResolutionError> {
        if let Some(id) = claim {
            return self.lookup(id.as_str(), TenantSource::Claim);
        }

        if let Some((candidate, source)) = hint.and_then(|h| self.candidate_from_hint(h)) {
            return self.lookup(&candidate, source);
        }

        match &self.config.default_tenant {
            Some(id) => self.lookup(id.as_str(), TenantSource::Default),
            None => Err(TenantResolutionError::NoTenant),
        }
    }

    fn candidate_from_hint(&self, hint: &TenantHint) -> Option<(String, TenantSource)> {
        match hint {
            TenantHint::Header(value) => {
                let value = value.trim();
                (!value.is_empty()).then(|| (value.to_string(), TenantSource::Header))
            }
            TenantHint::Host(host) => {
                let base = self.config.base_domain.as_deref()?;
                let host = host.trim().to_ascii_lowercase();
                let host = host.split(':').next().unwrap_or_default();
                let label = host.strip_suffix(&format!(".{}", base.to_ascii_lowercase()))?;

                if label.is_empty() || label.contains('.') {
                    return None;
                }
                if self
                    .config
                    .reserved_subdomains
                    .iter()
                    .any(|r| r.eq_ignore_ascii_case(label))
                {
                    return None;
                }
                Some((label.to_string(), TenantSource::Subdomain))
            }
        }
    }

    fn lookup(&self, candidate: &str, source: TenantSource) -> Result<ResolvedTenant, TenantResolutionError> {
        let not_found = || TenantResolutionError::TenantNotFound {
            candidate: candidate.to_string(),
            origin: source,
        };

        let id = TenantId::parse(candidate).map_err(|_| not_found())?;
        match self.directory.get(&id) {
            Some(tenant) if tenant.active => {
                debug!(tenant_id = %tenant.id, ?source, "tenant resolved");
                Ok(ResolvedTenant { tenant, source })
            }
            _ => Err(not_found()),
        }
    }
}
