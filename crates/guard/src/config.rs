//! Guard configuration: TOML file plus environment overrides.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zoo_auth::{PermissionClassifier, RolePermissionTable, SessionConfig, TenantResolverConfig};
use zoo_core::TenantId;
use zoo_observability::LoggingConfig;
use zoo_webhooks::{RetryPolicy, WorkerConfig};

/// Path of the TOML config file.
pub const ENV_CONFIG_PATH: &str = "ZOO_GUARD_CONFIG";
pub const ENV_DEFAULT_TENANT: &str = "ZOO_DEFAULT_TENANT";
pub const ENV_BASE_DOMAIN: &str = "ZOO_BASE_DOMAIN";
pub const ENV_LOG_FORMAT: &str = "ZOO_LOG_FORMAT";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    InvalidOverride { var: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Compare-and-append attempts before an audit write is declared failed.
    pub max_append_attempts: u32,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self { max_append_attempts: 8 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookSettings {
    pub retry: RetryPolicy,
    pub timeout_secs: u64,
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub lease_secs: u64,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            timeout_secs: 10,
            workers: 2,
            poll_interval_ms: 250,
            lease_secs: 60,
        }
    }
}

impl WebhookSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            name: "webhook-worker".to_string(),
            workers: self.workers.max(1),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            // The lease must outlive a full request timeout.
            lease: Duration::from_secs(self.lease_secs.max(self.timeout_secs + 1)),
        }
    }
}

/// Everything needed to wire the authorization core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub logging: LoggingConfig,
    pub tenants: TenantResolverConfig,
    pub roles: RolePermissionTable,
    pub permissions: PermissionClassifier,
    pub sessions: SessionConfig,
    pub audit: AuditSettings,
    pub webhooks: WebhookSettings,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            tenants: TenantResolverConfig::default(),
            roles: RolePermissionTable::zoo_defaults(),
            permissions: PermissionClassifier::default(),
            sessions: SessionConfig::default(),
            audit: AuditSettings::default(),
            webhooks: WebhookSettings::default(),
        }
    }
}

impl GuardConfig {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        toml::from_str(raw).context("failed to parse guard configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Load from `ZOO_GUARD_CONFIG` (defaults when unset), then apply the
    /// process environment on top.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(ENV_CONFIG_PATH).filter(|p| !p.trim().is_empty()) {
            Some(path) => Self::from_file(path.trim())?,
            None => Self::default(),
        };
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Apply environment-style overrides. An empty `ZOO_DEFAULT_TENANT` clears
    /// the default tenant.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup(ENV_DEFAULT_TENANT) {
            self.tenants.default_tenant = match raw.trim() {
                "" => None,
                value => Some(TenantId::parse(value).map_err(|e| ConfigError::InvalidOverride {
                    var: ENV_DEFAULT_TENANT,
                    reason: e.to_string(),
                })?),
            };
        }

        if let Some(raw) = lookup(ENV_BASE_DOMAIN) {
            let domain = raw.trim().trim_start_matches('.').to_ascii_lowercase();
            self.tenants.base_domain = (!domain.is_empty()).then_some(domain);
        }

        if let Some(raw) = lookup(ENV_LOG_FORMAT) {
            self.logging.format = raw
                .parse()
                .map_err(|reason| ConfigError::InvalidOverride { var: ENV_LOG_FORMAT, reason })?;
        }

        Ok(())
    }
}
