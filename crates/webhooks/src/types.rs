//! Webhook configuration, delivery records and the retry policy.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use zoo_audit::Severity;
use zoo_core::TenantId;

use crate::signature;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(ConfigId);
uuid_id!(DeliveryId);

/// A subscriber endpoint. `tenant_id: None` subscribes to platform-wide events.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub id: ConfigId,
    pub tenant_id: Option<TenantId>,
    pub target_url: String,
    pub secret: String,
    /// Empty = every event type.
    #[serde(default)]
    pub event_types: BTreeSet<String>,
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Per-endpoint override of the worker's retry policy.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

fn default_min_severity() -> Severity {
    Severity::Info
}

fn default_active() -> bool {
    true
}

impl std::fmt::Debug for NotificationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationConfig")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("target_url", &self.target_url)
            .field("secret", &"<redacted>")
            .field("event_types", &self.event_types)
            .field("min_severity", &self.min_severity)
            .field("active", &self.active)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

impl NotificationConfig {
    pub fn new(tenant_id: Option<TenantId>, target_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: ConfigId::new(),
            tenant_id,
            target_url: target_url.into(),
            secret: secret.into(),
            event_types: BTreeSet::new(),
            min_severity: default_min_severity(),
            active: true,
            max_attempts: None,
        }
    }

    pub fn subscribe(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.insert(event_type.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    /// Whether an event with these attributes should go to this endpoint.
    pub fn wants(&self, event_type: &str, severity: Severity, tenants: &[Option<&TenantId>]) -> bool {
        if !self.active || severity < self.min_severity {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(event_type) {
            return false;
        }
        match &self.tenant_id {
            None => true,
            Some(own) => tenants.iter().any(|t| *t == Some(own)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InFlight,
    Delivered,
    Failed,
    Abandoned,
    Cancelled,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Abandoned | Self::Cancelled)
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Exponential,
}

/// Retry schedule for failed deliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Attempts before a delivery is abandoned, counting the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Ceiling on any single delay.
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
    /// Jitter factor (0.0-1.0).
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 30_000,
            max_delay_ms: 3_600_000,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        let ms = delay.as_millis() as u64;
        Self {
            max_attempts,
            base_delay_ms: ms,
            max_delay_ms: ms,
            strategy: BackoffStrategy::Fixed,
            jitter: 0.0,
        }
    }

    pub fn exponential(max_attempts: u32, base: Duration, ceiling: Duration) -> Self {
        Self {
            max_attempts,
            base_delay_ms: base.as_millis() as u64,
            max_delay_ms: ceiling.as_millis() as u64,
            strategy: BackoffStrategy::Exponential,
            jitter: 0.0,
        }
    }

    /// Delay before the retry that follows `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base = self.base_delay_ms as f64;
        let ceiling = self.max_delay_ms as f64;
        let delay = match self.strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Exponential => (base * 2_f64.powi((attempt - 1).min(62) as i32)).min(ceiling),
        };

        // Deterministic per-attempt spread; never pushes past the ceiling.
        let spread = delay * self.jitter.clamp(0.0, 1.0);
        let offset = if spread > 0.0 {
            let unit = ((attempt as f64 * 17.0) % 100.0) / 100.0;
            spread * (unit - 0.5) * 2.0
        } else {
            0.0
        };

        Duration::from_millis((delay + offset).clamp(0.0, ceiling.max(base)) as u64)
    }

    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

/// One event bound for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookDelivery {
    pub id: DeliveryId,
    pub config_id: ConfigId,
    pub tenant_id: Option<TenantId>,
    pub event_type: String,
    pub event_id: String,
    /// Raw JSON body, exactly as signed.
    pub payload: String,
    pub target_url: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    /// Endpoint override; `None` defers to the worker's [`RetryPolicy`].
    pub max_attempts: Option<u32>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub idempotency_key: String,
    pub signature: String,
    /// Set while `InFlight`; a claim older than this is presumed lost.
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookDelivery {
    /// Build a pending delivery, signing `payload` with the config's secret.
    pub fn new(
        config: &NotificationConfig,
        tenant_id: Option<TenantId>,
        event_type: impl Into<String>,
        event_id: impl Into<String>,
        payload: String,
        now: DateTime<Utc>,
    ) -> Self {
        let event_id = event_id.into();
        Self {
            id: DeliveryId::new(),
            config_id: config.id,
            tenant_id,
            event_type: event_type.into(),
            idempotency_key: idempotency_key(config.id, &event_id),
            event_id,
            signature: signature::sign(config.secret.as_bytes(), payload.as_bytes()),
            payload,
            target_url: config.target_url.clone(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            max_attempts: config.max_attempts,
            next_retry_at: None,
            last_error: None,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.next_retry_at.is_none_or(|at| now >= at)
    }

    /// Start an attempt. Callers are the store's atomic claim only.
    pub fn mark_in_flight(&mut self, now: DateTime<Utc>, lease: Duration) {
        self.status = DeliveryStatus::InFlight;
        self.attempt_count += 1;
        self.lease_expires_at = Some(now + chrono::Duration::from_std(lease).unwrap_or_default());
        self.updated_at = now;
    }

    pub fn mark_delivered(&mut self, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Delivered;
        self.next_retry_at = None;
        self.lease_expires_at = None;
        self.last_error = None;
        self.updated_at = now;
    }

    /// Record a failed attempt: reschedule, or abandon once attempts run out.
    pub fn mark_failed(&mut self, error: impl Into<String>, policy: &RetryPolicy, now: DateTime<Utc>) {
        self.last_error = Some(error.into());
        self.lease_expires_at = None;
        self.updated_at = now;

        let retry = match self.max_attempts {
            Some(max) => self.attempt_count < max.max(1),
            None => policy.should_retry(self.attempt_count),
        };
        if !retry {
            self.status = DeliveryStatus::Abandoned;
            self.next_retry_at = None;
        } else {
            let delay = policy.delay_for_attempt(self.attempt_count);
            self.status = DeliveryStatus::Failed;
            self.next_retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
        }
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = DeliveryStatus::Cancelled;
        self.next_retry_at = None;
        self.updated_at = now;
    }
}

/// `X-Idempotency-Key` value: stable per (endpoint, event).
pub fn idempotency_key(config_id: ConfigId, event_id: &str) -> String {
    format!("{config_id}:{event_id}")
}
