//! Delivery and notification-config storage.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::types::{ConfigId, DeliveryId, DeliveryStatus, NotificationConfig, RetryPolicy, WebhookDelivery};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryStoreError {
    #[error("delivery not found: {0}")]
    NotFound(DeliveryId),

    #[error("notification config not found: {0}")]
    ConfigNotFound(ConfigId),

    /// The stored row moved on (reaped, cancelled, reclaimed) since it was read.
    #[error("delivery {id} is {actual:?}, cannot transition to {requested:?}")]
    InvalidTransition {
        id: DeliveryId,
        actual: DeliveryStatus,
        requested: DeliveryStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),
}

fn poisoned<T>(_: T) -> DeliveryStoreError {
    DeliveryStoreError::Storage("lock poisoned".to_string())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub pending: usize,
    pub in_flight: usize,
    pub delivered: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub cancelled: usize,
}

/// Webhook delivery persistence.
///
/// `claim_next` must be an atomic conditional transition: a delivery is
/// handed to at most one worker per attempt.
pub trait DeliveryStore: Send + Sync {
    /// Insert a delivery, or return the existing one with the same
    /// idempotency key.
    fn enqueue(&self, delivery: WebhookDelivery) -> Result<WebhookDelivery, DeliveryStoreError>;

    fn get(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>, DeliveryStoreError>;

    /// Oldest ready Pending/Failed delivery, moved to InFlight under a lease.
    fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<WebhookDelivery>, DeliveryStoreError>;

    /// Persist the outcome of an attempt. The stored row must still be the
    /// same InFlight attempt.
    fn complete_attempt(&self, delivery: &WebhookDelivery) -> Result<(), DeliveryStoreError>;

    /// Cancel a delivery that is not in flight and not terminal.
    fn cancel(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<WebhookDelivery, DeliveryStoreError>;

    fn list_by_status(
        &self,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, DeliveryStoreError>;

    /// Fail InFlight deliveries whose lease ran out (the worker died).
    /// Returns the deliveries that changed.
    fn reap_expired_leases(
        &self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<Vec<WebhookDelivery>, DeliveryStoreError>;

    fn stats(&self) -> Result<DeliveryStats, DeliveryStoreError>;
}

/// In-memory delivery store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    inner: RwLock<Deliveries>,
}

#[derive(Debug, Default)]
struct Deliveries {
    by_id: HashMap<DeliveryId, WebhookDelivery>,
    by_key: HashMap<String, DeliveryId>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DeliveryStore for InMemoryDeliveryStore {
    fn enqueue(&self, delivery: WebhookDelivery) -> Result<WebhookDelivery, DeliveryStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if let Some(existing) = inner
            .by_key
            .get(&delivery.idempotency_key)
            .and_then(|id| inner.by_id.get(id))
        {
            return Ok(existing.clone());
        }
        inner.by_key.insert(delivery.idempotency_key.clone(), delivery.id);
        inner.by_id.insert(delivery.id, delivery.clone());
        Ok(delivery)
    }

    fn get(&self, id: DeliveryId) -> Result<Option<WebhookDelivery>, DeliveryStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.by_id.get(&id).cloned())
    }

    fn claim_next(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<WebhookDelivery>, DeliveryStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;

        let next = inner
            .by_id
            .values()
            .filter(|d| d.is_ready(now))
            .min_by_key(|d| (d.next_retry_at.unwrap_or(d.created_at), d.created_at, d.id))
            .map(|d| d.id);

        Ok(next.and_then(|id| inner.by_id.get_mut(&id)).map(|d| {
            d.mark_in_flight(now, lease);
            d.clone()
        }))
    }

    fn complete_attempt(&self, delivery: &WebhookDelivery) -> Result<(), DeliveryStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let stored = inner
            .by_id
            .get_mut(&delivery.id)
            .ok_or(DeliveryStoreError::NotFound(delivery.id))?;

        if stored.status != DeliveryStatus::InFlight || stored.attempt_count != delivery.attempt_count {
            return Err(DeliveryStoreError::InvalidTransition {
                id: delivery.id,
                actual: stored.status,
                requested: delivery.status,
            });
        }
        *stored = delivery.clone();
        Ok(())
    }

    fn cancel(&self, id: DeliveryId, now: DateTime<Utc>) -> Result<WebhookDelivery, DeliveryStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let stored = inner.by_id.get_mut(&id).ok_or(DeliveryStoreError::NotFound(id))?;

        if !stored.status.is_claimable() {
            return Err(DeliveryStoreError::InvalidTransition {
                id,
                actual: stored.status,
                requested: DeliveryStatus::Cancelled,
            });
        }
        stored.mark_cancelled(now);
        Ok(stored.clone())
    }

    fn list_by_status(
        &self,
        status: Option<DeliveryStatus>,
        limit: usize,
    ) -> Result<Vec<WebhookDelivery>, DeliveryStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut out: Vec<_> = inner
            .by_id
            .values()
            .filter(|d| status.is_none_or(|s| d.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|d| (d.created_at, d.id));
        out.truncate(limit);
        Ok(out)
    }

    fn reap_expired_leases(
        &self,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> Result<Vec<WebhookDelivery>, DeliveryStoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let mut reaped = Vec::new();
        for d in inner.by_id.values_mut() {
            let expired = d.status == DeliveryStatus::InFlight && d.lease_expires_at.is_some_and(|at| now >= at);
            if expired {
                d.mark_failed("delivery lease expired", policy, now);
                reaped.push(d.clone());
            }
        }
        reaped.sort_by_key(|d| d.created_at);
        Ok(reaped)
    }

    fn stats(&self) -> Result<DeliveryStats, DeliveryStoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        let mut stats = DeliveryStats::default();
        for d in inner.by_id.values() {
            match d.status {
                DeliveryStatus::Pending => stats.pending += 1,
                DeliveryStatus::InFlight => stats.in_flight += 1,
                DeliveryStatus::Delivered => stats.delivered += 1,
                DeliveryStatus::Failed => stats.failed += 1,
                DeliveryStatus::Abandoned => stats.abandoned += 1,
                DeliveryStatus::Cancelled => stats.cancelled += 1,
            }
        }
        Ok(stats)
    }
}

/// Subscriber endpoints.
pub trait NotificationConfigStore: Send + Sync {
    fn upsert(&self, config: NotificationConfig) -> Result<(), DeliveryStoreError>;

    fn get(&self, id: ConfigId) -> Result<Option<NotificationConfig>, DeliveryStoreError>;

    fn list_active(&self) -> Result<Vec<NotificationConfig>, DeliveryStoreError>;

    fn set_active(&self, id: ConfigId, active: bool) -> Result<(), DeliveryStoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationConfigStore {
    configs: RwLock<HashMap<ConfigId, NotificationConfig>>,
}

impl InMemoryNotificationConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = NotificationConfig>) -> Self {
        Self {
            configs: RwLock::new(configs.into_iter().map(|c| (c.id, c)).collect()),
        }
    }
}

impl NotificationConfigStore for InMemoryNotificationConfigStore {
    fn upsert(&self, config: NotificationConfig) -> Result<(), DeliveryStoreError> {
        self.configs.write().map_err(poisoned)?.insert(config.id, config);
        Ok(())
    }

    fn get(&self, id: ConfigId) -> Result<Option<NotificationConfig>, DeliveryStoreError> {
        Ok(self.configs.read().map_err(poisoned)?.get(&id).cloned())
    }

    fn list_active(&self) -> Result<Vec<NotificationConfig>, DeliveryStoreError> {
        let configs = self.configs.read().map_err(poisoned)?;
        let mut out: Vec<_> = configs.values().filter(|c| c.active).cloned().collect();
        out.sort_by_key(|c| c.id);
        Ok(out)
    }

    fn set_active(&self, id: ConfigId, active: bool) -> Result<(), DeliveryStoreError> {
        let mut configs = self.configs.write().map_err(poisoned)?;
        let config = configs.get_mut(&id).ok_or(DeliveryStoreError::ConfigNotFound(id))?;
        config.active = active;
        Ok(())
    }
}
