//! Turns appended audit entries into webhook deliveries.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use zoo_audit::{AuditListener, AuditLogEntry, Severity};
use zoo_core::TenantId;

use crate::store::{DeliveryStore, DeliveryStoreError, NotificationConfigStore};
use crate::types::WebhookDelivery;
use crate::worker::OP_DELIVERY_ABANDONED;

/// JSON body posted to subscribers.
#[derive(Debug, Serialize)]
struct EventPayload<'a> {
    event_id: &'a str,
    event_type: &'a str,
    occurred_at: String,
    sequence: u64,
    severity: Severity,
    tenant_id: Option<&'a TenantId>,
    impersonated_tenant_id: Option<&'a TenantId>,
    entity_type: &'a str,
    entity_id: &'a str,
    performed_by: &'a str,
    before: Option<&'a serde_json::Value>,
    after: Option<&'a serde_json::Value>,
    integrity_hash: &'a str,
}

/// Audit listener fanning entries out to matching [`NotificationConfig`]s.
///
/// [`NotificationConfig`]: crate::NotificationConfig
pub struct WebhookDispatcher {
    configs: Arc<dyn NotificationConfigStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

impl WebhookDispatcher {
    pub fn new(configs: Arc<dyn NotificationConfigStore>, deliveries: Arc<dyn DeliveryStore>) -> Self {
        Self { configs, deliveries }
    }

    /// Enqueue deliveries for `entry`. Returns how many endpoints matched.
    pub fn dispatch(&self, entry: &AuditLogEntry) -> Result<usize, DeliveryStoreError> {
        // Abandonment notices would themselves fail to the same endpoints.
        if entry.operation() == OP_DELIVERY_ABANDONED {
            return Ok(0);
        }

        let tenants = [entry.tenant_id(), entry.impersonated_tenant_id()];
        let configs: Vec<_> = self
            .configs
            .list_active()?
            .into_iter()
            .filter(|c| c.wants(entry.operation(), entry.severity(), &tenants))
            .collect();
        if configs.is_empty() {
            return Ok(0);
        }

        // The integrity hash is unique per entry and stable across retries.
        let event_id = entry.integrity_hash();
        let body = serde_json::to_string(&EventPayload {
            event_id,
            event_type: entry.operation(),
            occurred_at: entry.timestamp().to_rfc3339(),
            sequence: entry.sequence(),
            severity: entry.severity(),
            tenant_id: entry.tenant_id(),
            impersonated_tenant_id: entry.impersonated_tenant_id(),
            entity_type: entry.entity_type(),
            entity_id: entry.entity_id(),
            performed_by: entry.performed_by(),
            before: entry.before_data(),
            after: entry.after_data(),
            integrity_hash: entry.integrity_hash(),
        })
        .map_err(|e| DeliveryStoreError::Storage(format!("payload serialization: {e}")))?;

        let tenant = entry
            .tenant_id()
            .or(entry.impersonated_tenant_id())
            .cloned();
        for config in &configs {
            let delivery = WebhookDelivery::new(
                config,
                tenant.clone(),
                entry.operation(),
                event_id,
                body.clone(),
                entry.timestamp(),
            );
            let stored = self.deliveries.enqueue(delivery)?;
            debug!(
                delivery_id = %stored.id,
                config_id = %config.id,
                event_type = entry.operation(),
                "webhook delivery enqueued"
            );
        }
        Ok(configs.len())
    }
}

impl AuditListener for WebhookDispatcher {
    fn on_appended(&self, entry: &AuditLogEntry) -> Result<(), String> {
        self.dispatch(entry).map(|_| ()).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono::Utc;
    use zoo_audit::{AuditLogger, AuditRecord, InMemoryAuditStore};

    use crate::store::{InMemoryDeliveryStore, InMemoryNotificationConfigStore};
    use crate::types::{DeliveryStatus, NotificationConfig};

    fn tid(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    struct Fixture {
        audit: AuditLogger,
        deliveries: Arc<InMemoryDeliveryStore>,
        dispatcher: Arc<WebhookDispatcher>,
    }

    fn fixture(configs: Vec<NotificationConfig>) -> Fixture {
        let deliveries = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Arc::new(WebhookDispatcher::new(
            Arc::new(InMemoryNotificationConfigStore::with_configs(configs)),
            deliveries.clone(),
        ));
        let audit = AuditLogger::new(Arc::new(InMemoryAuditStore::new())).with_listener(dispatcher.clone());
        Fixture {
            audit,
            deliveries,
            dispatcher,
        }
    }

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, 10, 0, 0).unwrap()
    }

    #[test]
    fn matching_configs_receive_signed_deliveries() {
        let praha = NotificationConfig::new(Some(tid("zoo-praha")), "https://praha.example/hook", "p");
        let brno = NotificationConfig::new(Some(tid("zoo-brno")), "https://brno.example/hook", "b");
        let platform = NotificationConfig::new(None, "https://ops.example/hook", "o").with_min_severity(Severity::Warning);
        let f = fixture(vec![praha.clone(), brno, platform.clone()]);

        f.audit
            .record_at(
                AuditRecord::new("SUPERADMIN_IMPERSONATION_STARTED", "superadmin_session", "s-1", "auth0|root")
                    .tenant(tid("zoo-praha"))
                    .impersonating(Some(tid("zoo-praha")))
                    .severity(Severity::Warning),
                now(),
            )
            .unwrap();

        let queued = f.deliveries.list_by_status(Some(DeliveryStatus::Pending), 10).unwrap();
        let mut targets: Vec<_> = queued.iter().map(|d| d.config_id).collect();
        targets.sort();
        let mut expected = vec![praha.id, platform.id];
        expected.sort();
        assert_eq!(targets, expected);

        let body: serde_json::Value = serde_json::from_str(&queued[0].payload).unwrap();
        assert_eq!(body["event_type"], "SUPERADMIN_IMPERSONATION_STARTED");
        assert_eq!(body["tenant_id"], "zoo-praha");
        assert_eq!(queued[0].tenant_id, Some(tid("zoo-praha")));
    }

    #[test]
    fn redispatch_of_the_same_entry_is_idempotent() {
        let f = fixture(vec![NotificationConfig::new(None, "https://ops.example/hook", "o")]);
        let entry = f
            .audit
            .record_at(AuditRecord::new("TENANT_UPDATED", "tenant", "zoo-brno", "auth0|root"), now())
            .unwrap();

        assert_eq!(f.dispatcher.dispatch(&entry).unwrap(), 1);
        assert_eq!(f.deliveries.list_by_status(None, 10).unwrap().len(), 1);
    }

    #[test]
    fn abandonment_entries_are_not_dispatched() {
        let f = fixture(vec![NotificationConfig::new(None, "https://ops.example/hook", "o")]);
        f.audit
            .record_at(
                AuditRecord::new(OP_DELIVERY_ABANDONED, "webhook_delivery", "d-1", "system:webhook-worker")
                    .severity(Severity::Critical),
                now(),
            )
            .unwrap();
        assert!(f.deliveries.list_by_status(None, 10).unwrap().is_empty());
    }
}
