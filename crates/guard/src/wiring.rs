//! Assembles the authorization core from a [`GuardConfig`].
//!
//! Every store and the webhook transport can be swapped out; anything not
//! supplied falls back to the in-memory implementation (dev/test).

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use zoo_audit::{AuditEscalation, AuditLogger, AuditStore, InMemoryAuditStore};
use zoo_auth::{
    AccessDecisionEngine, ClaimsProcessor, InMemorySessionStore, InMemoryTenantDirectory, SessionStore,
    SuperAdminSessionManager, TenantDirectory, TenantResolver, TokenVerifier,
};
use zoo_webhooks::{
    DeliveryStore, InMemoryDeliveryStore, InMemoryNotificationConfigStore, NotificationConfigStore,
    ReqwestTransport, WebhookDeliveryWorker, WebhookDispatcher, WebhookTransport, WorkerPoolHandle,
};

use crate::config::GuardConfig;
use crate::guard::Guard;

/// Fully wired core. Cheap to clone.
#[derive(Clone)]
pub struct GuardServices {
    pub config: Arc<GuardConfig>,
    pub guard: Arc<Guard>,
    pub engine: Arc<AccessDecisionEngine>,
    pub sessions: Arc<SuperAdminSessionManager>,
    pub audit: Arc<AuditLogger>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub notification_configs: Arc<dyn NotificationConfigStore>,
    pub deliveries: Arc<dyn DeliveryStore>,
    pub dispatcher: Arc<WebhookDispatcher>,
    pub webhook_worker: Arc<WebhookDeliveryWorker>,
}

impl GuardServices {
    pub fn builder(config: GuardConfig) -> GuardServicesBuilder {
        GuardServicesBuilder::new(config)
    }

    /// Start the background delivery pool described by `webhooks` config.
    pub fn start_webhook_workers(&self) -> std::io::Result<WorkerPoolHandle> {
        self.webhook_worker
            .clone()
            .spawn(self.config.webhooks.worker_config())
    }
}

pub struct GuardServicesBuilder {
    config: GuardConfig,
    tenants: Option<Arc<dyn TenantDirectory>>,
    session_store: Option<Arc<dyn SessionStore>>,
    audit_store: Option<Arc<dyn AuditStore>>,
    escalation: Option<Arc<dyn AuditEscalation>>,
    notification_configs: Option<Arc<dyn NotificationConfigStore>>,
    deliveries: Option<Arc<dyn DeliveryStore>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl GuardServicesBuilder {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            tenants: None,
            session_store: None,
            audit_store: None,
            escalation: None,
            notification_configs: None,
            deliveries: None,
            transport: None,
            verifier: None,
        }
    }

    pub fn tenants(mut self, tenants: Arc<dyn TenantDirectory>) -> Self {
        self.tenants = Some(tenants);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn audit_store(mut self, store: Arc<dyn AuditStore>) -> Self {
        self.audit_store = Some(store);
        self
    }

    pub fn escalation(mut self, escalation: Arc<dyn AuditEscalation>) -> Self {
        self.escalation = Some(escalation);
        self
    }

    pub fn notification_configs(mut self, store: Arc<dyn NotificationConfigStore>) -> Self {
        self.notification_configs = Some(store);
        self
    }

    pub fn deliveries(mut self, store: Arc<dyn DeliveryStore>) -> Self {
        self.deliveries = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn build(self) -> anyhow::Result<GuardServices> {
        let config = self.config;
        let table = Arc::new(config.roles.clone());

        let tenants = self
            .tenants
            .unwrap_or_else(|| Arc::new(InMemoryTenantDirectory::new()));
        let session_store = self
            .session_store
            .unwrap_or_else(|| Arc::new(InMemorySessionStore::new()));
        let audit_store = self
            .audit_store
            .unwrap_or_else(|| Arc::new(InMemoryAuditStore::new()));
        let notification_configs = self
            .notification_configs
            .unwrap_or_else(|| Arc::new(InMemoryNotificationConfigStore::new()));
        let deliveries = self
            .deliveries
            .unwrap_or_else(|| Arc::new(InMemoryDeliveryStore::new()));

        // Audit -> webhook fan-out.
        let dispatcher = Arc::new(WebhookDispatcher::new(notification_configs.clone(), deliveries.clone()));
        let mut audit = AuditLogger::new(audit_store)
            .with_listener(dispatcher.clone())
            .with_max_append_attempts(config.audit.max_append_attempts);
        if let Some(escalation) = self.escalation {
            audit = audit.with_escalation(escalation);
        }
        let audit = Arc::new(audit);

        let engine = Arc::new(AccessDecisionEngine::new(
            table.clone(),
            config.permissions.clone(),
            tenants.clone(),
            session_store.clone(),
        ));
        let sessions = Arc::new(SuperAdminSessionManager::new(
            session_store,
            tenants.clone(),
            table.clone(),
            audit.clone(),
            config.sessions.clone(),
        ));

        let mut guard = Guard::new(
            ClaimsProcessor::new(table),
            TenantResolver::new(tenants.clone(), config.tenants.clone()),
            engine.clone(),
            audit.clone(),
        );
        if let Some(verifier) = self.verifier {
            guard = guard.with_verifier(verifier);
        }

        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(
                ReqwestTransport::new(config.webhooks.timeout()).context("failed to build webhook HTTP client")?,
            ),
        };
        let webhook_worker = Arc::new(WebhookDeliveryWorker::new(
            deliveries.clone(),
            transport,
            audit.clone(),
            config.webhooks.retry.clone(),
        ));

        info!(
            roles = config.roles.roles().count(),
            base_domain = ?config.tenants.base_domain,
            default_tenant = ?config.tenants.default_tenant,
            "authorization core wired"
        );

        Ok(GuardServices {
            config: Arc::new(config),
            guard: Arc::new(guard),
            engine,
            sessions,
            audit,
            tenants,
            notification_configs,
            deliveries,
            dispatcher,
            webhook_worker,
        })
    }
}
