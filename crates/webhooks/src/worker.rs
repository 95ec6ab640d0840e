//! Delivery worker pool: claim, POST, record outcome, retry or abandon.

use std::sync::{Arc, Mutex, PoisonError, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use zoo_audit::{AuditError, AuditLogger, AuditRecord, Severity};

use crate::store::{DeliveryStore, DeliveryStoreError};
use crate::transport::{WebhookRequest, WebhookTransport};
use crate::types::{DeliveryStatus, RetryPolicy, WebhookDelivery};

/// Audit operation recorded when a delivery runs out of attempts.
pub const OP_DELIVERY_ABANDONED: &str = "WEBHOOK_DELIVERY_ABANDONED";

const WORKER_ACTOR: &str = "system:webhook-worker";

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Store(#[from] DeliveryStoreError),

    #[error("abandonment could not be audited: {0}")]
    Audit(#[from] AuditError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum DeliveryOutcome {
    Delivered,
    Retrying { next_retry_at: Option<DateTime<Utc>> },
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub name: String,
    pub workers: usize,
    pub poll_interval: Duration,
    /// How long a claim stays valid before the delivery may be reaped.
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            name: "webhook-worker".to_string(),
            workers: 2,
            poll_interval: Duration::from_millis(250),
            lease: Duration::from_secs(60),
        }
    }
}

impl WorkerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerStats {
    pub attempts: u64,
    pub delivered: u64,
    pub retried: u64,
    pub abandoned: u64,
    pub reaped: u64,
    pub errors: u64,
    pub in_flight: usize,
    pub uptime_secs: u64,
}

/// Delivers claimed webhooks and records abandonments on the audit chain.
pub struct WebhookDeliveryWorker {
    store: Arc<dyn DeliveryStore>,
    transport: Arc<dyn WebhookTransport>,
    audit: Arc<AuditLogger>,
    policy: RetryPolicy,
}

impl WebhookDeliveryWorker {
    pub fn new(
        store: Arc<dyn DeliveryStore>,
        transport: Arc<dyn WebhookTransport>,
        audit: Arc<AuditLogger>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            transport,
            audit,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.store
    }

    /// Perform the attempt for an already-claimed (InFlight) delivery.
    pub fn execute_one(
        &self,
        delivery: &mut WebhookDelivery,
        now: DateTime<Utc>,
    ) -> Result<DeliveryOutcome, WorkerError> {
        let request = WebhookRequest::for_delivery(delivery);
        match self.transport.send(&request) {
            Ok(code) if (200..300).contains(&code) => delivery.mark_delivered(now),
            Ok(code) => delivery.mark_failed(format!("HTTP {code}"), &self.policy, now),
            Err(err) => delivery.mark_failed(err.to_string(), &self.policy, now),
        }

        self.store.complete_attempt(delivery)?;
        self.settle(delivery, now)
    }

    /// Claim and deliver the next ready delivery, if any.
    pub fn run_once(&self, now: DateTime<Utc>, lease: Duration) -> Result<Option<DeliveryOutcome>, WorkerError> {
        let Some(mut delivery) = self.store.claim_next(now, lease)? else {
            return Ok(None);
        };
        debug!(
            delivery_id = %delivery.id,
            attempt = delivery.attempt_count,
            event_type = %delivery.event_type,
            "claimed webhook delivery"
        );
        self.execute_one(&mut delivery, now).map(Some)
    }

    /// Return lost InFlight deliveries to the queue. Returns how many.
    pub fn reap(&self, now: DateTime<Utc>) -> Result<usize, WorkerError> {
        let reaped = self.store.reap_expired_leases(now, &self.policy)?;
        for delivery in &reaped {
            warn!(delivery_id = %delivery.id, attempt = delivery.attempt_count, "webhook delivery lease expired");
            self.settle(delivery, now)?;
        }
        Ok(reaped.len())
    }

    fn settle(&self, delivery: &WebhookDelivery, now: DateTime<Utc>) -> Result<DeliveryOutcome, WorkerError> {
        match delivery.status {
            DeliveryStatus::Delivered => {
                info!(delivery_id = %delivery.id, attempt = delivery.attempt_count, "webhook delivered");
                Ok(DeliveryOutcome::Delivered)
            }
            DeliveryStatus::Abandoned => {
                error!(
                    delivery_id = %delivery.id,
                    attempts = delivery.attempt_count,
                    last_error = delivery.last_error.as_deref().unwrap_or_default(),
                    "webhook delivery abandoned"
                );
                self.record_abandonment(delivery, now)?;
                Ok(DeliveryOutcome::Abandoned)
            }
            _ => {
                debug!(
                    delivery_id = %delivery.id,
                    attempt = delivery.attempt_count,
                    next_retry_at = ?delivery.next_retry_at,
                    last_error = delivery.last_error.as_deref().unwrap_or_default(),
                    "webhook delivery will be retried"
                );
                Ok(DeliveryOutcome::Retrying {
                    next_retry_at: delivery.next_retry_at,
                })
            }
        }
    }

    fn record_abandonment(&self, delivery: &WebhookDelivery, now: DateTime<Utc>) -> Result<(), WorkerError> {
        let mut record = AuditRecord::new(
            OP_DELIVERY_ABANDONED,
            "webhook_delivery",
            delivery.id.to_string(),
            WORKER_ACTOR,
        )
        .after(serde_json::json!({
            "config_id": delivery.config_id,
            "event_type": delivery.event_type,
            "event_id": delivery.event_id,
            "target_url": delivery.target_url,
            "attempts": delivery.attempt_count,
            "last_error": delivery.last_error,
        }))
        .severity(Severity::Critical);
        if let Some(tenant) = &delivery.tenant_id {
            record = record.tenant(tenant.clone());
        }
        self.audit.record_at(record, now)?;
        Ok(())
    }

    /// Start `config.workers` polling threads.
    pub fn spawn(self: Arc<Self>, config: WorkerConfig) -> std::io::Result<WorkerPoolHandle> {
        let stats = Arc::new(Mutex::new(WorkerStats::default()));
        let mut workers = Vec::with_capacity(config.workers.max(1));

        for index in 0..config.workers.max(1) {
            let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
            let worker = self.clone();
            let stats = stats.clone();
            let config = config.clone();
            let join = thread::Builder::new()
                .name(format!("{}-{index}", config.name))
                .spawn(move || worker_loop(&worker, &config, index, &shutdown_rx, &stats))?;
            workers.push((shutdown_tx, join));
        }

        info!(pool = %config.name, workers = workers.len(), "webhook worker pool started");
        Ok(WorkerPoolHandle { workers, stats })
    }
}

fn lock(stats: &Mutex<WorkerStats>) -> std::sync::MutexGuard<'_, WorkerStats> {
    stats.lock().unwrap_or_else(PoisonError::into_inner)
}

fn worker_loop(
    worker: &WebhookDeliveryWorker,
    config: &WorkerConfig,
    index: usize,
    shutdown: &mpsc::Receiver<()>,
    stats: &Mutex<WorkerStats>,
) {
    let started = Instant::now();
    debug!(pool = %config.name, index, "webhook worker started");

    loop {
        match shutdown.try_recv() {
            Ok(()) | Err(mpsc::TryRecvError::Disconnected) => break,
            Err(mpsc::TryRecvError::Empty) => {}
        }
        lock(stats).uptime_secs = started.elapsed().as_secs();

        // One reaper is enough.
        if index == 0 {
            match worker.reap(Utc::now()) {
                Ok(n) => lock(stats).reaped += n as u64,
                Err(e) => {
                    error!(pool = %config.name, error = %e, "reaping expired leases failed");
                    lock(stats).errors += 1;
                }
            }
        }

        let claimed = match worker.store.claim_next(Utc::now(), config.lease) {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                thread::sleep(config.poll_interval);
                continue;
            }
            Err(e) => {
                error!(pool = %config.name, error = %e, "failed to claim webhook delivery");
                lock(stats).errors += 1;
                thread::sleep(config.poll_interval);
                continue;
            }
        };

        lock(stats).in_flight += 1;
        let mut delivery = claimed;
        let result = worker.execute_one(&mut delivery, Utc::now());

        let mut s = lock(stats);
        s.in_flight = s.in_flight.saturating_sub(1);
        s.attempts += 1;
        match result {
            Ok(DeliveryOutcome::Delivered) => s.delivered += 1,
            Ok(DeliveryOutcome::Retrying { .. }) => s.retried += 1,
            Ok(DeliveryOutcome::Abandoned) => s.abandoned += 1,
            Err(e) => {
                s.errors += 1;
                drop(s);
                error!(pool = %config.name, delivery_id = %delivery.id, error = %e, "webhook attempt not recorded");
            }
        }
    }

    debug!(pool = %config.name, index, "webhook worker stopped");
}

/// Handle to a running worker pool.
#[derive(Debug)]
pub struct WorkerPoolHandle {
    workers: Vec<(mpsc::Sender<()>, thread::JoinHandle<()>)>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl WorkerPoolHandle {
    /// Signal every worker and wait for in-flight attempts to finish.
    pub fn shutdown(self) {
        for (tx, _) in &self.workers {
            let _ = tx.send(());
        }
        for (_, join) in self.workers {
            let _ = join.join();
        }
        info!("webhook worker pool stopped");
    }

    pub fn stats(&self) -> WorkerStats {
        lock(&self.stats).clone()
    }
}
