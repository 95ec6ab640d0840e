//! The audit logger: seals records onto the chain and escalates failures.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::entry::{AuditLogEntry, AuditRecord, GENESIS_HASH};
use crate::store::{AuditQuery, AuditStore, AuditStoreError};
use crate::verify::{ChainVerification, IntegrityViolation, verify_chain};

/// Default number of compare-and-append attempts before giving up.
pub const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 8;

const VERIFY_PAGE_SIZE: usize = 500;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditError {
    /// The record could not be persisted. Always escalated as Critical.
    #[error("audit write failed after {attempts} attempt(s): {reason}")]
    WriteFailure { attempts: u32, reason: String },

    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),

    #[error("audit read failed: {0}")]
    Read(String),
}

/// A failed audit write, handed to the escalation hook.
#[derive(Debug, Clone)]
pub struct AuditFailure {
    pub record: AuditRecord,
    pub reason: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// Out-of-band escalation for lost audit writes (paging, alert queue, ...).
pub trait AuditEscalation: Send + Sync {
    fn escalate(&self, failure: &AuditFailure);
}

/// Default escalation: a Critical structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEscalation;

impl AuditEscalation for TracingEscalation {
    fn escalate(&self, failure: &AuditFailure) {
        error!(
            severity = "critical",
            operation = %failure.record.operation,
            entity_type = %failure.record.entity_type,
            entity_id = %failure.record.entity_id,
            performed_by = %failure.record.performed_by,
            attempts = failure.attempts,
            reason = %failure.reason,
            "audit write failure"
        );
    }
}

/// Observer of successfully appended entries (e.g. the webhook dispatcher).
pub trait AuditListener: Send + Sync {
    fn on_appended(&self, entry: &AuditLogEntry) -> Result<(), String>;
}

/// Appends hash-chained entries to an [`AuditStore`].
///
/// Appends are serialized twice over: an in-process writer lock keeps this
/// logger's own writes ordered, and the store's compare-and-append rejects
/// writes that raced another process, which are retried against the new head.
pub struct AuditLogger {
    store: Arc<dyn AuditStore>,
    escalation: Arc<dyn AuditEscalation>,
    listeners: Vec<Arc<dyn AuditListener>>,
    max_append_attempts: u32,
    writer: Mutex<()>,
}

impl AuditLogger {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            escalation: Arc::new(TracingEscalation),
            listeners: Vec::new(),
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
            writer: Mutex::new(()),
        }
    }

    pub fn with_escalation(mut self, escalation: Arc<dyn AuditEscalation>) -> Self {
        self.escalation = escalation;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn AuditListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn with_max_append_attempts(mut self, attempts: u32) -> Self {
        self.max_append_attempts = attempts.max(1);
        self
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    /// Record at the current wall-clock time.
    pub fn record(&self, record: AuditRecord) -> Result<AuditLogEntry, AuditError> {
        self.record_at(record, Utc::now())
    }

    /// Seal `record` onto the chain.
    ///
    /// On failure the record is escalated before the error is returned.
    pub fn record_at(
        &self,
        record: AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, AuditError> {
        let entry = {
            // A poisoned writer lock only means another writer panicked; the
            // store's compare-and-append still guards the chain.
            let _guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
            self.append_with_retry(&record, now)
        };

        match entry {
            Ok(entry) => {
                debug!(
                    sequence = entry.sequence(),
                    operation = %entry.operation(),
                    severity = %entry.severity(),
                    "audit entry appended"
                );
                self.notify(&entry);
                Ok(entry)
            }
            Err((attempts, reason)) => {
                self.escalation.escalate(&AuditFailure {
                    record,
                    reason: reason.clone(),
                    attempts,
                    at: now,
                });
                Err(AuditError::WriteFailure { attempts, reason })
            }
        }
    }

    fn append_with_retry(
        &self,
        record: &AuditRecord,
        now: DateTime<Utc>,
    ) -> Result<AuditLogEntry, (u32, String)> {
        let mut attempt = 0;
        loop {
            attempt += 1;

            let head = self.store.head().map_err(|e| (attempt, e.to_string()))?;
            let entry = AuditLogEntry::seal(head.next_sequence(), record.clone(), now, head.hash.clone());

            match self.store.append(&head, entry.clone()) {
                Ok(()) => return Ok(entry),
                Err(AuditStoreError::Conflict { expected, actual })
                    if attempt < self.max_append_attempts =>
                {
                    debug!(attempt, expected, actual, "audit head moved; retrying append");
                }
                Err(e) => return Err((attempt, e.to_string())),
            }
        }
    }

    fn notify(&self, entry: &AuditLogEntry) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_appended(entry) {
                warn!(
                    sequence = entry.sequence(),
                    operation = %entry.operation(),
                    error = %e,
                    "audit listener failed"
                );
            }
        }
    }

    pub fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditError> {
        self.store
            .query(query)
            .map_err(|e| AuditError::Read(e.to_string()))
    }

    /// Verify the whole chain from genesis.
    pub fn verify(&self) -> Result<ChainVerification, AuditError> {
        self.verify_from(1)
    }

    /// Verify every entry from `from_sequence` to the head, anchored on the
    /// predecessor's stored hash.
    pub fn verify_from(&self, from_sequence: u64) -> Result<ChainVerification, AuditError> {
        let from_sequence = from_sequence.max(1);
        let anchor = if from_sequence == 1 {
            GENESIS_HASH.to_string()
        } else {
            self.store
                .get(from_sequence - 1)
                .map_err(|e| AuditError::Read(e.to_string()))?
                .map(|e| e.integrity_hash().to_string())
                .ok_or_else(|| {
                    AuditError::Read(format!("no audit entry at sequence {}", from_sequence - 1))
                })?
        };

        let mut total = ChainVerification {
            entries_checked: 0,
            first_sequence: None,
            last_sequence: None,
            head_hash: anchor,
        };
        let mut next = from_sequence;

        loop {
            let page = self
                .store
                .range(next, VERIFY_PAGE_SIZE)
                .map_err(|e| AuditError::Read(e.to_string()))?;
            if page.is_empty() {
                break;
            }

            // Pages must continue exactly where the previous one stopped.
            if page[0].sequence() != next {
                return Err(IntegrityViolation::SequenceGap {
                    expected: next,
                    found: page[0].sequence(),
                }
                .into());
            }

            let report = verify_chain(&page, &total.head_hash).inspect_err(|violation| {
                error!(
                    severity = "critical",
                    sequence = violation.sequence(),
                    error = %violation,
                    "audit chain integrity violation"
                );
            })?;

            total.entries_checked += report.entries_checked;
            total.first_sequence = total.first_sequence.or(report.first_sequence);
            total.last_sequence = report.last_sequence;
            total.head_hash = report.head_hash;
            next = report.last_sequence.map(|s| s + 1).unwrap_or(next);

            if page.len() < VERIFY_PAGE_SIZE {
                break;
            }
        }

        Ok(total)
    }
}
