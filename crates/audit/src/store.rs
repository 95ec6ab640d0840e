//! Audit storage: an append-only arena of sealed entries keyed by sequence.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use zoo_core::TenantId;

use crate::entry::{AuditLogEntry, GENESIS_HASH, Severity};

/// Position of the last appended entry. An empty chain is `(0, GENESIS_HASH)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainHead {
    pub sequence: u64,
    pub hash: String,
}

impl ChainHead {
    pub fn genesis() -> Self {
        Self {
            sequence: 0,
            hash: GENESIS_HASH.to_string(),
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence + 1
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuditStoreError {
    /// Another writer appended since `expected` was read.
    #[error("audit chain moved: expected head {expected}, found {actual}")]
    Conflict { expected: u64, actual: u64 },

    /// The entry does not extend the expected head.
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("audit storage error: {0}")]
    Storage(String),
}

/// Audit persistence.
///
/// Stores only ever append. `append` is a compare-and-append: it succeeds only
/// if the current head equals `expected`, which is what keeps the hash chain
/// linear when several writers share one chain.
pub trait AuditStore: Send + Sync {
    fn head(&self) -> Result<ChainHead, AuditStoreError>;

    fn append(&self, expected: &ChainHead, entry: AuditLogEntry) -> Result<(), AuditStoreError>;

    /// Entries with `sequence >= from_sequence`, ascending, at most `limit`.
    fn range(&self, from_sequence: u64, limit: usize) -> Result<Vec<AuditLogEntry>, AuditStoreError>;

    fn get(&self, sequence: u64) -> Result<Option<AuditLogEntry>, AuditStoreError>;

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditStoreError>;
}

/// Read filter for the outward audit surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    pub tenant_id: Option<TenantId>,
    /// Inclusive lower bound.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound.
    pub until: Option<DateTime<Utc>>,
    pub severity: Option<Severity>,
    pub limit: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            tenant_id: None,
            from: None,
            until: None,
            severity: None,
            limit: 100,
        }
    }
}

impl AuditQuery {
    pub fn for_tenant(tenant_id: TenantId) -> Self {
        Self {
            tenant_id: Some(tenant_id),
            ..Default::default()
        }
    }

    pub fn between(mut self, from: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.from = Some(from);
        self.until = Some(until);
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(tenant) = &self.tenant_id {
            if entry.tenant_id() != Some(tenant) {
                return false;
            }
        }
        if let Some(from) = self.from {
            if entry.timestamp() < from {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp() >= until {
                return false;
            }
        }
        if let Some(severity) = self.severity {
            if entry.severity() != severity {
                return false;
            }
        }
        true
    }
}

/// In-memory audit chain.
///
/// Intended for tests/dev. Not optimized for performance.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    entries: RwLock<Vec<AuditLogEntry>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn head_of(entries: &[AuditLogEntry]) -> ChainHead {
        entries
            .last()
            .map(|e| ChainHead {
                sequence: e.sequence(),
                hash: e.integrity_hash().to_string(),
            })
            .unwrap_or_else(ChainHead::genesis)
    }
}

fn poisoned<T>(_: T) -> AuditStoreError {
    AuditStoreError::Storage("lock poisoned".to_string())
}

impl AuditStore for InMemoryAuditStore {
    fn head(&self) -> Result<ChainHead, AuditStoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(Self::head_of(&entries))
    }

    fn append(&self, expected: &ChainHead, entry: AuditLogEntry) -> Result<(), AuditStoreError> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let current = Self::head_of(&entries);

        if current != *expected {
            return Err(AuditStoreError::Conflict {
                expected: expected.sequence,
                actual: current.sequence,
            });
        }
        if entry.sequence() != current.next_sequence() {
            return Err(AuditStoreError::InvalidAppend(format!(
                "entry sequence {} does not follow head {}",
                entry.sequence(),
                current.sequence
            )));
        }
        if entry.previous_hash() != current.hash {
            return Err(AuditStoreError::InvalidAppend(format!(
                "entry {} is not linked to the current head",
                entry.sequence()
            )));
        }

        entries.push(entry);
        Ok(())
    }

    fn range(&self, from_sequence: u64, limit: usize) -> Result<Vec<AuditLogEntry>, AuditStoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        // Sequences are dense and start at 1, so the index is `sequence - 1`.
        let start = from_sequence.saturating_sub(1) as usize;
        Ok(entries.iter().skip(start).take(limit).cloned().collect())
    }

    fn get(&self, sequence: u64) -> Result<Option<AuditLogEntry>, AuditStoreError> {
        if sequence == 0 {
            return Ok(None);
        }
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries.get((sequence - 1) as usize).cloned())
    }

    fn query(&self, query: &AuditQuery) -> Result<Vec<AuditLogEntry>, AuditStoreError> {
        let entries = self.entries.read().map_err(poisoned)?;
        Ok(entries
            .iter()
            .filter(|e| query.matches(e))
            .take(query.limit)
            .cloned()
            .collect())
    }
}
