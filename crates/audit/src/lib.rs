//! `zoo-audit`: tamper-evident audit trail.
//!
//! Every entry carries a SHA-256 hash over its canonical form plus the
//! previous entry's hash, so any retroactive edit, deletion or reordering is
//! detected by [`verify_chain`].

pub mod entry;
pub mod logger;
pub mod store;
pub mod verify;

pub use entry::{AuditLogEntry, AuditRecord, GENESIS_HASH, Severity};
pub use logger::{
    AuditError, AuditEscalation, AuditFailure, AuditListener, AuditLogger, TracingEscalation,
};
pub use store::{AuditQuery, AuditStore, AuditStoreError, ChainHead, InMemoryAuditStore};
pub use verify::{ChainVerification, IntegrityViolation, verify_chain};
