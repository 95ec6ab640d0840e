//! Hash-chain verification.
//!
//! Verification fails closed: the first inconsistency ends the walk and is
//! reported as an [`IntegrityViolation`]. Nothing is repaired.

use serde::Serialize;
use thiserror::Error;

use crate::entry::AuditLogEntry;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityViolation {
    /// The entry's content no longer matches its stored hash.
    #[error("audit entry {sequence}: integrity hash mismatch (stored {stored}, computed {computed})")]
    HashMismatch {
        sequence: u64,
        stored: String,
        computed: String,
    },

    /// The entry does not point at its predecessor's hash.
    #[error("audit entry {sequence}: previous hash {found} does not match {expected}")]
    BrokenLink {
        sequence: u64,
        expected: String,
        found: String,
    },

    /// Entries are missing or reordered.
    #[error("audit sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },
}

impl IntegrityViolation {
    /// Sequence number at which the chain first breaks.
    pub fn sequence(&self) -> u64 {
        match self {
            IntegrityViolation::HashMismatch { sequence, .. }
            | IntegrityViolation::BrokenLink { sequence, .. } => *sequence,
            IntegrityViolation::SequenceGap { found, .. } => *found,
        }
    }
}

/// Summary of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub entries_checked: u64,
    pub first_sequence: Option<u64>,
    pub last_sequence: Option<u64>,
    /// Hash of the last verified entry (or the supplied anchor for an empty range).
    pub head_hash: String,
}

/// Verify a contiguous run of entries.
///
/// `expected_prev_hash` anchors the first entry: `GENESIS_HASH` when starting
/// at sequence 1, otherwise the hash of the entry just before the range.
pub fn verify_chain(
    entries: &[AuditLogEntry],
    expected_prev_hash: &str,
) -> Result<ChainVerification, IntegrityViolation> {
    let mut prev_hash = expected_prev_hash.to_string();
    let mut expected_sequence: Option<u64> = None;

    for entry in entries {
        if let Some(expected) = expected_sequence {
            if entry.sequence() != expected {
                return Err(IntegrityViolation::SequenceGap {
                    expected,
                    found: entry.sequence(),
                });
            }
        }

        if entry.previous_hash() != prev_hash {
            return Err(IntegrityViolation::BrokenLink {
                sequence: entry.sequence(),
                expected: prev_hash,
                found: entry.previous_hash().to_string(),
            });
        }

        let computed = entry.compute_hash();
        if computed != entry.integrity_hash() {
            return Err(IntegrityViolation::HashMismatch {
                sequence: entry.sequence(),
                stored: entry.integrity_hash().to_string(),
                computed,
            });
        }

        prev_hash = computed;
        expected_sequence = Some(entry.sequence() + 1);
    }

    Ok(ChainVerification {
        entries_checked: entries.len() as u64,
        first_sequence: entries.first().map(|e| e.sequence()),
        last_sequence: entries.last().map(|e| e.sequence()),
        head_hash: prev_hash,
    })
}
