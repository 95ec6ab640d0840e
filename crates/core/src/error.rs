//! Domain error model.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Deterministic failures of the core primitives.
///
/// Authorization denials are not errors; they are `AccessDecision` values in
/// `zoo-auth`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed tenant or subject identifier.
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("quota exceeded: {kind} (limit {limit}, requested {requested})")]
    QuotaExceeded {
        kind: String,
        limit: u64,
        requested: u64,
    },
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
