use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity claims as issued by the external identity provider.
///
/// This is the claim shape the core expects once a token has been decoded and
/// verified by a [`TokenVerifier`]. Role and permission strings are raw: they
/// are normalized by the `ClaimsProcessor`, never trusted as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Subject / principal identifier (e.g. `auth0|65f0c1`).
    pub sub: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub permissions: Vec<String>,

    /// Tenant the identity belongs to. Absent for platform super-admins.
    #[serde(default)]
    pub tenant: Option<String>,

    /// Issued-at, seconds since the Unix epoch.
    #[serde(default)]
    pub iat: Option<i64>,

    /// Expiration, seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has no subject")]
    MissingSubject,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,

    #[error("token rejected by verifier: {0}")]
    Rejected(String),
}

/// Decodes and cryptographically verifies a raw bearer token.
///
/// Verification against the identity provider (JWKS fetch, signature check)
/// lives outside the core; implementations are plugged in by the host.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<IdentityClaims, TokenValidationError>;
}

/// Deterministically validate claim contents.
///
/// Note: this validates the *claims* only. Signature verification / decoding is
/// the verifier's job.
pub fn validate_claims(claims: &IdentityClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.sub.trim().is_empty() {
        return Err(TokenValidationError::MissingSubject);
    }

    let now = now.timestamp();
    if let (Some(iat), Some(exp)) = (claims.iat, claims.exp) {
        if exp <= iat {
            return Err(TokenValidationError::InvalidTimeWindow);
        }
    }
    if let Some(iat) = claims.iat {
        if now < iat {
            return Err(TokenValidationError::NotYetValid);
        }
    }
    if let Some(exp) = claims.exp {
        if now >= exp {
            return Err(TokenValidationError::Expired);
        }
    }
    Ok(())
}
