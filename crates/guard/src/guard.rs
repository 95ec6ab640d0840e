//! Request-level guard: establish the security context, decide, run, audit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{error, info, warn};

use zoo_audit::{AuditLogEntry, AuditLogger, AuditRecord, AuditStoreError, Severity};
use zoo_auth::{
    AccessDecision, AccessDecisionEngine, AccessKind, ClaimsError, ClaimsProcessor, IdentityClaims, Permission,
    Principal, ResolvedTenant, SessionToken, TenantHint, TenantResolutionError, TenantResolver, TokenValidationError,
    TokenVerifier, validate_claims,
};
use zoo_core::TenantId;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum GuardError {
    #[error(transparent)]
    Token(#[from] TokenValidationError),

    #[error(transparent)]
    Claims(#[from] ClaimsError),

    #[error(transparent)]
    Tenant(#[from] TenantResolutionError),

    #[error("no token verifier configured")]
    NoVerifier,

    #[error("no target tenant for the request")]
    NoTarget,

    #[error("access denied: {:?}", .0.reason)]
    Denied(AccessDecision),

    /// The operation needs an audit record and the audit store cannot be
    /// reached; the operation was not run.
    #[error("audit trail unavailable: {0}")]
    AuditUnavailable(#[source] AuditStoreError),

    #[error("operation failed: {0}")]
    Operation(#[source] BoxError),
}

impl GuardError {
    pub fn decision(&self) -> Option<&AccessDecision> {
        match self {
            Self::Denied(d) => Some(d),
            _ => None,
        }
    }
}

/// What arrives with a request before anything is trusted.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub claims: IdentityClaims,
    pub hint: Option<TenantHint>,
    pub session_token: Option<SessionToken>,
}

/// Principal plus effective tenant, established once per request.
#[derive(Debug, Clone)]
pub struct SecurityContext {
    principal: Principal,
    tenant: Option<ResolvedTenant>,
}

impl SecurityContext {
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn tenant(&self) -> Option<&ResolvedTenant> {
        self.tenant.as_ref()
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant.as_ref().map(ResolvedTenant::id)
    }
}

/// Audit description of a guarded operation.
#[derive(Debug, Clone)]
pub struct AuditedOperation {
    pub operation: String,
    pub entity_type: String,
    pub entity_id: String,
    pub before: Option<JsonValue>,
    pub after: Option<JsonValue>,
    pub severity: Severity,
    /// Audit even when the access was not privileged.
    pub administrative: bool,
}

impl AuditedOperation {
    pub fn new(operation: impl Into<String>, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            before: None,
            after: None,
            severity: Severity::Info,
            administrative: false,
        }
    }

    pub fn before(mut self, data: JsonValue) -> Self {
        self.before = Some(data);
        self
    }

    pub fn after(mut self, data: JsonValue) -> Self {
        self.after = Some(data);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn administrative(mut self) -> Self {
        self.administrative = true;
        self
    }
}

/// Result of a guarded operation.
#[derive(Debug, Clone)]
pub struct Guarded<T> {
    pub value: T,
    pub decision: AccessDecision,
    /// The entry recorded for this operation, if it required one.
    pub audit_entry: Option<AuditLogEntry>,
    /// The operation completed but its audit record could not be written.
    pub audit_failed: bool,
}

pub struct Guard {
    processor: ClaimsProcessor,
    resolver: TenantResolver,
    engine: Arc<AccessDecisionEngine>,
    audit: Arc<AuditLogger>,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl Guard {
    pub fn new(
        processor: ClaimsProcessor,
        resolver: TenantResolver,
        engine: Arc<AccessDecisionEngine>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            processor,
            resolver,
            engine,
            audit,
            verifier: None,
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn engine(&self) -> &AccessDecisionEngine {
        &self.engine
    }

    /// Verify a raw bearer token, then establish the context.
    pub fn establish_from_token(
        &self,
        token: &str,
        hint: Option<TenantHint>,
        session_token: Option<SessionToken>,
        now: DateTime<Utc>,
    ) -> Result<SecurityContext, GuardError> {
        let verifier = self.verifier.as_ref().ok_or(GuardError::NoVerifier)?;
        let claims = verifier.verify(token)?;
        self.establish(
            &RequestContext {
                claims,
                hint,
                session_token,
            },
            now,
        )
    }

    /// Claims → principal, then tenant resolution.
    ///
    /// A super-admin may arrive with no tenant at all; anyone else must
    /// resolve to an active tenant, which is bound into the principal when
    /// the token named none.
    pub fn establish(&self, request: &RequestContext, now: DateTime<Utc>) -> Result<SecurityContext, GuardError> {
        validate_claims(&request.claims, now)?;

        let mut principal = self.processor.process(&request.claims)?;
        if let Some(token) = &request.session_token {
            principal = principal.with_session_token(token.clone());
        }

        let tenant = match self.resolver.resolve(principal.tenant(), request.hint.as_ref()) {
            // Super-admins stay unbound; their tenant access comes from the session.
            Ok(resolved) if principal.is_super_admin() => Some(resolved),
            Ok(resolved) => {
                principal = principal.with_resolved_tenant(resolved.id().clone());
                Some(resolved)
            }
            Err(TenantResolutionError::NoTenant) if principal.is_super_admin() => None,
            Err(err) => {
                warn!(subject = %principal.subject(), error = %err, "tenant resolution failed");
                return Err(err.into());
            }
        };

        Ok(SecurityContext { principal, tenant })
    }

    /// Decide against `target`, or the request's resolved tenant.
    pub fn authorize(
        &self,
        ctx: &SecurityContext,
        target: Option<&TenantId>,
        required: &Permission,
        now: DateTime<Utc>,
    ) -> Result<AccessDecision, GuardError> {
        let target = target.or(ctx.tenant_id()).ok_or(GuardError::NoTarget)?;
        Ok(self.engine.decide(&ctx.principal, target, required, now))
    }

    /// Authorize, run `op`, and record the audit entry before returning.
    ///
    /// A privileged access, a super-admin write or an operation marked
    /// administrative is always audited. The audit store is checked before
    /// `op` runs and an unreachable store refuses the operation. The entry
    /// itself is written after `op` succeeds, so a store that fails in
    /// between leaves a completed operation without a record: the result is
    /// still returned, flagged with `audit_failed`, and the logger has already
    /// escalated the failure. Callers must treat `audit_failed` as an
    /// incident.
    pub fn execute<T, E, F>(
        &self,
        ctx: &SecurityContext,
        target: Option<&TenantId>,
        required: &Permission,
        operation: AuditedOperation,
        now: DateTime<Utc>,
        op: F,
    ) -> Result<Guarded<T>, GuardError>
    where
        F: FnOnce(&TenantId) -> Result<T, E>,
        E: Into<BoxError>,
    {
        let target = target.or(ctx.tenant_id()).ok_or(GuardError::NoTarget)?.clone();
        let decision = self.engine.decide(&ctx.principal, &target, required, now);
        if !decision.allow {
            return Err(GuardError::Denied(decision));
        }

        let super_admin_write = ctx.principal.is_super_admin()
            && self.engine.classifier().access_kind(required) == AccessKind::Write;
        let audited = decision.privileged || super_admin_write || operation.administrative;
        if audited {
            if let Err(err) = self.audit.store().head() {
                error!(
                    subject = %ctx.principal.subject(),
                    tenant_id = %target,
                    error = %err,
                    "audit store unavailable, refusing audited operation"
                );
                return Err(GuardError::AuditUnavailable(err));
            }
        }

        let value = op(&target).map_err(|e| GuardError::Operation(e.into()))?;

        if !audited {
            return Ok(Guarded {
                value,
                decision,
                audit_entry: None,
                audit_failed: false,
            });
        }

        let severity = if decision.privileged {
            operation.severity.max(Severity::Warning)
        } else {
            operation.severity
        };
        let mut record = AuditRecord::new(
            operation.operation,
            operation.entity_type,
            operation.entity_id,
            ctx.principal.subject().as_str(),
        )
        .tenant(target.clone())
        .impersonating(decision.impersonated_tenant_id.clone())
        .severity(severity);
        if let Some(before) = operation.before {
            record = record.before(before);
        }
        if let Some(after) = operation.after {
            record = record.after(after);
        }

        match self.audit.record_at(record, now) {
            Ok(entry) => {
                if decision.privileged {
                    info!(
                        subject = %ctx.principal.subject(),
                        tenant_id = %target,
                        operation = entry.operation(),
                        sequence = entry.sequence(),
                        "privileged operation audited"
                    );
                }
                Ok(Guarded {
                    value,
                    decision,
                    audit_entry: Some(entry),
                    audit_failed: false,
                })
            }
            Err(err) => {
                error!(
                    subject = %ctx.principal.subject(),
                    tenant_id = %target,
                    error = %err,
                    "operation completed without audit record"
                );
                Ok(Guarded {
                    value,
                    decision,
                    audit_entry: None,
                    audit_failed: true,
                })
            }
        }
    }
}
