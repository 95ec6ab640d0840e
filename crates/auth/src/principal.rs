//! Normalized request principal and the claims processor that builds it.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use zoo_core::{SubjectId, TenantId};

use crate::session::SessionToken;
use crate::{IdentityClaims, Permission, Role, RolePermissionTable};

/// A fully resolved principal for authorization decisions.
///
/// Built once per request by [`ClaimsProcessor::process`] and immutable
/// afterwards. Roles and permissions are sets, so two principals built from
/// the same claims in any order compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    subject: SubjectId,
    email: String,
    name: Option<String>,
    /// Roles present in the role table (unknown role strings are dropped).
    roles: BTreeSet<Role>,
    /// Explicit token permissions ∪ permissions implied by `roles`.
    permissions: BTreeSet<Permission>,
    raw_roles: Vec<String>,
    raw_permissions: Vec<String>,
    tenant: Option<TenantId>,
    #[serde(skip)]
    session_token: Option<SessionToken>,
}

impl Principal {
    /// Attach the super-admin session presented with the request.
    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }

    /// Bind the tenant resolved for this request when the token carried none.
    /// A tenant claim is never replaced.
    pub fn with_resolved_tenant(mut self, tenant: TenantId) -> Self {
        if self.tenant.is_none() {
            self.tenant = Some(tenant);
        }
        self
    }

    pub fn subject(&self) -> &SubjectId {
        &self.subject
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn roles(&self) -> &BTreeSet<Role> {
        &self.roles
    }

    pub fn permissions(&self) -> &BTreeSet<Permission> {
        &self.permissions
    }

    pub fn raw_roles(&self) -> &[String] {
        &self.raw_roles
    }

    pub fn raw_permissions(&self) -> &[String] {
        &self.raw_permissions
    }

    pub fn tenant(&self) -> Option<&TenantId> {
        self.tenant.as_ref()
    }

    pub fn session_token(&self) -> Option<&SessionToken> {
        self.session_token.as_ref()
    }

    pub fn is_super_admin(&self) -> bool {
        self.roles.iter().any(Role::is_super_admin)
    }

    pub fn has_permission(&self, required: &Permission) -> bool {
        self.permissions.contains(required) || self.permissions.iter().any(Permission::is_wildcard)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("invalid subject claim: {0}")]
    InvalidSubject(String),

    #[error("invalid tenant claim: {0}")]
    InvalidTenant(String),
}

/// Maps identity-provider claims onto the internal role/permission model.
///
/// Pure: no IO, no clock, no shared mutable state.
#[derive(Debug, Clone)]
pub struct ClaimsProcessor {
    table: Arc<RolePermissionTable>,
}

impl ClaimsProcessor {
    pub fn new(table: Arc<RolePermissionTable>) -> Self {
        Self { table }
    }

    pub fn process(&self, claims: &IdentityClaims) -> Result<Principal, ClaimsError> {
        let subject =
            SubjectId::parse(&claims.sub).map_err(|e| ClaimsError::InvalidSubject(e.to_string()))?;

        let tenant = match claims.tenant.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(
                TenantId::parse(raw).map_err(|e| ClaimsError::InvalidTenant(e.to_string()))?,
            ),
        };

        let roles: BTreeSet<Role> = claims
            .roles
            .iter()
            .map(|r| Role::new(r.clone()))
            .filter(|r| self.table.contains_role(r))
            .collect();

        let mut permissions: BTreeSet<Permission> = claims
            .permissions
            .iter()
            .filter(|p| !p.trim().is_empty())
            .map(|p| Permission::new(p.clone()))
            .collect();
        permissions.extend(self.table.permissions_for(&roles));

        Ok(Principal {
            subject,
            email: claims.email.trim().to_string(),
            name: claims.name.clone(),
            roles,
            permissions,
            raw_roles: claims.roles.clone(),
            raw_permissions: claims.permissions.clone(),
            tenant,
            session_token: None,
        })
    }
}
