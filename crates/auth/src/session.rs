//! Super-admin sessions: issue, validate (lazy expiry), terminate, impersonate.
//!
//! Every change of privilege carried by a session (creation, impersonation,
//! termination) is audited *before* it is committed to the session store, so
//! there is never a live privilege without an audit entry for it.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use zoo_audit::{AuditError, AuditLogger, AuditRecord, Severity};
use zoo_core::{SubjectId, TenantId};

use crate::tenant::TenantDirectory;
use crate::{Role, RolePermissionTable};

/// Opaque bearer token of a super-admin session (256 random bits, hex).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn from_string(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// Tokens are credentials: never print more than a prefix.
impl core::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({prefix}...)")
    }
}

/// A platform administrator allowed to open super-admin sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperAdminUser {
    pub user_id: SubjectId,
    pub email: String,
    /// Restricts the administrator to one tenant. `None` = unscoped.
    pub scoped_to_tenant_id: Option<TenantId>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Expired,
    Terminated,
}

/// Narrowed identity a super-admin assumes inside one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Impersonation {
    /// Tenant user being impersonated, if any.
    pub user_id: Option<String>,
    /// Role whose permissions apply; the configured default when `None`.
    pub role: Option<Role>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperAdminSession {
    pub id: Uuid,
    pub user_id: SubjectId,
    pub token: SessionToken,
    pub scoped_to_tenant_id: Option<TenantId>,
    pub impersonated_tenant_id: Option<TenantId>,
    pub impersonated_user_id: Option<String>,
    pub impersonated_role: Option<Role>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub termination_reason: Option<String>,
    pub status: SessionStatus,
}

impl SuperAdminSession {
    /// Derived predicate; no stored write is needed for a session to expire.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Active && now < self.expires_at && self.terminated_at.is_none()
    }

    /// Status as of `now`, taking lazy expiry into account.
    pub fn effective_status(&self, now: DateTime<Utc>) -> SessionStatus {
        match self.status {
            SessionStatus::Active if self.terminated_at.is_some() => SessionStatus::Terminated,
            SessionStatus::Active if now >= self.expires_at => SessionStatus::Expired,
            other => other,
        }
    }

    pub fn is_impersonating(&self, tenant_id: &TenantId) -> bool {
        self.impersonated_tenant_id.as_ref() == Some(tenant_id)
    }

    fn entity_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionStoreError {
    #[error("session not found")]
    NotFound,
    #[error("session already exists")]
    AlreadyExists,
    /// The stored row is no longer active; the write was refused.
    #[error("session is {0:?}")]
    NotActive(SessionStatus),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Session persistence.
pub trait SessionStore: Send + Sync {
    fn insert(&self, session: SuperAdminSession) -> Result<(), SessionStoreError>;

    fn get(&self, token: &SessionToken) -> Result<Option<SuperAdminSession>, SessionStoreError>;

    fn update(&self, session: &SuperAdminSession) -> Result<(), SessionStoreError>;

    /// Copy the impersonation fields of `session` onto the stored row, but
    /// only while that row is still active at `now`. Termination that landed
    /// since `session` was read must win.
    fn update_impersonation(&self, session: &SuperAdminSession, now: DateTime<Utc>) -> Result<(), SessionStoreError>;

    fn list_for_user(&self, user_id: &SubjectId) -> Result<Vec<SuperAdminSession>, SessionStoreError>;

    /// Physically mark lazily-expired sessions as `Expired`. Returns how many changed.
    fn mark_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionStoreError>;
}

/// In-memory session store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionToken, SuperAdminSession>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn insert(&self, session: SuperAdminSession) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&session.token) {
            return Err(SessionStoreError::AlreadyExists);
        }
        sessions.insert(session.token.clone(), session);
        Ok(())
    }

    fn get(&self, token: &SessionToken) -> Result<Option<SuperAdminSession>, SessionStoreError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        Ok(sessions.get(token).cloned())
    }

    fn update(&self, session: &SuperAdminSession) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        match sessions.get_mut(&session.token) {
            Some(existing) => {
                *existing = session.clone();
                Ok(())
            }
            None => Err(SessionStoreError::NotFound),
        }
    }

    fn update_impersonation(&self, session: &SuperAdminSession, now: DateTime<Utc>) -> Result<(), SessionStoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let stored = sessions.get_mut(&session.token).ok_or(SessionStoreError::NotFound)?;
        match stored.effective_status(now) {
            SessionStatus::Active => {
                stored.impersonated_tenant_id = session.impersonated_tenant_id.clone();
                stored.impersonated_user_id = session.impersonated_user_id.clone();
                stored.impersonated_role = session.impersonated_role.clone();
                Ok(())
            }
            status => Err(SessionStoreError::NotActive(status)),
        }
    }

    fn list_for_user(&self, user_id: &SubjectId) -> Result<Vec<SuperAdminSession>, SessionStoreError> {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let mut out: Vec<_> = sessions.values().filter(|s| &s.user_id == user_id).cloned().collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    fn mark_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionStoreError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let mut changed = 0;
        for session in sessions.values_mut() {
            if session.status == SessionStatus::Active && now >= session.expires_at {
                session.status = SessionStatus::Expired;
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("session terminated")]
    Terminated,

    #[error("super-admin user {0} is inactive")]
    UserInactive(SubjectId),

    #[error("tenant {0} is outside the administrator's scope")]
    OutOfScope(TenantId),

    #[error("tenant {0} is unknown or inactive")]
    TenantUnavailable(TenantId),

    #[error("unknown impersonation role '{0}'")]
    UnknownRole(Role),

    #[error("role '{0}' cannot be impersonated")]
    ForbiddenRole(Role),

    #[error(transparent)]
    Store(#[from] SessionStoreError),

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Look up a session and apply lazy expiry.
///
/// Shared by the session manager and the decision engine so both agree on
/// what "currently valid" means.
pub fn check_session(
    store: &dyn SessionStore,
    token: &SessionToken,
    now: DateTime<Utc>,
) -> Result<SuperAdminSession, SessionError> {
    let session = store.get(token)?.ok_or(SessionError::NotFound)?;
    match session.effective_status(now) {
        SessionStatus::Active => Ok(session),
        SessionStatus::Expired => Err(SessionError::Expired),
        SessionStatus::Terminated => Err(SessionError::Terminated),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a super-admin session.
    pub ttl_minutes: i64,
    /// Role assumed when impersonation names none.
    pub default_impersonation_role: Role,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_minutes: 60,
            default_impersonation_role: Role::new("tenant-admin"),
        }
    }
}

pub const OP_SESSION_CREATED: &str = "SUPERADMIN_SESSION_CREATED";
pub const OP_SESSION_TERMINATED: &str = "SUPERADMIN_SESSION_TERMINATED";
pub const OP_IMPERSONATION_STARTED: &str = "SUPERADMIN_IMPERSONATION_STARTED";
pub const OP_IMPERSONATION_ENDED: &str = "SUPERADMIN_IMPERSONATION_ENDED";

const SESSION_ENTITY: &str = "superadmin_session";

pub struct SuperAdminSessionManager {
    store: Arc<dyn SessionStore>,
    tenants: Arc<dyn TenantDirectory>,
    table: Arc<RolePermissionTable>,
    audit: Arc<AuditLogger>,
    config: SessionConfig,
}

impl SuperAdminSessionManager {
    pub fn new(
        store: Arc<dyn SessionStore>,
        tenants: Arc<dyn TenantDirectory>,
        table: Arc<RolePermissionTable>,
        audit: Arc<AuditLogger>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            tenants,
            table,
            audit,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    pub fn create_session(
        &self,
        user: &SuperAdminUser,
        now: DateTime<Utc>,
    ) -> Result<SuperAdminSession, SessionError> {
        if !user.active {
            warn!(user_id = %user.user_id, "inactive super-admin attempted to open a session");
            return Err(SessionError::UserInactive(user.user_id.clone()));
        }

        let session = SuperAdminSession {
            id: Uuid::now_v7(),
            user_id: user.user_id.clone(),
            token: SessionToken::generate(),
            scoped_to_tenant_id: user.scoped_to_tenant_id.clone(),
            impersonated_tenant_id: None,
            impersonated_user_id: None,
            impersonated_role: None,
            created_at: now,
            expires_at: now + Duration::minutes(self.config.ttl_minutes),
            terminated_at: None,
            termination_reason: None,
            status: SessionStatus::Active,
        };

        let mut record = AuditRecord::new(OP_SESSION_CREATED, SESSION_ENTITY, session.entity_id(), user.user_id.as_str())
            .after(serde_json::json!({
                "scoped_to_tenant_id": session.scoped_to_tenant_id,
                "expires_at": session.expires_at,
            }))
            .severity(Severity::Warning);
        if let Some(scope) = &session.scoped_to_tenant_id {
            record = record.tenant(scope.clone());
        }
        self.audit.record_at(record, now)?;

        self.store.insert(session.clone())?;
        info!(session_id = %session.id, user_id = %session.user_id, "super-admin session created");
        Ok(session)
    }

    pub fn validate(&self, token: &SessionToken, now: DateTime<Utc>) -> Result<SuperAdminSession, SessionError> {
        check_session(self.store.as_ref(), token, now)
    }

    /// Terminate a session (logout or revocation). Terminating an already
    /// terminated session is a no-op.
    pub fn terminate(
        &self,
        token: &SessionToken,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<SuperAdminSession, SessionError> {
        let mut session = self.store.get(token)?.ok_or(SessionError::NotFound)?;
        if session.terminated_at.is_some() {
            return Ok(session);
        }

        self.audit.record_at(
            AuditRecord::new(OP_SESSION_TERMINATED, SESSION_ENTITY, session.entity_id(), session.user_id.as_str())
                .impersonating(session.impersonated_tenant_id.clone())
                .after(serde_json::json!({ "reason": reason }))
                .severity(Severity::Warning),
            now,
        )?;

        session.status = SessionStatus::Terminated;
        session.terminated_at = Some(now);
        session.termination_reason = Some(reason.to_string());
        self.store.update(&session)?;

        info!(session_id = %session.id, reason, "super-admin session terminated");
        Ok(session)
    }

    /// Security revocation: terminate every live session of a user.
    pub fn revoke_all_for_user(
        &self,
        user_id: &SubjectId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<usize, SessionError> {
        let mut revoked = 0;
        for session in self.store.list_for_user(user_id)? {
            if session.is_active(now) {
                self.terminate(&session.token, reason, now)?;
                revoked += 1;
            }
        }
        if revoked > 0 {
            warn!(user_id = %user_id, revoked, reason, "super-admin sessions revoked");
        }
        Ok(revoked)
    }

    /// Scope the existing session to act inside `tenant_id` with the
    /// permissions of the impersonated role. The token does not change.
    pub fn impersonate(
        &self,
        token: &SessionToken,
        tenant_id: &TenantId,
        impersonation: Impersonation,
        now: DateTime<Utc>,
    ) -> Result<SuperAdminSession, SessionError> {
        let mut session = self.validate(token, now)?;

        if let Some(scope) = &session.scoped_to_tenant_id {
            if scope != tenant_id {
                warn!(session_id = %session.id, tenant_id = %tenant_id, "impersonation outside scope refused");
                return Err(SessionError::OutOfScope(tenant_id.clone()));
            }
        }
        if !self.tenants.is_active(tenant_id) {
            return Err(SessionError::TenantUnavailable(tenant_id.clone()));
        }

        let role = impersonation
            .role
            .unwrap_or_else(|| self.config.default_impersonation_role.clone());
        if !self.table.contains_role(&role) {
            return Err(SessionError::UnknownRole(role));
        }
        if role.is_super_admin() {
            return Err(SessionError::ForbiddenRole(role));
        }

        let before = serde_json::json!({
            "impersonated_tenant_id": session.impersonated_tenant_id,
            "impersonated_user_id": session.impersonated_user_id,
            "impersonated_role": session.impersonated_role,
        });
        session.impersonated_tenant_id = Some(tenant_id.clone());
        session.impersonated_user_id = impersonation.user_id;
        session.impersonated_role = Some(role);
        let after = serde_json::json!({
            "impersonated_tenant_id": session.impersonated_tenant_id,
            "impersonated_user_id": session.impersonated_user_id,
            "impersonated_role": session.impersonated_role,
        });

        self.audit.record_at(
            AuditRecord::new(OP_IMPERSONATION_STARTED, SESSION_ENTITY, session.entity_id(), session.user_id.as_str())
                .tenant(tenant_id.clone())
                .impersonating(Some(tenant_id.clone()))
                .before(before)
                .after(after)
                .severity(Severity::Warning),
            now,
        )?;
        self.commit_impersonation(&session, now)?;

        info!(
            session_id = %session.id,
            tenant_id = %tenant_id,
            role = ?session.impersonated_role,
            "super-admin impersonation started"
        );
        Ok(session)
    }

    /// Drop impersonation and return to the unscoped session.
    pub fn end_impersonation(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<SuperAdminSession, SessionError> {
        let mut session = self.validate(token, now)?;
        let Some(tenant_id) = session.impersonated_tenant_id.take() else {
            return Ok(session);
        };

        self.audit.record_at(
            AuditRecord::new(OP_IMPERSONATION_ENDED, SESSION_ENTITY, session.entity_id(), session.user_id.as_str())
                .tenant(tenant_id.clone())
                .impersonating(Some(tenant_id.clone()))
                .severity(Severity::Info),
            now,
        )?;

        session.impersonated_user_id = None;
        session.impersonated_role = None;
        self.commit_impersonation(&session, now)?;

        info!(session_id = %session.id, tenant_id = %tenant_id, "super-admin impersonation ended");
        Ok(session)
    }

    fn commit_impersonation(&self, session: &SuperAdminSession, now: DateTime<Utc>) -> Result<(), SessionError> {
        match self.store.update_impersonation(session, now) {
            Ok(()) => Ok(()),
            Err(SessionStoreError::NotActive(status)) => {
                warn!(session_id = %session.id, ?status, "session changed state before impersonation was committed");
                Err(match status {
                    SessionStatus::Expired => SessionError::Expired,
                    _ => SessionError::Terminated,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Storage hygiene only; validation never depends on this having run.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let swept = self.store.mark_expired(now)?;
        if swept > 0 {
            info!(swept, "expired super-admin sessions swept");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use zoo_audit::{AuditQuery, InMemoryAuditStore};
    use zoo_core::Tenant;

    use crate::tenant::InMemoryTenantDirectory;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn tid(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    struct Fixture {
        manager: SuperAdminSessionManager,
        audit: Arc<AuditLogger>,
    }

    fn fixture() -> Fixture {
        let audit = Arc::new(AuditLogger::new(Arc::new(InMemoryAuditStore::new())));
        let tenants = Arc::new(InMemoryTenantDirectory::with_tenants([
            Tenant::new(tid("zoo-praha"), "Zoo Praha"),
            Tenant::new(tid("zoo-brno"), "Zoo Brno"),
            Tenant::new(tid("zoo-closed"), "Closed").deactivated(),
        ]));
        let manager = SuperAdminSessionManager::new(
            Arc::new(InMemorySessionStore::new()),
            tenants,
            Arc::new(RolePermissionTable::zoo_defaults()),
            audit.clone(),
            SessionConfig::default(),
        );
        Fixture { manager, audit }
    }

    fn admin(scope: Option<&str>) -> SuperAdminUser {
        SuperAdminUser {
            user_id: SubjectId::parse("auth0|root").unwrap(),
            email: "root@zoorecords.cz".to_string(),
            scoped_to_tenant_id: scope.map(tid),
            active: true,
        }
    }

    fn audit_ops(audit: &AuditLogger) -> Vec<String> {
        audit
            .query(&AuditQuery::default().with_limit(usize::MAX))
            .unwrap()
            .iter()
            .map(|e| e.operation().to_string())
            .collect()
    }

    #[test]
    fn session_expires_lazily() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();

        assert!(f.manager.validate(&session.token, t0() + Duration::minutes(59)).is_ok());
        assert_eq!(
            f.manager.validate(&session.token, t0() + Duration::minutes(60)),
            Err(SessionError::Expired)
        );
        // No sweep ran: the stored row is still `Active`.
        let stored = f.manager.store().get(&session.token).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
    }

    #[test]
    fn sweep_marks_rows_expired() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();
        f.manager.create_session(&admin(None), t0() + Duration::minutes(30)).unwrap();

        let swept = f.manager.sweep_expired(t0() + Duration::minutes(61)).unwrap();
        assert_eq!(swept, 1);
        let stored = f.manager.store().get(&session.token).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Expired);
    }

    #[test]
    fn inactive_admin_cannot_open_a_session() {
        let f = fixture();
        let mut user = admin(None);
        user.active = false;
        assert!(matches!(f.manager.create_session(&user, t0()), Err(SessionError::UserInactive(_))));
        assert!(audit_ops(&f.audit).is_empty());
    }

    #[test]
    fn terminate_is_audited_and_idempotent() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();

        f.manager.terminate(&session.token, "logout", t0()).unwrap();
        f.manager.terminate(&session.token, "logout", t0()).unwrap();

        assert_eq!(f.manager.validate(&session.token, t0()), Err(SessionError::Terminated));
        assert_eq!(audit_ops(&f.audit), vec![OP_SESSION_CREATED, OP_SESSION_TERMINATED]);
    }

    #[test]
    fn impersonation_updates_the_existing_session() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();

        let updated = f
            .manager
            .impersonate(
                &session.token,
                &tid("zoo-brno"),
                Impersonation {
                    user_id: Some("auth0|brno-curator".to_string()),
                    role: Some(Role::new("Curator")),
                },
                t0(),
            )
            .unwrap();

        assert_eq!(updated.token, session.token);
        assert_eq!(updated.id, session.id);
        assert!(updated.is_impersonating(&tid("zoo-brno")));
        assert_eq!(updated.impersonated_role, Some(Role::new("curator")));

        let entries = f.audit.query(&AuditQuery::for_tenant(tid("zoo-brno"))).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation(), OP_IMPERSONATION_STARTED);
        assert_eq!(entries[0].impersonated_tenant_id(), Some(&tid("zoo-brno")));
    }

    #[test]
    fn impersonation_defaults_role_and_ends_cleanly() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();

        let s = f
            .manager
            .impersonate(&session.token, &tid("zoo-praha"), Impersonation::default(), t0())
            .unwrap();
        assert_eq!(s.impersonated_role, Some(Role::new("tenant-admin")));

        let s = f.manager.end_impersonation(&session.token, t0()).unwrap();
        assert!(s.impersonated_tenant_id.is_none());
        assert!(s.impersonated_role.is_none());

        assert_eq!(
            audit_ops(&f.audit),
            vec![OP_SESSION_CREATED, OP_IMPERSONATION_STARTED, OP_IMPERSONATION_ENDED]
        );
    }

    #[test]
    fn impersonation_is_refused_outside_scope_or_for_closed_tenants() {
        let f = fixture();
        let scoped = f.manager.create_session(&admin(Some("zoo-praha")), t0()).unwrap();
        assert_eq!(
            f.manager
                .impersonate(&scoped.token, &tid("zoo-brno"), Impersonation::default(), t0()),
            Err(SessionError::OutOfScope(tid("zoo-brno")))
        );

        let unscoped = f.manager.create_session(&admin(None), t0()).unwrap();
        assert_eq!(
            f.manager
                .impersonate(&unscoped.token, &tid("zoo-closed"), Impersonation::default(), t0()),
            Err(SessionError::TenantUnavailable(tid("zoo-closed")))
        );
        assert!(matches!(
            f.manager.impersonate(
                &unscoped.token,
                &tid("zoo-praha"),
                Impersonation {
                    user_id: None,
                    role: Some(Role::new("ringmaster")),
                },
                t0()
            ),
            Err(SessionError::UnknownRole(_))
        ));
        assert!(matches!(
            f.manager.impersonate(
                &unscoped.token,
                &tid("zoo-praha"),
                Impersonation {
                    user_id: None,
                    role: Some(Role::super_admin()),
                },
                t0()
            ),
            Err(SessionError::ForbiddenRole(_))
        ));
    }

    #[test]
    fn expired_session_cannot_impersonate() {
        let f = fixture();
        let session = f.manager.create_session(&admin(None), t0()).unwrap();
        let later = t0() + Duration::hours(2);
        assert_eq!(
            f.manager
                .impersonate(&session.token, &tid("zoo-praha"), Impersonation::default(), later),
            Err(SessionError::Expired)
        );
    }

    #[test]
    fn revoke_all_terminates_only_live_sessions() {
        let f = fixture();
        let user = admin(None);
        f.manager.create_session(&user, t0()).unwrap();
        f.manager.create_session(&user, t0() + Duration::minutes(50)).unwrap();

        // The first session has expired by now.
        let revoked = f
            .manager
            .revoke_all_for_user(&user.user_id, "credential leak", t0() + Duration::minutes(70))
            .unwrap();
        assert_eq!(revoked, 1);
    }

    /// Revokes the session from inside the audit write of an impersonation,
    /// the way a concurrent `terminate` could land between read and commit.
    struct RevokeOnImpersonation {
        store: Arc<InMemorySessionStore>,
        token: std::sync::Mutex<Option<SessionToken>>,
    }

    impl zoo_audit::AuditListener for RevokeOnImpersonation {
        fn on_appended(&self, entry: &zoo_audit::AuditLogEntry) -> Result<(), String> {
            if entry.operation() != OP_IMPERSONATION_STARTED {
                return Ok(());
            }
            let token = self.token.lock().unwrap().clone().ok_or("no token")?;
            let mut session = self.store.get(&token).unwrap().ok_or("missing session")?;
            session.status = SessionStatus::Terminated;
            session.terminated_at = Some(t0());
            self.store.update(&session).map_err(|e| e.to_string())
        }
    }

    #[test]
    fn termination_racing_an_impersonation_is_not_undone() {
        let store = Arc::new(InMemorySessionStore::new());
        let revoker = Arc::new(RevokeOnImpersonation { store: store.clone(), token: Default::default() });
        let audit = Arc::new(AuditLogger::new(Arc::new(InMemoryAuditStore::new())).with_listener(revoker.clone()));
        let tenants = Arc::new(InMemoryTenantDirectory::with_tenants([Tenant::new(tid("zoo-praha"), "Zoo Praha")]));
        let manager = SuperAdminSessionManager::new(
            store.clone(),
            tenants,
            Arc::new(RolePermissionTable::zoo_defaults()),
            audit,
            SessionConfig::default(),
        );

        let session = manager.create_session(&admin(None), t0()).unwrap();
        *revoker.token.lock().unwrap() = Some(session.token.clone());

        assert_eq!(
            manager.impersonate(&session.token, &tid("zoo-praha"), Impersonation::default(), t0()),
            Err(SessionError::Terminated)
        );
        assert_eq!(manager.validate(&session.token, t0()), Err(SessionError::Terminated));
        let stored = store.get(&session.token).unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Terminated);
        assert!(stored.impersonated_tenant_id.is_none());
    }

    #[test]
    fn impersonation_commit_refuses_an_expired_row() {
        let store = InMemorySessionStore::new();
        let f = fixture();
        let mut session = f.manager.create_session(&admin(None), t0()).unwrap();
        store.insert(session.clone()).unwrap();

        session.impersonated_tenant_id = Some(tid("zoo-praha"));
        assert_eq!(
            store.update_impersonation(&session, t0() + Duration::hours(2)),
            Err(SessionStoreError::NotActive(SessionStatus::Expired))
        );
        assert!(store.get(&session.token).unwrap().unwrap().impersonated_tenant_id.is_none());
    }

    #[test]
    fn token_debug_does_not_leak() {
        let token = SessionToken::generate();
        assert_eq!(token.as_str().len(), 64);
        let shown = format!("{token:?}");
        assert!(!shown.contains(token.as_str()));
    }
}
