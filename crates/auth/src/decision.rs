//! The access decision engine: tenant isolation plus the super-admin override.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use zoo_core::TenantId;

use crate::permissions::{AccessKind, PermissionClassifier};
use crate::session::{SessionStore, SuperAdminSession, check_session};
use crate::tenant::TenantDirectory;
use crate::{Permission, Principal, Role, RolePermissionTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    PermissionGranted,
    ImpersonationGranted,
    SuperAdminRead,
    TenantInactive,
    NoTenantContext,
    CrossTenantDenied,
    PermissionDenied,
    ImpersonationRequired,
}

impl ReasonCode {
    pub fn is_allow(self) -> bool {
        matches!(
            self,
            Self::PermissionGranted | Self::ImpersonationGranted | Self::SuperAdminRead
        )
    }
}

/// Which rule produced the decision, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    TenantStatus,
    TenantContext,
    CrossTenantIsolation,
    TenantPermission,
    Impersonation,
    SuperAdminOverride,
}

/// Outcome of one [`AccessDecisionEngine::decide`] call. Never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    pub allow: bool,
    pub reason: ReasonCode,
    pub rule: DecisionRule,
    /// Granted through the super-admin escape hatch; must be audited.
    pub privileged: bool,
    pub session_id: Option<Uuid>,
    pub impersonated_tenant_id: Option<TenantId>,
}

impl AccessDecision {
    fn allow(reason: ReasonCode, rule: DecisionRule) -> Self {
        Self {
            allow: true,
            reason,
            rule,
            privileged: false,
            session_id: None,
            impersonated_tenant_id: None,
        }
    }

    fn deny(reason: ReasonCode, rule: DecisionRule) -> Self {
        Self {
            allow: false,
            ..Self::allow(reason, rule)
        }
    }

    fn privileged(mut self, session: &SuperAdminSession) -> Self {
        self.privileged = self.allow;
        self.session_id = Some(session.id);
        self.impersonated_tenant_id = session.impersonated_tenant_id.clone();
        self
    }
}

/// Diagnostic view of a decision: what was checked and what would change it.
#[derive(Debug, Clone, Serialize)]
pub struct AccessExplanation {
    pub required_permission: String,
    pub target_tenant: TenantId,
    pub decision: AccessDecision,
    pub reason: String,
    /// Permissions the rule actually consulted, sorted.
    pub effective_permissions: Vec<String>,
    pub acting_role: Option<Role>,
    pub suggestions: Vec<String>,
}

/// Decides ALLOW/DENY for (principal, tenant, permission).
///
/// All super-admin handling lives here; callers never special-case roles.
pub struct AccessDecisionEngine {
    table: Arc<RolePermissionTable>,
    classifier: PermissionClassifier,
    tenants: Arc<dyn TenantDirectory>,
    sessions: Arc<dyn SessionStore>,
}

struct Evaluation {
    decision: AccessDecision,
    session: Option<SuperAdminSession>,
}

impl AccessDecisionEngine {
    pub fn new(
        table: Arc<RolePermissionTable>,
        classifier: PermissionClassifier,
        tenants: Arc<dyn TenantDirectory>,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            table,
            classifier,
            tenants,
            sessions,
        }
    }

    pub fn classifier(&self) -> &PermissionClassifier {
        &self.classifier
    }

    pub fn decide(
        &self,
        principal: &Principal,
        target: &TenantId,
        required: &Permission,
        now: DateTime<Utc>,
    ) -> AccessDecision {
        let decision = self.evaluate(principal, target, required, now).decision;

        if decision.privileged {
            info!(
                subject = %principal.subject(),
                tenant_id = %target,
                permission = %required,
                reason = ?decision.reason,
                "privileged access granted"
            );
        } else {
            debug!(
                subject = %principal.subject(),
                tenant_id = %target,
                permission = %required,
                allow = decision.allow,
                reason = ?decision.reason,
                "access decided"
            );
        }
        decision
    }

    fn evaluate(
        &self,
        principal: &Principal,
        target: &TenantId,
        required: &Permission,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let done = |decision| Evaluation {
            decision,
            session: None,
        };

        if !self.tenants.is_active(target) {
            return done(AccessDecision::deny(ReasonCode::TenantInactive, DecisionRule::TenantStatus));
        }

        if principal.tenant().is_none() && !principal.is_super_admin() {
            return done(AccessDecision::deny(ReasonCode::NoTenantContext, DecisionRule::TenantContext));
        }

        if principal.tenant() == Some(target) {
            return done(if principal.has_permission(required) {
                AccessDecision::allow(ReasonCode::PermissionGranted, DecisionRule::TenantPermission)
            } else {
                AccessDecision::deny(ReasonCode::PermissionDenied, DecisionRule::TenantPermission)
            });
        }

        let Some(session) = self.cross_tenant_session(principal, target, now) else {
            return done(AccessDecision::deny(
                ReasonCode::CrossTenantDenied,
                DecisionRule::CrossTenantIsolation,
            ));
        };

        let decision = if session.is_impersonating(target) {
            let granted = session
                .impersonated_role
                .as_ref()
                .is_some_and(|role| !role.is_super_admin() && self.table.role_grants(role, required));
            if granted {
                AccessDecision::allow(ReasonCode::ImpersonationGranted, DecisionRule::Impersonation)
            } else {
                AccessDecision::deny(ReasonCode::PermissionDenied, DecisionRule::Impersonation)
            }
        } else if session.scoped_to_tenant_id.is_none()
            && self.classifier.access_kind(required) == AccessKind::Read
            && self.classifier.is_administrative(required)
        {
            AccessDecision::allow(ReasonCode::SuperAdminRead, DecisionRule::SuperAdminOverride)
        } else {
            AccessDecision::deny(ReasonCode::ImpersonationRequired, DecisionRule::SuperAdminOverride)
        };

        Evaluation {
            decision: decision.privileged(&session),
            session: Some(session),
        }
    }

    /// The session that lets `principal` cross into `target`, if any.
    fn cross_tenant_session(
        &self,
        principal: &Principal,
        target: &TenantId,
        now: DateTime<Utc>,
    ) -> Option<SuperAdminSession> {
        if !principal.is_super_admin() {
            return None;
        }
        let token = principal.session_token()?;
        let session = match check_session(self.sessions.as_ref(), token, now) {
            Ok(session) => session,
            Err(err) => {
                debug!(subject = %principal.subject(), error = %err, "super-admin session rejected");
                return None;
            }
        };

        if &session.user_id != principal.subject() {
            return None;
        }
        match &session.scoped_to_tenant_id {
            Some(scope) if scope != target => None,
            _ => Some(session),
        }
    }

    /// Explain why a decision was (or would be) made.
    pub fn explain(
        &self,
        principal: &Principal,
        target: &TenantId,
        required: &Permission,
        now: DateTime<Utc>,
    ) -> AccessExplanation {
        let Evaluation { decision, session } = self.evaluate(principal, target, required, now);

        let acting_role = session
            .as_ref()
            .filter(|s| s.is_impersonating(target))
            .and_then(|s| s.impersonated_role.clone());

        let mut effective_permissions: Vec<String> = match (&decision.rule, &acting_role) {
            (DecisionRule::Impersonation, Some(role)) => self
                .table
                .permissions_of(role)
                .map(|perms| perms.iter().map(|p| p.as_str().to_string()).collect())
                .unwrap_or_default(),
            _ => principal
                .permissions()
                .iter()
                .map(|p| p.as_str().to_string())
                .collect(),
        };
        effective_permissions.sort();

        let subject = principal.subject();
        let (reason, suggestions) = match decision.reason {
            ReasonCode::PermissionGranted => (
                format!("{subject} holds '{required}' in its own tenant {target}"),
                Vec::new(),
            ),
            ReasonCode::ImpersonationGranted => (
                format!("impersonated role grants '{required}' in {target}"),
                Vec::new(),
            ),
            ReasonCode::SuperAdminRead => (
                format!("unscoped super-admin session allows reading administrative resource '{}'", required.resource()),
                Vec::new(),
            ),
            ReasonCode::TenantInactive => (
                format!("tenant {target} is unknown or inactive"),
                vec!["Check the tenant id and its activation status".to_string()],
            ),
            ReasonCode::NoTenantContext => (
                format!("{subject} has no tenant and is not a super-admin"),
                vec!["Issue the identity token with a tenant claim".to_string()],
            ),
            ReasonCode::CrossTenantDenied => (
                format!(
                    "{subject} belongs to {} and holds no valid super-admin session for {target}",
                    principal.tenant().map_or("no tenant", |t| t.as_str())
                ),
                vec!["Cross-tenant access requires an active super-admin session scoped to the target".to_string()],
            ),
            ReasonCode::PermissionDenied => {
                let mut suggestions = vec![format!("Assign a role that grants '{required}'")];
                let granting: Vec<&str> = self
                    .table
                    .roles()
                    .filter(|r| !r.is_super_admin() && self.table.role_grants(r, required))
                    .map(Role::as_str)
                    .collect();
                if !granting.is_empty() {
                    suggestions.push(format!("Roles granting it: {}", granting.join(", ")));
                }
                (format!("'{required}' is not among the effective permissions"), suggestions)
            }
            ReasonCode::ImpersonationRequired => (
                format!("'{required}' in {target} requires impersonating that tenant"),
                vec![format!("Start an impersonation of {target} before writing")],
            ),
        };

        AccessExplanation {
            required_permission: required.as_str().to_string(),
            target_tenant: target.clone(),
            decision,
            reason,
            effective_permissions,
            acting_role,
            suggestions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use zoo_core::{SubjectId, Tenant};

    use crate::session::{InMemorySessionStore, SessionStatus, SessionToken};
    use crate::tenant::InMemoryTenantDirectory;
    use crate::{ClaimsProcessor, IdentityClaims};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 9, 0, 0).unwrap()
    }

    fn tid(s: &str) -> TenantId {
        TenantId::parse(s).unwrap()
    }

    struct Fixture {
        engine: AccessDecisionEngine,
        sessions: Arc<InMemorySessionStore>,
        processor: ClaimsProcessor,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(RolePermissionTable::zoo_defaults());
        let sessions = Arc::new(InMemorySessionStore::new());
        let tenants = Arc::new(InMemoryTenantDirectory::with_tenants([
            Tenant::new(tid("zoo-praha"), "Zoo Praha"),
            Tenant::new(tid("zoo-brno"), "Zoo Brno"),
            Tenant::new(tid("zoo-ostrava"), "Zoo Ostrava"),
            Tenant::new(tid("zoo-closed"), "Closed").deactivated(),
        ]));
        Fixture {
            engine: AccessDecisionEngine::new(
                table.clone(),
                PermissionClassifier::default(),
                tenants,
                sessions.clone(),
            ),
            sessions,
            processor: ClaimsProcessor::new(table),
        }
    }

    fn principal(f: &Fixture, sub: &str, roles: &[&str], tenant: Option<&str>) -> Principal {
        f.processor
            .process(&IdentityClaims {
                sub: sub.to_string(),
                roles: roles.iter().map(|r| r.to_string()).collect(),
                tenant: tenant.map(str::to_string),
                ..Default::default()
            })
            .unwrap()
    }

    fn session(user: &str, scope: Option<&str>, impersonating: Option<(&str, &str)>) -> SuperAdminSession {
        SuperAdminSession {
            id: Uuid::now_v7(),
            user_id: SubjectId::parse(user).unwrap(),
            token: SessionToken::generate(),
            scoped_to_tenant_id: scope.map(tid),
            impersonated_tenant_id: impersonating.map(|(t, _)| tid(t)),
            impersonated_user_id: None,
            impersonated_role: impersonating.map(|(_, r)| Role::new(r.to_string())),
            created_at: t0(),
            expires_at: t0() + Duration::hours(1),
            terminated_at: None,
            termination_reason: None,
            status: SessionStatus::Active,
        }
    }

    fn super_admin_with(f: &Fixture, s: SuperAdminSession) -> Principal {
        let token = s.token.clone();
        f.sessions.insert(s).unwrap();
        principal(f, "auth0|root", &["superadmin"], None).with_session_token(token)
    }

    fn perm(p: &'static str) -> Permission {
        Permission::new(p)
    }

    #[test]
    fn curator_is_confined_to_own_tenant() {
        let f = fixture();
        let curator = principal(&f, "auth0|eva", &["curator"], Some("zoo-praha"));

        let own = f.engine.decide(&curator, &tid("zoo-praha"), &perm("RECORDS:EDIT"), t0());
        assert!(own.allow);
        assert_eq!(own.reason, ReasonCode::PermissionGranted);
        assert!(!own.privileged);

        let other = f.engine.decide(&curator, &tid("zoo-brno"), &perm("RECORDS:EDIT"), t0());
        assert!(!other.allow);
        assert_eq!(other.reason, ReasonCode::CrossTenantDenied);
    }

    #[test]
    fn missing_permission_in_own_tenant() {
        let f = fixture();
        let viewer = principal(&f, "auth0|jan", &["viewer"], Some("zoo-praha"));
        let d = f.engine.decide(&viewer, &tid("zoo-praha"), &perm("MEDICAL:EDIT"), t0());
        assert_eq!((d.allow, d.reason), (false, ReasonCode::PermissionDenied));
    }

    #[test]
    fn inactive_target_is_denied_first() {
        let f = fixture();
        let admin = principal(&f, "auth0|adm", &["tenant-admin"], Some("zoo-closed"));
        let d = f.engine.decide(&admin, &tid("zoo-closed"), &perm("RECORDS:VIEW"), t0());
        assert_eq!(d.reason, ReasonCode::TenantInactive);
    }

    #[test]
    fn no_tenant_and_no_super_admin() {
        let f = fixture();
        let p = principal(&f, "auth0|drifter", &["curator"], None);
        let d = f.engine.decide(&p, &tid("zoo-praha"), &perm("RECORDS:VIEW"), t0());
        assert_eq!(d.reason, ReasonCode::NoTenantContext);
    }

    #[test]
    fn super_admin_without_session_is_isolated() {
        let f = fixture();
        let root = principal(&f, "auth0|root", &["superadmin"], None);
        for p in ["RECORDS:EDIT", "TENANTS:VIEW"] {
            let d = f.engine.decide(&root, &tid("zoo-brno"), &perm(p), t0());
            assert_eq!(d.reason, ReasonCode::CrossTenantDenied);
        }
    }

    #[test]
    fn unscoped_session_reads_admin_resources_but_cannot_write() {
        let f = fixture();
        let root = super_admin_with(&f, session("auth0|root", None, None));

        let read = f.engine.decide(&root, &tid("zoo-brno"), &perm("AUDIT:VIEW"), t0());
        assert!(read.allow && read.privileged);
        assert_eq!(read.reason, ReasonCode::SuperAdminRead);

        let write = f.engine.decide(&root, &tid("zoo-brno"), &perm("RECORDS:EDIT"), t0());
        assert_eq!((write.allow, write.reason), (false, ReasonCode::ImpersonationRequired));

        let data_read = f.engine.decide(&root, &tid("zoo-brno"), &perm("ANIMALS:VIEW"), t0());
        assert_eq!(data_read.reason, ReasonCode::ImpersonationRequired);
    }

    #[test]
    fn impersonation_grants_only_the_impersonated_role() {
        let f = fixture();
        let root = super_admin_with(&f, session("auth0|root", None, Some(("zoo-brno", "keeper"))));

        let feed = f.engine.decide(&root, &tid("zoo-brno"), &perm("FEEDING:EDIT"), t0());
        assert!(feed.allow && feed.privileged);
        assert_eq!(feed.impersonated_tenant_id, Some(tid("zoo-brno")));

        let med = f.engine.decide(&root, &tid("zoo-brno"), &perm("MEDICAL:EDIT"), t0());
        assert_eq!((med.allow, med.reason), (false, ReasonCode::PermissionDenied));

        // Impersonating brno does not open writes in ostrava.
        let elsewhere = f.engine.decide(&root, &tid("zoo-ostrava"), &perm("FEEDING:EDIT"), t0());
        assert_eq!(elsewhere.reason, ReasonCode::ImpersonationRequired);
    }

    #[test]
    fn scoped_session_cannot_leave_its_scope() {
        let f = fixture();
        let root = super_admin_with(&f, session("auth0|root", Some("zoo-praha"), None));

        let out = f.engine.decide(&root, &tid("zoo-brno"), &perm("AUDIT:VIEW"), t0());
        assert_eq!(out.reason, ReasonCode::CrossTenantDenied);

        let inside = f.engine.decide(&root, &tid("zoo-praha"), &perm("AUDIT:VIEW"), t0());
        assert_eq!(inside.reason, ReasonCode::ImpersonationRequired);
    }

    #[test]
    fn expired_or_foreign_sessions_do_not_count() {
        let f = fixture();
        let root = super_admin_with(&f, session("auth0|root", None, None));
        let later = t0() + Duration::hours(2);
        let d = f.engine.decide(&root, &tid("zoo-brno"), &perm("AUDIT:VIEW"), later);
        assert_eq!(d.reason, ReasonCode::CrossTenantDenied);

        let stolen = session("auth0|someone-else", None, None);
        let token = stolen.token.clone();
        f.sessions.insert(stolen).unwrap();
        let thief = principal(&f, "auth0|root", &["superadmin"], None).with_session_token(token);
        let d = f.engine.decide(&thief, &tid("zoo-brno"), &perm("AUDIT:VIEW"), t0());
        assert_eq!(d.reason, ReasonCode::CrossTenantDenied);
    }

    #[test]
    fn explanation_lists_granting_roles() {
        let f = fixture();
        let viewer = principal(&f, "auth0|jan", &["viewer"], Some("zoo-praha"));
        let e = f.engine.explain(&viewer, &tid("zoo-praha"), &perm("MEDICAL:EDIT"), t0());

        assert!(!e.decision.allow);
        assert!(e.suggestions.iter().any(|s| s.contains("veterinarian")));
        assert!(e.effective_permissions.contains(&"ANIMALS:VIEW".to_string()));
        assert!(serde_json::to_value(&e).is_ok());
    }

    #[test]
    fn explanation_uses_impersonated_permissions() {
        let f = fixture();
        let root = super_admin_with(&f, session("auth0|root", None, Some(("zoo-brno", "viewer"))));
        let e = f.engine.explain(&root, &tid("zoo-brno"), &perm("RECORDS:EDIT"), t0());

        assert_eq!(e.acting_role, Some(Role::new("viewer")));
        assert!(!e.effective_permissions.contains(&"*".to_string()));
        assert_eq!(e.effective_permissions.len(), 3);
    }

    const TENANTS: [&str; 3] = ["zoo-praha", "zoo-brno", "zoo-ostrava"];
    const ROLES: [&str; 6] = ["viewer", "keeper", "veterinarian", "curator", "tenant-admin", "superadmin"];

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: without a live super-admin session, no principal is ever
        /// allowed into a tenant other than its own.
        #[test]
        fn no_cross_tenant_allow_without_session(
            own in prop::option::of(prop::sample::select(TENANTS.to_vec())),
            target in prop::sample::select(TENANTS.to_vec()),
            roles in prop::collection::vec(prop::sample::select(ROLES.to_vec()), 0..4),
            permission in prop::sample::select(vec![
                "RECORDS:EDIT", "RECORDS:VIEW", "AUDIT:VIEW", "TENANTS:VIEW", "USERS:EDIT", "*",
            ]),
            bogus_token in any::<bool>(),
        ) {
            prop_assume!(own != Some(target));
            let f = fixture();
            let mut p = principal(&f, "auth0|prop", &roles, own);
            if bogus_token {
                p = p.with_session_token(SessionToken::generate());
            }

            let d = f.engine.decide(&p, &tid(target), &perm(permission), t0());
            prop_assert!(!d.allow, "unexpected allow: {:?}", d);
        }

        /// Property: an impersonating session never gets more than the
        /// impersonated role grants.
        #[test]
        fn impersonation_never_exceeds_role(
            role in prop::sample::select(ROLES[..5].to_vec()),
            permission in prop::sample::select(vec![
                "RECORDS:EDIT", "RECORDS:VIEW", "MEDICAL:EDIT", "FEEDING:EDIT",
                "USERS:EDIT", "AUDIT:VIEW", "TENANTS:DELETE", "SETTINGS:EDIT",
            ]),
        ) {
            let f = fixture();
            let root = super_admin_with(&f, session("auth0|root", None, Some(("zoo-brno", role))));
            let d = f.engine.decide(&root, &tid("zoo-brno"), &perm(permission), t0());

            let table = RolePermissionTable::zoo_defaults();
            prop_assert_eq!(d.allow, table.role_grants(&Role::new(role), &perm(permission)));
        }
    }
}
