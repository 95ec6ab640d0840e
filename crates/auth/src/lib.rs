//! `zoo-auth`: tenant authorization for the zoo-records core.
//!
//! Pure over shared reference data (role table, tenant directory, session
//! store): no HTTP, no persistence engine.

pub mod claims;
pub mod decision;
pub mod permissions;
pub mod principal;
pub mod role_table;
pub mod roles;
pub mod session;
pub mod tenant;

pub use claims::{IdentityClaims, TokenValidationError, TokenVerifier, validate_claims};
pub use decision::{AccessDecision, AccessDecisionEngine, AccessExplanation, DecisionRule, ReasonCode};
pub use permissions::{AccessKind, Permission, PermissionClassifier};
pub use principal::{ClaimsError, ClaimsProcessor, Principal};
pub use role_table::RolePermissionTable;
pub use roles::{Role, SUPER_ADMIN_ROLE};
pub use session::{
    Impersonation, InMemorySessionStore, SessionConfig, SessionError, SessionStatus, SessionStore,
    SessionStoreError, SessionToken, SuperAdminSession, SuperAdminSessionManager, SuperAdminUser,
    check_session,
};
pub use tenant::{
    InMemoryTenantDirectory, ResolvedTenant, TenantDirectory, TenantHint, TenantResolutionError,
    TenantResolver, TenantResolverConfig, TenantSource,
};
