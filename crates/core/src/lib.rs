//! `zoo-core`: shared primitives for the tenant-authorization core.
//!
//! Identifiers, the domain error model and the tenant record. No IO lives here.

pub mod error;
pub mod id;
pub mod tenant;

pub use error::{DomainError, DomainResult};
pub use id::{SubjectId, TenantId};
pub use tenant::{QuotaKind, Tenant, TenantQuotas};
