//! `zoo-guard`: request-facing entry point of the authorization core.
//!
//! Loads configuration, wires tenant resolution, access decisions, super-admin
//! sessions, the audit trail and webhook delivery together, and exposes a
//! [`Guard`] that enforces "authorize, act, audit, then respond".

pub mod config;
pub mod guard;
pub mod wiring;

pub use config::{AuditSettings, ConfigError, GuardConfig, WebhookSettings};
pub use guard::{AuditedOperation, Guard, GuardError, Guarded, RequestContext, SecurityContext};
pub use wiring::{GuardServices, GuardServicesBuilder};

/// Initialize logging from the `[logging]` section.
pub fn init_logging(config: &GuardConfig) {
    zoo_observability::init_with(&config.logging);
}
