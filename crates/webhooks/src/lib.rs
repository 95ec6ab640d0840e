//! `zoo-webhooks`: signed, retried, at-most-once-in-flight webhook delivery.
//!
//! - Deliveries are created from audit entries by [`WebhookDispatcher`].
//! - Workers claim deliveries atomically, POST them with an HMAC signature and
//!   reschedule failures with exponential backoff.
//! - A delivery that exhausts its attempts is `Abandoned` and recorded as a
//!   Critical audit entry.

pub mod dispatcher;
pub mod signature;
pub mod store;
pub mod transport;
pub mod types;
pub mod worker;

pub use dispatcher::WebhookDispatcher;
pub use store::{
    DeliveryStats, DeliveryStore, DeliveryStoreError, InMemoryDeliveryStore, InMemoryNotificationConfigStore,
    NotificationConfigStore,
};
pub use transport::{DEFAULT_TIMEOUT, ReqwestTransport, TransportError, WebhookRequest, WebhookTransport};
pub use types::{
    BackoffStrategy, ConfigId, DeliveryId, DeliveryStatus, NotificationConfig, RetryPolicy, WebhookDelivery,
    idempotency_key,
};
pub use worker::{
    DeliveryOutcome, OP_DELIVERY_ABANDONED, WebhookDeliveryWorker, WorkerConfig, WorkerError, WorkerPoolHandle,
    WorkerStats,
};
