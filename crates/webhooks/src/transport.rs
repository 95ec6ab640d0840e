//! Outbound HTTP for webhook deliveries.

use std::time::Duration;

use thiserror::Error;

use crate::types::WebhookDelivery;

pub const HEADER_SIGNATURE: &str = "X-Signature";
pub const HEADER_IDEMPOTENCY_KEY: &str = "X-Idempotency-Key";
pub const HEADER_EVENT_TYPE: &str = "X-Event-Type";
pub const HEADER_EVENT_ID: &str = "X-Event-Id";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// One POST, fully described.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(&'static str, String)>,
}

impl WebhookRequest {
    pub fn for_delivery(delivery: &WebhookDelivery) -> Self {
        Self {
            url: delivery.target_url.clone(),
            body: delivery.payload.clone(),
            headers: vec![
                ("Content-Type", "application/json".to_string()),
                (HEADER_SIGNATURE, delivery.signature.clone()),
                (HEADER_IDEMPOTENCY_KEY, delivery.idempotency_key.clone()),
                (HEADER_EVENT_TYPE, delivery.event_type.clone()),
                (HEADER_EVENT_ID, delivery.event_id.clone()),
            ],
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

/// Sends a webhook request and reports the HTTP status code.
pub trait WebhookTransport: Send + Sync {
    fn send(&self, request: &WebhookRequest) -> Result<u16, TransportError>;
}

/// Blocking `reqwest` transport with a per-request timeout.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("zoo-webhooks/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Ok(Self { client })
    }
}

impl WebhookTransport for ReqwestTransport {
    fn send(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Other(e.to_string())
            }
        })?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NotificationConfig;
    use chrono::Utc;

    #[test]
    fn request_carries_signature_and_idempotency_headers() {
        let config = NotificationConfig::new(None, "https://hooks.example/zoo", "secret");
        let delivery = WebhookDelivery::new(
            &config,
            None,
            "SUPERADMIN_SESSION_CREATED",
            "evt-1",
            r#"{"ok":true}"#.to_string(),
            Utc::now(),
        );

        let req = WebhookRequest::for_delivery(&delivery);
        assert_eq!(req.url, "https://hooks.example/zoo");
        assert_eq!(req.body, r#"{"ok":true}"#);
        assert_eq!(req.header("x-signature"), Some(delivery.signature.as_str()));
        assert_eq!(req.header(HEADER_IDEMPOTENCY_KEY), Some(delivery.idempotency_key.as_str()));
        assert_eq!(req.header(HEADER_EVENT_TYPE), Some("SUPERADMIN_SESSION_CREATED"));
        assert_eq!(req.header("content-type"), Some("application/json"));
    }

    #[test]
    fn unreachable_endpoint_is_a_transport_error() {
        let transport = ReqwestTransport::new(Duration::from_millis(500)).unwrap();
        let req = WebhookRequest {
            // Port 9 (discard) on loopback is closed on test hosts.
            url: "http://127.0.0.1:9/hook".to_string(),
            body: "{}".to_string(),
            headers: Vec::new(),
        };
        assert!(transport.send(&req).is_err());
    }
}
