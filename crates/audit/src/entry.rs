//! Audit log entries and their integrity hash.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use zoo_core::TenantId;

/// Previous-hash value of the first entry in a chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Severity of an audited operation. Ordered: `Info < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl core::fmt::Display for Severity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Severity::Info => f.write_str("info"),
            Severity::Warning => f.write_str("warning"),
            Severity::Critical => f.write_str("critical"),
        }
    }
}

/// What the caller wants recorded. The logger turns it into a sealed
/// [`AuditLogEntry`] by assigning sequence, timestamp and hashes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub operation: String,
    pub entity_type: String,
    pub entity_id: String,
    pub performed_by: String,
    pub tenant_id: Option<TenantId>,
    pub impersonated_tenant_id: Option<TenantId>,
    pub before_data: Option<JsonValue>,
    pub after_data: Option<JsonValue>,
    pub severity: Severity,
}

impl AuditRecord {
    pub fn new(
        operation: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        performed_by: impl Into<String>,
    ) -> Self {
        Self {
            operation: operation.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            performed_by: performed_by.into(),
            tenant_id: None,
            impersonated_tenant_id: None,
            before_data: None,
            after_data: None,
            severity: Severity::Info,
        }
    }

    pub fn tenant(mut self, tenant_id: TenantId) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    pub fn impersonating(mut self, tenant_id: Option<TenantId>) -> Self {
        self.impersonated_tenant_id = tenant_id;
        self
    }

    pub fn before(mut self, data: JsonValue) -> Self {
        self.before_data = Some(data);
        self
    }

    pub fn after(mut self, data: JsonValue) -> Self {
        self.after_data = Some(data);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}

/// An immutable, hash-chained audit entry.
///
/// Fields are private: once sealed, an entry can only be read. Stores persist
/// entries through serde; a row edited behind the logger's back no longer
/// matches its `integrity_hash`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    sequence: u64,
    operation: String,
    entity_type: String,
    entity_id: String,
    performed_by: String,
    tenant_id: Option<TenantId>,
    impersonated_tenant_id: Option<TenantId>,
    before_data: Option<JsonValue>,
    after_data: Option<JsonValue>,
    timestamp: DateTime<Utc>,
    severity: Severity,
    previous_hash: String,
    integrity_hash: String,
}

/// Field-ordered view hashed for the integrity hash (everything except the
/// hash itself).
#[derive(Serialize)]
struct CanonicalEntry<'a> {
    sequence: u64,
    operation: &'a str,
    entity_type: &'a str,
    entity_id: &'a str,
    performed_by: &'a str,
    tenant_id: Option<&'a str>,
    impersonated_tenant_id: Option<&'a str>,
    before_data: Option<JsonValue>,
    after_data: Option<JsonValue>,
    timestamp: String,
    severity: Severity,
    previous_hash: &'a str,
}

impl AuditLogEntry {
    /// Seal a record at `sequence`, linking it to `previous_hash`.
    pub fn seal(
        sequence: u64,
        record: AuditRecord,
        timestamp: DateTime<Utc>,
        previous_hash: impl Into<String>,
    ) -> Self {
        let mut entry = Self {
            sequence,
            operation: record.operation,
            entity_type: record.entity_type,
            entity_id: record.entity_id,
            performed_by: record.performed_by,
            tenant_id: record.tenant_id,
            impersonated_tenant_id: record.impersonated_tenant_id,
            before_data: record.before_data,
            after_data: record.after_data,
            timestamp,
            severity: record.severity,
            previous_hash: previous_hash.into(),
            integrity_hash: String::new(),
        };
        entry.integrity_hash = entry.compute_hash();
        entry
    }

    /// Recompute the SHA-256 hash over the canonical serialization.
    pub fn compute_hash(&self) -> String {
        let canonical = CanonicalEntry {
            sequence: self.sequence,
            operation: &self.operation,
            entity_type: &self.entity_type,
            entity_id: &self.entity_id,
            performed_by: &self.performed_by,
            tenant_id: self.tenant_id.as_ref().map(|t| t.as_str()),
            impersonated_tenant_id: self.impersonated_tenant_id.as_ref().map(|t| t.as_str()),
            before_data: self.before_data.as_ref().map(canonical_json),
            after_data: self.after_data.as_ref().map(canonical_json),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true),
            severity: self.severity,
            previous_hash: &self.previous_hash,
        };

        // Serializing a struct of strings, numbers and JSON values cannot fail.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    pub fn performed_by(&self) -> &str {
        &self.performed_by
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    pub fn impersonated_tenant_id(&self) -> Option<&TenantId> {
        self.impersonated_tenant_id.as_ref()
    }

    pub fn before_data(&self) -> Option<&JsonValue> {
        self.before_data.as_ref()
    }

    pub fn after_data(&self) -> Option<&JsonValue> {
        self.after_data.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn integrity_hash(&self) -> &str {
        &self.integrity_hash
    }
}

/// Rebuild a JSON value with object keys in sorted order, independent of
/// whether `serde_json` preserves insertion order in this build.
fn canonical_json(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical_json(&map[key]));
            }
            JsonValue::Object(sorted)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(canonical_json).collect()),
        other => other.clone(),
    }
}
