//! Audit Trail
//!
//! Append-only record of the key mutations the rollover engine performs.
//! The durable sink is provided by the persistence layer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{KeyAlgorithm, KeyType, RolloverError, Zone};

pub const EVENT_ROLLOVER_INITIATED: &str = "dnssec.rollover.initiated";
pub const EVENT_ROLLOVER_COMPLETED: &str = "dnssec.rollover.completed";
pub const EVENT_KEY_DELETED: &str = "dnssec.key.deleted";

const TARGET_DOMAINS: &str = "domains";
const TARGET_CRYPTOKEYS: &str = "cryptokeys";

/// One audit log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Acting user; `None` for scheduled runs
    pub actor_id: Option<i64>,
    pub event_type: String,
    pub target_table: String,
    pub target_id: Option<i64>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub source_ip: Option<String>,
    pub detail: String,
}

impl AuditEvent {
    /// A new key was requested for the zone
    pub fn rollover_initiated(
        zone: &Zone,
        key_type: KeyType,
        algorithm: &KeyAlgorithm,
        new_key_id: Option<i64>,
    ) -> Self {
        Self {
            actor_id: None,
            event_type: EVENT_ROLLOVER_INITIATED.to_string(),
            target_table: TARGET_DOMAINS.to_string(),
            target_id: Some(zone.id),
            old_value: None,
            new_value: new_key_id.map(|id| id.to_string()),
            source_ip: None,
            detail: json!({
                "zone": zone.name,
                "keytype": key_type.as_str(),
                "algorithm": algorithm.name(),
                "new_key_id": new_key_id,
            })
            .to_string(),
        }
    }

    /// Hold period elapsed, superseded keys deactivated
    pub fn rollover_completed(zone: &Zone, deactivated: &[i64]) -> Self {
        Self {
            actor_id: None,
            event_type: EVENT_ROLLOVER_COMPLETED.to_string(),
            target_table: TARGET_DOMAINS.to_string(),
            target_id: Some(zone.id),
            old_value: None,
            new_value: None,
            source_ip: None,
            detail: json!({
                "zone": zone.name,
                "deactivated_key_ids": deactivated,
            })
            .to_string(),
        }
    }

    /// A deactivated key was removed after its grace period
    pub fn key_deleted(zone: &Zone, key_id: i64, age_days: i64) -> Self {
        Self {
            actor_id: None,
            event_type: EVENT_KEY_DELETED.to_string(),
            target_table: TARGET_CRYPTOKEYS.to_string(),
            target_id: Some(key_id),
            old_value: Some("inactive".to_string()),
            new_value: None,
            source_ip: None,
            detail: json!({
                "zone": zone.name,
                "key_id": key_id,
                "deactivated_days_ago": age_days,
            })
            .to_string(),
        }
    }
}

/// Durable append-only event log
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, event: &AuditEvent) -> Result<(), RolloverError>;
}
