//! Rollover Engine
//!
//! Executes the action implied by a zone's phase. External calls go first;
//! markers are only written once the call they record has succeeded, so a
//! failed step leaves the zone in a state the next run re-derives and retries.
//!
//! In dry-run mode every external call and marker write is replaced by a log
//! line and treated as successful, so counters match a real run.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::{
    format_date, format_timestamp, ActionOutcome, AuditEvent, AuditSink, CreateKeyRequest,
    KeyAlgorithm, KeyManagementClient, KeyOutcome, KeyType, MarkerKind, MetadataStore, Phase,
    PolicyParameters, RolloverError, SigningKey, Zone,
};

/// Algorithm and keytype a new key should be created with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTarget {
    pub key_type: KeyType,
    pub algorithm: KeyAlgorithm,
}

impl KeyTarget {
    /// Mirror the zone's active key, falling back to policy defaults
    pub fn infer(policy: &PolicyParameters, keys: &[SigningKey]) -> Self {
        match keys.iter().find(|k| k.active) {
            Some(key) => Self {
                key_type: key.key_type(),
                algorithm: key.algorithm().unwrap_or_else(|| {
                    warn!(
                        "Key {} has unparseable content, using default algorithm {}",
                        key.id, policy.default_algorithm
                    );
                    policy.default_algorithm
                }),
            },
            None => Self {
                key_type: policy.default_keytype,
                algorithm: policy.default_algorithm,
            },
        }
    }
}

/// Group identity used when retiring superseded keys
type KeyGroup = (KeyType, Option<KeyAlgorithm>);

/// Active keys that completing a rollover deactivates: in every
/// (keytype, algorithm) group with two or more active members, all but the
/// highest id.
pub fn superseded_keys(keys: &[SigningKey]) -> Vec<i64> {
    let mut groups: BTreeMap<KeyGroup, Vec<i64>> = BTreeMap::new();
    for key in keys.iter().filter(|k| k.active) {
        groups
            .entry((key.key_type(), key.algorithm()))
            .or_default()
            .push(key.id);
    }

    let mut superseded = Vec::new();
    for ids in groups.values_mut() {
        if ids.len() < 2 {
            continue;
        }
        ids.sort_unstable();
        ids.pop();
        superseded.extend(ids.iter().copied());
    }
    superseded.sort_unstable();
    superseded
}

/// Executes phase actions for one zone at a time
pub struct RolloverEngine {
    policy: PolicyParameters,
    client: Arc<dyn KeyManagementClient>,
    metadata: Arc<dyn MetadataStore>,
    audit: Arc<dyn AuditSink>,
    dry_run: bool,
}

impl RolloverEngine {
    pub fn new(
        policy: PolicyParameters,
        client: Arc<dyn KeyManagementClient>,
        metadata: Arc<dyn MetadataStore>,
        audit: Arc<dyn AuditSink>,
        dry_run: bool,
    ) -> Self {
        Self {
            policy,
            client,
            metadata,
            audit,
            dry_run,
        }
    }

    pub fn policy(&self) -> &PolicyParameters {
        &self.policy
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run the action for `phase`
    pub async fn execute(
        &self,
        zone: &Zone,
        phase: Phase,
        keys: &[SigningKey],
        now: DateTime<Utc>,
    ) -> ActionOutcome {
        match phase {
            Phase::Uninitialized => self.baseline(zone, now).await,
            Phase::EligibleForInitiation => self.initiate(zone, keys, now).await,
            Phase::InHold { age_days, hold_days } => {
                debug!(
                    "Zone {} in hold, {} of {} days elapsed ({} remaining)",
                    zone.name,
                    age_days,
                    hold_days,
                    hold_days - age_days
                );
                ActionOutcome::Skipped
            }
            Phase::ReadyToComplete { .. } => self.complete(zone, keys, now).await,
            Phase::Stable => {
                debug!("Zone {} stable, nothing to do", zone.name);
                ActionOutcome::Skipped
            }
        }
    }

    /// First sighting of a zone: record today's date as its baseline
    async fn baseline(&self, zone: &Zone, now: DateTime<Utc>) -> ActionOutcome {
        let today = format_date(now.date_naive());
        match self.write_marker(zone, MarkerKind::Baseline, &today).await {
            Ok(()) => {
                info!("Zone {} baselined at {}", zone.name, today);
                ActionOutcome::Baselined
            }
            Err(e) => {
                warn!("Zone {}: failed to write baseline: {}", zone.name, e);
                ActionOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Interval elapsed: ask the server for a successor key
    async fn initiate(&self, zone: &Zone, keys: &[SigningKey], now: DateTime<Utc>) -> ActionOutcome {
        let target = KeyTarget::infer(&self.policy, keys);
        let request = CreateKeyRequest::new(target.key_type, &target.algorithm, self.policy.rsa_bits);

        let new_key_id = if self.dry_run {
            info!(
                "[dry-run] would create {} {} key{} for zone {}",
                target.key_type,
                target.algorithm,
                request.bits.map(|b| format!(" ({} bits)", b)).unwrap_or_default(),
                zone.name
            );
            None
        } else {
            match self.client.create_key(&zone.name, &request).await {
                Ok(descriptor) => Some(descriptor.id),
                Err(e) => {
                    warn!("Zone {}: key creation failed, will retry next run: {}", zone.name, e);
                    return ActionOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        };

        if let Err(e) = self
            .write_marker(zone, MarkerKind::RolloverStart, &format_timestamp(now))
            .await
        {
            error!(
                "Zone {}: key {:?} created but rollover start could not be recorded: {}",
                zone.name, new_key_id, e
            );
            return ActionOutcome::Failed {
                reason: e.to_string(),
            };
        }

        info!(
            "Zone {}: rollover initiated with new {} {} key {}",
            zone.name,
            target.key_type,
            target.algorithm,
            new_key_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string())
        );

        self.record_audit(AuditEvent::rollover_initiated(
            zone,
            target.key_type,
            &target.algorithm,
            new_key_id,
        ))
        .await;

        ActionOutcome::Initiated { new_key_id }
    }

    /// Hold elapsed: retire superseded keys and return the zone to idle
    async fn complete(&self, zone: &Zone, keys: &[SigningKey], now: DateTime<Utc>) -> ActionOutcome {
        let mut deactivations = Vec::new();
        for key_id in superseded_keys(keys) {
            deactivations.push(self.deactivate(zone, key_id).await);
        }

        let deactivated: Vec<i64> = deactivations
            .iter()
            .filter(|d| d.outcome.is_success())
            .map(|d| d.key_id)
            .collect();

        if let Err(e) = self.finish_rollover(zone, &deactivated, now).await {
            error!(
                "Zone {}: keys {:?} deactivated but markers could not be updated: {}",
                zone.name, deactivated, e
            );
            return ActionOutcome::Failed {
                reason: e.to_string(),
            };
        }

        info!(
            "Zone {}: rollover completed, deactivated {:?}",
            zone.name, deactivated
        );

        self.record_audit(AuditEvent::rollover_completed(zone, &deactivated))
            .await;

        ActionOutcome::Completed { deactivations }
    }

    async fn deactivate(&self, zone: &Zone, key_id: i64) -> KeyOutcome {
        if self.dry_run {
            info!("[dry-run] would deactivate key {} in zone {}", key_id, zone.name);
            return KeyOutcome::succeeded(key_id);
        }

        match self.client.set_key_active(&zone.name, key_id, false).await {
            Ok(()) => {
                debug!("Deactivated key {} in zone {}", key_id, zone.name);
                KeyOutcome::succeeded(key_id)
            }
            Err(e) => {
                warn!("Zone {}: failed to deactivate key {}: {}", zone.name, key_id, e);
                KeyOutcome::failed(key_id, e.to_string())
            }
        }
    }

    async fn finish_rollover(
        &self,
        zone: &Zone,
        deactivated: &[i64],
        now: DateTime<Utc>,
    ) -> Result<(), RolloverError> {
        let stamp = format_timestamp(now);
        for key_id in deactivated {
            self.write_marker(zone, MarkerKind::Deactivated(*key_id), &stamp)
                .await?;
        }
        self.write_marker(zone, MarkerKind::Baseline, &format_date(now.date_naive()))
            .await?;
        self.clear_marker(zone, MarkerKind::RolloverStart).await
    }

    pub(crate) async fn write_marker(
        &self,
        zone: &Zone,
        kind: MarkerKind,
        value: &str,
    ) -> Result<(), RolloverError> {
        let key = kind.as_key();
        if self.dry_run {
            info!("[dry-run] would set {}={} on zone {}", key, value, zone.name);
            return Ok(());
        }
        self.metadata.set(zone.id, &key, value).await
    }

    pub(crate) async fn clear_marker(&self, zone: &Zone, kind: MarkerKind) -> Result<(), RolloverError> {
        let key = kind.as_key();
        if self.dry_run {
            info!("[dry-run] would clear {} on zone {}", key, zone.name);
            return Ok(());
        }
        self.metadata.delete(zone.id, &key).await
    }

    /// Append to the audit log; a failed append never undoes the action
    pub(crate) async fn record_audit(&self, event: AuditEvent) {
        if self.dry_run {
            debug!("[dry-run] would audit {} for {}", event.event_type, event.detail);
            return;
        }
        if let Err(e) = self.audit.append(&event).await {
            warn!("Failed to append audit entry {}: {}", event.event_type, e);
        }
    }

    pub(crate) fn client(&self) -> &dyn KeyManagementClient {
        self.client.as_ref()
    }

    pub(crate) fn metadata(&self) -> &dyn MetadataStore {
        self.metadata.as_ref()
    }
}
