//! Deactivated Key Cleanup
//!
//! Deletes keys this engine deactivated once their grace period has passed.
//! Only keys carrying a deactivation marker are considered; inactive keys
//! without one were retired by someone else and are left alone.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use super::{
    whole_days_since, AuditEvent, CleanupReport, DeactivationMarker, KeyOutcome, MarkerKind,
    RolloverEngine, RolloverMetadata, SigningKey, Zone,
};

/// Grace-period sweep over one zone's inactive keys
pub struct CleanupSweep<'a> {
    engine: &'a RolloverEngine,
}

impl<'a> CleanupSweep<'a> {
    pub fn new(engine: &'a RolloverEngine) -> Self {
        Self { engine }
    }

    /// Sweep a zone. `keys` must be the zone's current key list.
    pub async fn run(&self, zone: &Zone, keys: &[SigningKey], now: DateTime<Utc>) -> CleanupReport {
        let mut report = CleanupReport::default();
        let grace_days = self.engine.policy().deletion_grace_days;

        let markers =
            match RolloverMetadata::load_deactivations(self.engine.metadata(), zone.id, keys).await {
                Ok(markers) => markers,
                Err(e) => {
                    warn!("Zone {}: cannot read deactivation markers: {}", zone.name, e);
                    report.errors.push(e.to_string());
                    return report;
                }
            };

        for (key_id, marker) in markers {
            let deactivated_at = match marker {
                DeactivationMarker::At(at) => at,
                DeactivationMarker::Unreadable(raw) => {
                    warn!(
                        "Zone {}: unreadable deactivation marker {:?} for key {}, skipping",
                        zone.name, raw, key_id
                    );
                    report
                        .errors
                        .push(format!("key {}: unreadable deactivation marker", key_id));
                    continue;
                }
            };

            let age_days = whole_days_since(deactivated_at, now);
            if age_days < grace_days {
                debug!(
                    "Zone {}: key {} deactivated {} days ago, grace is {} days",
                    zone.name, key_id, age_days, grace_days
                );
                continue;
            }

            report
                .deletions
                .push(self.delete(zone, key_id, age_days).await);
        }

        report
    }

    async fn delete(&self, zone: &Zone, key_id: i64, age_days: i64) -> KeyOutcome {
        if self.engine.is_dry_run() {
            info!(
                "[dry-run] would delete key {} in zone {} (deactivated {} days ago)",
                key_id, zone.name, age_days
            );
        } else if let Err(e) = self.engine.client().delete_key(&zone.name, key_id).await {
            warn!(
                "Zone {}: failed to delete key {}, will retry next run: {}",
                zone.name, key_id, e
            );
            return KeyOutcome::failed(key_id, e.to_string());
        }

        if let Err(e) = self
            .engine
            .clear_marker(zone, MarkerKind::Deactivated(key_id))
            .await
        {
            warn!(
                "Zone {}: key {} deleted but its marker could not be cleared: {}",
                zone.name, key_id, e
            );
        }

        info!(
            "Zone {}: deleted key {} (deactivated {} days ago)",
            zone.name, key_id, age_days
        );

        self.engine
            .record_audit(AuditEvent::key_deleted(zone, key_id, age_days))
            .await;

        KeyOutcome::succeeded(key_id)
    }
}
