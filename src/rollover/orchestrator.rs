//! Rollover Invocation
//!
//! One scheduled pass: enumerate zones with an active key, then for each zone
//! decide its phase, execute the action and sweep expired keys. Zones are
//! processed strictly one after another; a failure in one zone is recorded
//! and the pass moves on.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    ActionOutcome, CleanupReport, CleanupSweep, KeyInventory, Phase, RolloverEngine, RolloverError,
    RolloverMetadata, RunSummary, Zone, ZoneReport,
};

/// Result of a complete invocation
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub summary: RunSummary,
    pub zones: Vec<ZoneReport>,
}

/// Drives all candidate zones through the rollover lifecycle
pub struct RolloverOrchestrator {
    engine: RolloverEngine,
    inventory: Arc<dyn KeyInventory>,
    zone_filter: Vec<String>,
}

fn normalize_zone(name: &str) -> String {
    name.trim().trim_end_matches('.').to_lowercase()
}

impl RolloverOrchestrator {
    pub fn new(engine: RolloverEngine, inventory: Arc<dyn KeyInventory>) -> Self {
        Self {
            engine,
            inventory,
            zone_filter: Vec::new(),
        }
    }

    /// Restrict the pass to the named zones
    pub fn with_zone_filter(mut self, zones: Vec<String>) -> Self {
        self.zone_filter = zones.iter().map(|z| normalize_zone(z)).collect();
        self
    }

    fn selected(&self, zone: &Zone) -> bool {
        self.zone_filter.is_empty() || self.zone_filter.contains(&normalize_zone(&zone.name))
    }

    /// Process every candidate zone.
    ///
    /// Only a failure to enumerate zones is returned as an error; everything
    /// after that is reported per zone.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, RolloverError> {
        let zones: Vec<Zone> = self
            .inventory
            .zones_with_active_keys()
            .await?
            .into_iter()
            .filter(|z| self.selected(z))
            .collect();

        info!(
            "Rollover pass over {} zone(s){}",
            zones.len(),
            if self.engine.is_dry_run() { " [dry-run]" } else { "" }
        );

        let mut report = RunReport::default();
        for zone in zones {
            let zone_report = self.process_zone(&zone, now).await;
            report.summary.record(&zone_report);

            if let Ok(json) = serde_json::to_string(&zone_report) {
                debug!("Zone report: {}", json);
            }
            report.zones.push(zone_report);
        }

        Ok(report)
    }

    /// Decide, act and sweep for one zone
    pub async fn process_zone(&self, zone: &Zone, now: DateTime<Utc>) -> ZoneReport {
        let (phase, action) = self.decide_and_act(zone, now).await;

        let cleanup = match self.inventory.list_keys(zone.id).await {
            Ok(keys) => CleanupSweep::new(&self.engine).run(zone, &keys, now).await,
            Err(e) => {
                warn!("Zone {}: cannot list keys for cleanup: {}", zone.name, e);
                CleanupReport {
                    deletions: Vec::new(),
                    errors: vec![e.to_string()],
                }
            }
        };

        ZoneReport {
            zone: zone.clone(),
            phase,
            action,
            cleanup,
        }
    }

    async fn decide_and_act(&self, zone: &Zone, now: DateTime<Utc>) -> (Option<Phase>, ActionOutcome) {
        let keys = match self.inventory.list_keys(zone.id).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Zone {}: cannot list keys: {}", zone.name, e);
                return (
                    None,
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let metadata = match RolloverMetadata::load(self.engine.metadata(), zone.id).await {
            Ok(metadata) => metadata,
            Err(RolloverError::DataError(reason)) => {
                warn!(
                    "Zone {}: skipping decision, rollover markers unreadable: {}",
                    zone.name, reason
                );
                return (None, ActionOutcome::DataError { reason });
            }
            Err(e) => {
                warn!("Zone {}: cannot read rollover markers: {}", zone.name, e);
                return (
                    None,
                    ActionOutcome::Failed {
                        reason: e.to_string(),
                    },
                );
            }
        };

        let phase = Phase::decide(self.engine.policy(), now, &metadata, &keys);
        debug!(
            "Zone {}: phase {} ({} keys, {} active)",
            zone.name,
            phase,
            keys.len(),
            keys.iter().filter(|k| k.active).count()
        );

        let action = self.engine.execute(zone, phase, &keys, now).await;
        (Some(phase), action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollover::test_support::Harness;
    use crate::rollover::{format_date, format_timestamp, MarkerKind};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 15, 3, 0, 0).unwrap()
    }

    fn orchestrator(h: &Harness, dry_run: bool) -> RolloverOrchestrator {
        RolloverOrchestrator::new(h.engine(dry_run), Arc::new(h.store.clone()))
    }

    #[test]
    fn test_normalize_zone() {
        assert_eq!(normalize_zone("Example.COM."), "example.com");
        assert_eq!(normalize_zone(" example.com "), "example.com");
    }

    #[tokio::test]
    async fn test_no_zones_is_clean_run() {
        let h = Harness::new().await;
        let report = orchestrator(&h, false).run(now()).await.unwrap();
        assert_eq!(report.summary, RunSummary::default());
        assert!(report.zones.is_empty());
    }

    #[tokio::test]
    async fn test_zones_without_active_keys_skipped() {
        let h = Harness::new().await;
        let zone = h.zone("retired.org").await;
        h.store.insert_key(zone.id, 257, false, "257 3 13 OLD").await.unwrap();

        let report = orchestrator(&h, false).run(now()).await.unwrap();
        assert!(report.zones.is_empty());
        assert!(h.marker(&zone, MarkerKind::Baseline).await.is_none());
    }

    #[tokio::test]
    async fn test_first_run_baselines_every_zone() {
        let h = Harness::new().await;
        for name in ["a.com", "b.com"] {
            let zone = h.zone(name).await;
            h.store.insert_key(zone.id, 257, true, "257 3 13 K").await.unwrap();
        }

        let report = orchestrator(&h, false).run(now()).await.unwrap();
        assert_eq!(report.summary.baselined, 2);
        assert_eq!(h.client.calls(), 0);
        assert!(report.zones.iter().all(|z| z.phase == Some(Phase::Uninitialized)));
    }

    #[tokio::test]
    async fn test_data_error_isolated_to_zone() {
        let h = Harness::new().await;
        let bad = h.zone("bad.com").await;
        let good = h.zone("good.com").await;
        for zone in [&bad, &good] {
            h.store.insert_key(zone.id, 257, true, "257 3 13 K").await.unwrap();
        }
        h.set_marker(&bad, MarkerKind::Baseline, "not-a-date").await;

        let report = orchestrator(&h, false).run(now()).await.unwrap();

        assert!(matches!(report.zones[0].action, ActionOutcome::DataError { .. }));
        assert_eq!(report.zones[1].action, ActionOutcome::Baselined);
        assert_eq!(report.summary.baselined, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(
            h.marker(&bad, MarkerKind::Baseline).await.as_deref(),
            Some("not-a-date")
        );
    }

    #[tokio::test]
    async fn test_cleanup_runs_despite_data_error() {
        let h = Harness::new().await;
        let zone = h.zone("example.com").await;
        h.store.insert_key(zone.id, 257, true, "257 3 13 NEW").await.unwrap();
        let old = h.store.insert_key(zone.id, 257, false, "257 3 13 OLD").await.unwrap();
        h.set_marker(&zone, MarkerKind::RolloverStart, "garbage").await;
        h.set_marker(
            &zone,
            MarkerKind::Deactivated(old),
            &format_timestamp(now() - Duration::days(30)),
        )
        .await;

        let report = orchestrator(&h, false).run(now()).await.unwrap();

        assert_eq!(report.summary.deleted, 1);
        assert_eq!(h.keys(&zone).await.len(), 1);
    }

    #[tokio::test]
    async fn test_zone_filter() {
        let h = Harness::new().await;
        let a = h.zone("a.com").await;
        let b = h.zone("b.com").await;
        for zone in [&a, &b] {
            h.store.insert_key(zone.id, 257, true, "257 3 13 K").await.unwrap();
        }

        let report = orchestrator(&h, false)
            .with_zone_filter(vec!["B.com.".to_string()])
            .run(now())
            .await
            .unwrap();

        assert_eq!(report.zones.len(), 1);
        assert_eq!(report.zones[0].zone.name, "b.com");
        assert!(h.marker(&a, MarkerKind::Baseline).await.is_none());
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let h = Harness::new().await;
        let zone = h.zone("example.com").await;
        let original = h.store.insert_key(zone.id, 257, true, "257 3 13 ORIG").await.unwrap();
        let orch = orchestrator(&h, false);

        // Day 0: baseline
        let start = now();
        orch.run(start).await.unwrap();
        assert_eq!(
            h.marker(&zone, MarkerKind::Baseline).await,
            Some(format_date(start.date_naive()))
        );

        // Day 90: initiate
        let day90 = start + Duration::days(90);
        let report = orch.run(day90).await.unwrap();
        assert_eq!(report.summary.initiated, 1);
        assert_eq!(h.keys(&zone).await.iter().filter(|k| k.active).count(), 2);

        // Day 93: hold
        let report = orch.run(day90 + Duration::days(3)).await.unwrap();
        assert_eq!(report.summary.skipped, 1);

        // Day 97: complete
        let day97 = day90 + Duration::days(7);
        let report = orch.run(day97).await.unwrap();
        assert_eq!(report.summary.completed, 1);
        let keys = h.keys(&zone).await;
        assert!(!keys.iter().find(|k| k.id == original).unwrap().active);
        assert_eq!(keys.iter().filter(|k| k.active).count(), 1);

        // Day 104: cleanup
        let report = orch.run(day97 + Duration::days(7)).await.unwrap();
        assert_eq!(report.summary.deleted, 1);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(h.keys(&zone).await.len(), 1);
    }
}
