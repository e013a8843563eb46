//! Point-in-time statistics report assembly
//!
//! The aggregator owns the snapshot: it captures `as_of` once, fetches the
//! catalog and the event stream once, runs the projector exactly once, and
//! hands the identical snapshot to both analyzers so every figure in the
//! report is mutually consistent. A failed fetch aborts the whole report;
//! partial reports are never returned.

use crate::anomaly::{self, AnomalyReport, DetectorConfig};
use crate::projector;
use crate::store::{CatalogSource, EventStore};
use crate::throughput::{self, ThroughputReport};
use chrono::{DateTime, Duration, Utc};
use mes_core::{CatalogSkew, EngineError, ItemState, ScanEvent, StepCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Per-request report parameters
#[derive(Debug, Clone, Default)]
pub struct ReportOptions {
    /// Snapshot instant; defaults to the aggregator's clock at call time
    pub as_of: Option<DateTime<Utc>>,
    pub detector: DetectorConfig,
}

/// Headline figures for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalKpis {
    /// Items whose current step is not the terminal one
    pub items_in_progress: u64,
    /// Terminal-step events dated on as_of's UTC calendar day
    pub items_finished_today: u64,
    /// Idle anomalies only; duplicates and skips are informational
    pub active_alerts: u64,
    /// Mean terminal-step dwell (end-to-end cycle time)
    pub avg_processing_time_secs: f64,
}

/// One consistent snapshot of every derived statistic.
///
/// No persistent identity: recomputed from scratch per request and
/// discarded after serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsReport {
    pub as_of: DateTime<Utc>,
    pub idle_threshold_secs: i64,
    pub throughput: ThroughputReport,
    pub anomalies: AnomalyReport,
    pub global_kpis: GlobalKpis,
    /// Warning-level diagnostics; non-empty when events disagree with the
    /// step catalog (expected during step reconfiguration)
    pub catalog_warnings: Vec<CatalogSkew>,
}

pub struct StatisticsAggregator<'a> {
    store: &'a dyn EventStore,
    catalog: &'a dyn CatalogSource,
}

impl<'a> StatisticsAggregator<'a> {
    pub fn new(store: &'a dyn EventStore, catalog: &'a dyn CatalogSource) -> Self {
        Self { store, catalog }
    }

    /// Compute the full statistics report for one snapshot.
    pub fn report(&self, opts: &ReportOptions) -> Result<StatisticsReport, EngineError> {
        // Parameter validation happens before any data fetch
        if opts.detector.idle_threshold <= Duration::zero() {
            return Err(EngineError::InvalidParameter(format!(
                "idle threshold must be positive, got {}s",
                opts.detector.idle_threshold.num_seconds()
            )));
        }
        let as_of = self.resolve_as_of(opts.as_of)?;

        // One bounded fetch per collaborator, completed before any analysis
        let catalog = self.catalog.fetch_catalog()?;
        let events = self.store.fetch_events(as_of)?;

        // Projection runs exactly once; both analyzers share its output
        let item_states = projector::project(&events, as_of);
        let throughput = throughput::analyze(&events, &item_states, &catalog, as_of);
        let anomalies = anomaly::detect(&events, &item_states, &catalog, as_of, &opts.detector);
        let catalog_warnings = catalog_skew(&events, &catalog, as_of);

        let global_kpis = compute_kpis(&events, &item_states, &catalog, &throughput, &anomalies, as_of);

        Ok(StatisticsReport {
            as_of,
            idle_threshold_secs: opts.detector.idle_threshold.num_seconds(),
            throughput,
            anomalies,
            global_kpis,
            catalog_warnings,
        })
    }

    /// Latest-state-only view for "items currently in process" consumers.
    pub fn item_states(
        &self,
        as_of: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, ItemState>, EngineError> {
        let as_of = self.resolve_as_of(as_of)?;
        let events = self.store.fetch_events(as_of)?;
        Ok(projector::project(&events, as_of))
    }

    /// Capture the snapshot instant once; a future as_of is rejected against
    /// this aggregator's own clock reference
    fn resolve_as_of(&self, as_of: Option<DateTime<Utc>>) -> Result<DateTime<Utc>, EngineError> {
        let now = Utc::now();
        match as_of {
            Some(requested) if requested > now => Err(EngineError::InvalidParameter(format!(
                "as_of {} is in the future",
                requested.to_rfc3339()
            ))),
            Some(requested) => Ok(requested),
            None => Ok(now),
        }
    }
}

fn compute_kpis(
    events: &[ScanEvent],
    item_states: &HashMap<String, ItemState>,
    catalog: &StepCatalog,
    throughput: &ThroughputReport,
    anomalies: &AnomalyReport,
    as_of: DateTime<Utc>,
) -> GlobalKpis {
    let items_in_progress = item_states
        .values()
        .filter(|s| !catalog.is_terminal(s.current_step_rank))
        .count() as u64;

    let today = as_of.date_naive();
    let items_finished_today = match catalog.terminal_rank() {
        Some(terminal) => events
            .iter()
            .filter(|e| {
                e.step_rank == terminal && e.timestamp <= as_of && e.timestamp.date_naive() == today
            })
            .count() as u64,
        None => 0,
    };

    GlobalKpis {
        items_in_progress,
        items_finished_today,
        active_alerts: anomalies.idle_items.len() as u64,
        avg_processing_time_secs: throughput.avg_cycle_time_secs,
    }
}

/// Aggregate catalog disagreements by (rank, name) pair.
///
/// Emits one warning per distinct pair; the offending events stay in every
/// rank-only aggregate.
pub fn catalog_skew(
    events: &[ScanEvent],
    catalog: &StepCatalog,
    as_of: DateTime<Utc>,
) -> Vec<CatalogSkew> {
    let mut skew: HashMap<(u32, &str), u64> = HashMap::new();
    for event in events {
        if event.timestamp <= as_of && !catalog.agrees(event) {
            *skew
                .entry((event.step_rank, event.step_name.as_str()))
                .or_insert(0) += 1;
        }
    }

    let mut warnings: Vec<CatalogSkew> = skew
        .into_iter()
        .map(|((step_rank, step_name), events)| CatalogSkew {
            step_rank,
            step_name: step_name.to_string(),
            events,
        })
        .collect();
    warnings.sort_by(|a, b| {
        a.step_rank
            .cmp(&b.step_rank)
            .then_with(|| a.step_name.cmp(&b.step_name))
    });

    for warning in &warnings {
        tracing::warn!(
            step_rank = warning.step_rank,
            step_name = %warning.step_name,
            events = warning.events,
            "events disagree with step catalog; excluded from name-keyed aggregates"
        );
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryEventStore;
    use chrono::TimeZone;
    use mes_core::StepInfo;

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    fn catalog() -> StepCatalog {
        StepCatalog::new(
            (1..=8)
                .map(|rank| StepInfo {
                    rank,
                    name: format!("step{}", rank),
                    reader_type: None,
                })
                .collect(),
        )
    }

    fn make_event(item: &str, rank: u32, ts: DateTime<Utc>) -> ScanEvent {
        ScanEvent {
            item_id: item.to_string(),
            step_rank: rank,
            step_name: format!("step{}", rank),
            reader_id: None,
            operator: None,
            timestamp: ts,
            duration_secs: Some(60.0),
            seq: 0,
        }
    }

    struct FailingStore;

    impl EventStore for FailingStore {
        fn fetch_events(&self, _as_of: DateTime<Utc>) -> Result<Vec<ScanEvent>, EngineError> {
            Err(EngineError::SourceUnavailable("connection reset".to_string()))
        }
    }

    #[test]
    fn test_rejects_non_positive_idle_threshold() {
        let store = MemoryEventStore::new();
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        for secs in [0, -60] {
            let opts = ReportOptions {
                as_of: Some(base_time()),
                detector: DetectorConfig {
                    idle_threshold: Duration::seconds(secs),
                    ..Default::default()
                },
            };
            let err = aggregator.report(&opts).unwrap_err();
            assert!(matches!(err, EngineError::InvalidParameter(_)));
        }
    }

    #[test]
    fn test_rejects_future_as_of() {
        let store = MemoryEventStore::new();
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        let opts = ReportOptions {
            as_of: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        };
        let err = aggregator.report(&opts).unwrap_err();
        assert!(matches!(err, EngineError::InvalidParameter(_)));
    }

    #[test]
    fn test_store_failure_aborts_whole_report() {
        let store = FailingStore;
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        let err = aggregator
            .report(&ReportOptions {
                as_of: Some(base_time()),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(
            err,
            EngineError::SourceUnavailable("connection reset".to_string())
        );
    }

    #[test]
    fn test_kpis_consistent_with_item_states() {
        let t = base_time();
        let store = MemoryEventStore::with_events(vec![
            make_event("a", 2, t),
            make_event("b", 8, t + Duration::minutes(1)),
            make_event("c", 5, t + Duration::minutes(2)),
        ]);
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);
        let as_of = t + Duration::minutes(5);

        let report = aggregator
            .report(&ReportOptions {
                as_of: Some(as_of),
                ..Default::default()
            })
            .unwrap();

        let states = aggregator.item_states(Some(as_of)).unwrap();
        let in_progress = states
            .values()
            .filter(|s| s.current_step_rank != 8)
            .count() as u64;
        assert_eq!(report.global_kpis.items_in_progress, in_progress);
        assert_eq!(report.global_kpis.items_in_progress, 2);
    }

    #[test]
    fn test_finished_today_counts_terminal_events_on_as_of_date() {
        let t = base_time();
        let store = MemoryEventStore::with_events(vec![
            make_event("a", 8, t),
            make_event("b", 8, t - Duration::days(1)), // yesterday
            make_event("c", 4, t),
        ]);
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        let report = aggregator
            .report(&ReportOptions {
                as_of: Some(t + Duration::hours(2)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.global_kpis.items_finished_today, 1);
    }

    #[test]
    fn test_active_alerts_counts_idle_only() {
        let t = base_time();
        let store = MemoryEventStore::with_events(vec![
            // stuck item, plus a duplicate pair that must not count as alert
            make_event("stuck", 2, t),
            make_event("dup", 3, t + Duration::minutes(50)),
            make_event("dup", 3, t + Duration::minutes(55)),
        ]);
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        let report = aggregator
            .report(&ReportOptions {
                as_of: Some(t + Duration::minutes(56)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(report.anomalies.duplicate_scans.len(), 1);
        assert_eq!(report.global_kpis.active_alerts, 1); // only "stuck"
    }

    #[test]
    fn test_catalog_skew_becomes_warning_not_error() {
        let t = base_time();
        let mut skewed = make_event("a", 3, t);
        skewed.step_name = "old name".to_string();
        let store = MemoryEventStore::with_events(vec![skewed, make_event("b", 1, t)]);
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);

        let report = aggregator
            .report(&ReportOptions {
                as_of: Some(t + Duration::minutes(1)),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(report.catalog_warnings.len(), 1);
        assert_eq!(report.catalog_warnings[0].step_rank, 3);
        assert_eq!(report.catalog_warnings[0].events, 1);
        // The skewed event still counts in raw totals
        assert_eq!(report.throughput.total_events, 2);
    }

    #[test]
    fn test_report_is_deterministic() {
        let t = base_time();
        let store = MemoryEventStore::with_events(vec![
            make_event("a", 1, t),
            make_event("b", 3, t + Duration::minutes(2)),
            make_event("a", 2, t + Duration::minutes(4)),
        ]);
        let catalog = catalog();
        let aggregator = StatisticsAggregator::new(&store, &catalog);
        let opts = ReportOptions {
            as_of: Some(t + Duration::minutes(10)),
            ..Default::default()
        };

        let first = aggregator.report(&opts).unwrap();
        let second = aggregator.report(&opts).unwrap();
        assert_eq!(first, second);
    }
}
