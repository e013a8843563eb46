//! Anomaly detection over the event stream and the projected states
//!
//! Three independent views:
//! - idle items: state unchanged past a threshold, terminal step excluded
//! - skipped transitions: consecutive-pair rank jumps, aggregated by step pair
//! - duplicate scans: repeated events for one (item, step)
//!
//! A step-to-same-step transition is a skip of distance 0 and is counted
//! both as a skip and as a duplicate; the views stay independent.

use chrono::{DateTime, Duration, Utc};
use mes_core::{ItemState, ScanEvent, StepCatalog};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Detection thresholds, passed explicitly into each computation (never
/// read from process-wide state)
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Minimum time without advancement before a non-terminal item is idle
    pub idle_threshold: Duration,
    /// List cap for skipped-transition and duplicate-scan rankings
    pub top_n: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::minutes(15),
            top_n: 10,
        }
    }
}

/// A non-terminal item that has not advanced for at least the threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdleItem {
    pub item_id: String,
    pub step_name: String,
    pub last_seen: DateTime<Utc>,
    pub idle_secs: i64,
}

/// A consecutive-event step pair whose ranks are not adjacent-increasing,
/// aggregated across all items
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTransition {
    pub from_step: String,
    pub to_step: String,
    pub count: u64,
}

/// An item scanned two or more times at the same step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateScan {
    pub item_id: String,
    pub step_rank: u32,
    pub step_name: String,
    pub count: u64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    /// Most-stuck first
    pub idle_items: Vec<IdleItem>,
    /// Most frequent first, capped at top_n
    pub skipped_transitions: Vec<SkippedTransition>,
    /// Highest count first, capped at top_n
    pub duplicate_scans: Vec<DuplicateScan>,
}

/// Run all three detectors over the snapshot.
///
/// Only events with `timestamp <= as_of` are examined; future-dated events
/// never influence any anomaly. A malformed field (missing duration) never
/// drops an event. Total over empty inputs.
pub fn detect(
    events: &[ScanEvent],
    item_states: &HashMap<String, ItemState>,
    catalog: &StepCatalog,
    as_of: DateTime<Utc>,
    config: &DetectorConfig,
) -> AnomalyReport {
    let past: Vec<&ScanEvent> = events.iter().filter(|e| e.timestamp <= as_of).collect();

    AnomalyReport {
        idle_items: detect_idle(item_states, catalog, as_of, config),
        skipped_transitions: detect_skips(&past, catalog, config),
        duplicate_scans: detect_duplicates(&past, catalog, config),
    }
}

fn detect_idle(
    item_states: &HashMap<String, ItemState>,
    catalog: &StepCatalog,
    as_of: DateTime<Utc>,
    config: &DetectorConfig,
) -> Vec<IdleItem> {
    let mut idle: Vec<IdleItem> = item_states
        .values()
        .filter(|state| !catalog.is_terminal(state.current_step_rank))
        .filter_map(|state| {
            let elapsed = as_of.signed_duration_since(state.last_seen);
            if elapsed >= config.idle_threshold {
                Some(IdleItem {
                    item_id: state.item_id.clone(),
                    step_name: state.current_step_name.clone(),
                    last_seen: state.last_seen,
                    idle_secs: elapsed.num_seconds(),
                })
            } else {
                None
            }
        })
        .collect();

    idle.sort_by(|a, b| {
        b.idle_secs
            .cmp(&a.idle_secs)
            .then_with(|| a.item_id.cmp(&b.item_id))
    });
    idle
}

fn detect_skips(
    past: &[&ScanEvent],
    catalog: &StepCatalog,
    config: &DetectorConfig,
) -> Vec<SkippedTransition> {
    // Per-item sequences in canonical order; consecutive pairs are only
    // meaningful on the sorted stream
    let mut per_item: HashMap<&str, Vec<&ScanEvent>> = HashMap::new();
    for &event in past {
        per_item.entry(event.item_id.as_str()).or_default().push(event);
    }

    let mut pairs: HashMap<(String, String), u64> = HashMap::new();
    for sequence in per_item.values_mut() {
        sequence.sort_by_key(|e| e.order_key());
        for window in sequence.windows(2) {
            let (prev, next) = (window[0], window[1]);
            if next.step_rank == prev.step_rank + 1 {
                continue;
            }
            // Name-keyed aggregate: catalog-skewed events are excluded here
            // (they stay in rank-only figures and surface as warnings)
            let (Some(from), Some(to)) = (catalog_name(catalog, prev), catalog_name(catalog, next))
            else {
                continue;
            };
            *pairs.entry((from.to_string(), to.to_string())).or_insert(0) += 1;
        }
    }

    let mut skips: Vec<SkippedTransition> = pairs
        .into_iter()
        .map(|((from_step, to_step), count)| SkippedTransition {
            from_step,
            to_step,
            count,
        })
        .collect();
    skips.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.from_step.cmp(&b.from_step))
            .then_with(|| a.to_step.cmp(&b.to_step))
    });
    skips.truncate(config.top_n);
    skips
}

fn detect_duplicates(
    past: &[&ScanEvent],
    catalog: &StepCatalog,
    config: &DetectorConfig,
) -> Vec<DuplicateScan> {
    struct Group<'a> {
        count: u64,
        first_seen: DateTime<Utc>,
        last_seen: DateTime<Utc>,
        step_name: &'a str,
    }

    let mut groups: HashMap<(&str, u32), Group> = HashMap::new();
    for &event in past {
        let entry = groups
            .entry((event.item_id.as_str(), event.step_rank))
            .or_insert(Group {
                count: 0,
                first_seen: event.timestamp,
                last_seen: event.timestamp,
                step_name: &event.step_name,
            });
        entry.count += 1;
        entry.first_seen = entry.first_seen.min(event.timestamp);
        entry.last_seen = entry.last_seen.max(event.timestamp);
    }

    let mut duplicates: Vec<DuplicateScan> = groups
        .into_iter()
        .filter(|(_, group)| group.count > 1)
        .map(|((item_id, step_rank), group)| DuplicateScan {
            item_id: item_id.to_string(),
            step_rank,
            // Rank-keyed aggregate; the catalog name is display only
            step_name: catalog
                .name_of(step_rank)
                .unwrap_or(group.step_name)
                .to_string(),
            count: group.count,
            first_seen: group.first_seen,
            last_seen: group.last_seen,
        })
        .collect();

    duplicates.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.item_id.cmp(&b.item_id))
            .then_with(|| a.step_rank.cmp(&b.step_rank))
    });
    duplicates.truncate(config.top_n);
    duplicates
}

/// Catalog name for an event, None when the catalog has no such rank or the
/// event's denormalized name disagrees with it
fn catalog_name<'a>(catalog: &'a StepCatalog, event: &ScanEvent) -> Option<&'a str> {
    match catalog.name_of(event.step_rank) {
        Some(name) if name == event.step_name => Some(name),
        _ => None,
    }
}
