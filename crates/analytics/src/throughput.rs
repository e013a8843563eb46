//! Process throughput and cycle-time statistics
//!
//! All reductions here are total functions over possibly-empty inputs:
//! steps with no events report 0, never null.

use chrono::{DateTime, NaiveDate, Timelike, Utc};
use mes_core::{ItemState, ScanEvent, StepCatalog};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Items currently at a step (each item counted exactly once, at its
/// current step)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepCount {
    pub step_rank: u32,
    pub step_name: String,
    pub count: u64,
}

/// Mean dwell seconds over all events recorded at a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDwell {
    pub step_rank: u32,
    pub step_name: String,
    pub avg_dwell_secs: f64,
}

/// Events per UTC calendar date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
    /// One entry per catalog step, in rank order
    pub items_by_step: Vec<StepCount>,
    /// One entry per catalog step, in rank order
    pub avg_dwell_by_step: Vec<StepDwell>,
    /// Events by UTC hour-of-day, across all history (a distribution, not a trend)
    pub hourly_throughput: [u64; 24],
    /// Events by UTC calendar date, newest first
    pub daily_throughput: Vec<DailyCount>,
    /// Mean dwell over terminal-step events; 0 until any item finishes
    pub avg_cycle_time_secs: f64,
    /// Raw event count (includes catalog-skewed events)
    pub total_events: u64,
}

/// Compute throughput statistics over the snapshot.
///
/// `events` and `item_states` must come from the same snapshot; only events
/// with `timestamp <= as_of` are examined.
pub fn analyze(
    events: &[ScanEvent],
    item_states: &HashMap<String, ItemState>,
    catalog: &StepCatalog,
    as_of: DateTime<Utc>,
) -> ThroughputReport {
    let past: Vec<&ScanEvent> = events.iter().filter(|e| e.timestamp <= as_of).collect();

    // Current-state distribution: one bucket per catalog step
    let mut states_per_rank: HashMap<u32, u64> = HashMap::new();
    for state in item_states.values() {
        *states_per_rank.entry(state.current_step_rank).or_insert(0) += 1;
    }
    let items_by_step = catalog
        .steps()
        .iter()
        .map(|step| StepCount {
            step_rank: step.rank,
            step_name: step.name.clone(),
            count: states_per_rank.get(&step.rank).copied().unwrap_or(0),
        })
        .collect();

    // Dwell: sum/count per rank over ALL events at the rank, not just
    // current-state events; a missing duration contributes 0 to the sum
    // while the event still counts
    let mut dwell_per_rank: HashMap<u32, (f64, u64)> = HashMap::new();
    for event in &past {
        let entry = dwell_per_rank.entry(event.step_rank).or_insert((0.0, 0));
        entry.0 += event.duration_secs.unwrap_or(0.0);
        entry.1 += 1;
    }
    let avg_dwell_by_step = catalog
        .steps()
        .iter()
        .map(|step| {
            let avg = match dwell_per_rank.get(&step.rank) {
                Some((sum, count)) if *count > 0 => sum / *count as f64,
                _ => 0.0,
            };
            StepDwell {
                step_rank: step.rank,
                step_name: step.name.clone(),
                avg_dwell_secs: avg,
            }
        })
        .collect();

    let mut hourly_throughput = [0u64; 24];
    for event in &past {
        hourly_throughput[event.timestamp.hour() as usize] += 1;
    }

    let mut per_day: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for event in &past {
        *per_day.entry(event.timestamp.date_naive()).or_insert(0) += 1;
    }
    let daily_throughput = per_day
        .into_iter()
        .rev()
        .map(|(date, count)| DailyCount { date, count })
        .collect();

    let avg_cycle_time_secs = match catalog.terminal_rank() {
        Some(terminal) => {
            let (sum, count) = dwell_per_rank.get(&terminal).copied().unwrap_or((0.0, 0));
            if count > 0 {
                sum / count as f64
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    ThroughputReport {
        items_by_step,
        avg_dwell_by_step,
        hourly_throughput,
        daily_throughput,
        avg_cycle_time_secs,
        total_events: past.len() as u64,
    }
}
