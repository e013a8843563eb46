use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One RFID scan: a tracked item passed a process step.
///
/// Events are append-only and may arrive out of order; `timestamp` is the
/// source of truth for ordering, not insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanEvent {
    pub item_id: String,
    pub step_rank: u32,

    /// Denormalized for display; must agree with `step_rank` per the catalog
    pub step_name: String,

    /// Provenance (optional depending on reader)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    pub timestamp: DateTime<Utc>,

    /// Elapsed seconds attributed to the step, when the reader reports it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    /// Store-assigned insertion sequence; stable tie-break for equal timestamps
    #[serde(default)]
    pub seq: u64,
}

impl ScanEvent {
    pub fn order_key(&self) -> ScanOrderKey {
        ScanOrderKey {
            ts_ms: self.timestamp.timestamp_millis(),
            step_rank: self.step_rank,
            seq: self.seq,
        }
    }
}

/// Canonical ordering key for scan events
///
/// Total ordering: (timestamp, step_rank, seq). Two events with the same
/// timestamp order by step rank, so an equal-timestamp pair never reads as
/// backward movement; seq settles anything still tied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanOrderKey {
    /// Primary: timestamp (milliseconds since epoch)
    pub ts_ms: i64,
    /// Secondary: step rank (highest wins on timestamp ties)
    pub step_rank: u32,
    /// Tertiary: store insertion sequence
    pub seq: u64,
}

impl Ord for ScanOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ts_ms
            .cmp(&other.ts_ms)
            .then_with(|| self.step_rank.cmp(&other.step_rank))
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for ScanOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
