use crate::event::ScanEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Latest known state of one tracked item.
///
/// Derived, never stored: recomputed from the event stream on demand. For a
/// snapshot time T this equals the item's maximum-order-key event with
/// `timestamp <= T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemState {
    pub item_id: String,
    pub current_step_rank: u32,
    pub current_step_name: String,
    pub last_seen: DateTime<Utc>,
}

impl ItemState {
    pub fn from_event(event: &ScanEvent) -> Self {
        Self {
            item_id: event.item_id.clone(),
            current_step_rank: event.step_rank,
            current_step_name: event.step_name.clone(),
            last_seen: event.timestamp,
        }
    }
}
