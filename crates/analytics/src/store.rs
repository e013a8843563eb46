//! Collaborator traits for the event log and step catalog.
//!
//! The engine never owns events: it issues one bounded fetch per report
//! computation and works on the returned snapshot. Ordering is not part of
//! the fetch contract; networked readers write out of order.

use chrono::{DateTime, Utc};
use mes_core::{EngineError, ScanEvent, StepCatalog};
use std::sync::Mutex;

/// Read access to the append-only scan-event collection
pub trait EventStore: Send + Sync {
    /// Fetch all events with `timestamp <= as_of`, in no guaranteed order
    fn fetch_events(&self, as_of: DateTime<Utc>) -> Result<Vec<ScanEvent>, EngineError>;

    /// One item's history up to `as_of`, ascending by canonical order
    fn fetch_item_events(
        &self,
        item_id: &str,
        as_of: DateTime<Utc>,
    ) -> Result<Vec<ScanEvent>, EngineError> {
        let mut events: Vec<ScanEvent> = self
            .fetch_events(as_of)?
            .into_iter()
            .filter(|e| e.item_id == item_id)
            .collect();
        events.sort_by_key(ScanEvent::order_key);
        Ok(events)
    }
}

/// Read access to the ordered process-step catalog
pub trait CatalogSource: Send + Sync {
    fn fetch_catalog(&self) -> Result<StepCatalog, EngineError>;
}

impl CatalogSource for StepCatalog {
    fn fetch_catalog(&self) -> Result<StepCatalog, EngineError> {
        Ok(self.clone())
    }
}

/// In-memory event store for tests and local development.
///
/// Assigns the insertion sequence on append, like the real store does.
pub struct MemoryEventStore {
    events: Mutex<Vec<ScanEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Seed a store; each event's `seq` is overwritten with its position
    pub fn with_events(events: Vec<ScanEvent>) -> Self {
        let store = Self::new();
        for event in events {
            store.append(event);
        }
        store
    }

    /// Append one event, assigning the next insertion sequence. Returns the
    /// assigned seq.
    pub fn append(&self, mut event: ScanEvent) -> u64 {
        let mut guard = self.events.lock().unwrap();
        let seq = guard.len() as u64;
        event.seq = seq;
        guard.push(event);
        seq
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().unwrap().is_empty()
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EventStore for MemoryEventStore {
    fn fetch_events(&self, as_of: DateTime<Utc>) -> Result<Vec<ScanEvent>, EngineError> {
        let guard = self.events.lock().unwrap();
        Ok(guard
            .iter()
            .filter(|e| e.timestamp <= as_of)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_event(item: &str, rank: u32, ts: DateTime<Utc>) -> ScanEvent {
        ScanEvent {
            item_id: item.to_string(),
            step_rank: rank,
            step_name: format!("step{}", rank),
            reader_id: None,
            operator: None,
            timestamp: ts,
            duration_secs: None,
            seq: 0,
        }
    }

    #[test]
    fn test_append_assigns_seq() {
        let store = MemoryEventStore::new();
        let t = Utc::now();
        assert_eq!(store.append(make_event("a", 1, t)), 0);
        assert_eq!(store.append(make_event("b", 1, t)), 1);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_fetch_excludes_future_events() {
        let t = Utc::now();
        let store = MemoryEventStore::with_events(vec![
            make_event("a", 1, t - Duration::minutes(5)),
            make_event("a", 2, t + Duration::minutes(5)),
        ]);

        let events = store.fetch_events(t).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step_rank, 1);
    }

    #[test]
    fn test_item_history_sorted_ascending() {
        let t = Utc::now();
        let store = MemoryEventStore::with_events(vec![
            make_event("a", 3, t),
            make_event("b", 1, t - Duration::minutes(20)),
            make_event("a", 1, t - Duration::minutes(30)),
            make_event("a", 2, t - Duration::minutes(10)),
        ]);

        let history = store.fetch_item_events("a", t).unwrap();
        let ranks: Vec<u32> = history.iter().map(|e| e.step_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }
}
