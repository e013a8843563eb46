//! Latest-state projection
//!
//! Reduces the unordered event stream to one current-state record per
//! tracked item. An event replaces the running best for its item iff its
//! canonical order key (timestamp, step_rank, seq) is strictly greater, so
//! the outcome does not depend on delivery order.

use chrono::{DateTime, Utc};
use mes_core::{ItemState, ScanEvent};
use std::collections::HashMap;

/// Project the event stream onto per-item latest states as of `as_of`.
///
/// Single pass; events with `timestamp > as_of` are excluded. The result
/// holds exactly one entry per item observed at or before `as_of`; an item
/// with no events is simply absent, never an error. Pure function of its
/// inputs: no clock reads, no side effects.
pub fn project(events: &[ScanEvent], as_of: DateTime<Utc>) -> HashMap<String, ItemState> {
    let mut best: HashMap<&str, &ScanEvent> = HashMap::new();

    for event in events {
        if event.timestamp > as_of {
            continue;
        }
        match best.get(event.item_id.as_str()) {
            Some(current) if event.order_key() <= current.order_key() => {}
            _ => {
                best.insert(event.item_id.as_str(), event);
            }
        }
    }

    best.into_values()
        .map(|e| (e.item_id.clone(), ItemState::from_event(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 8, 0, 0).unwrap()
    }

    fn make_event(item: &str, rank: u32, ts: DateTime<Utc>, seq: u64) -> ScanEvent {
        ScanEvent {
            item_id: item.to_string(),
            step_rank: rank,
            step_name: format!("step{}", rank),
            reader_id: None,
            operator: None,
            timestamp: ts,
            duration_secs: None,
            seq,
        }
    }

    #[test]
    fn test_empty_input() {
        let states = project(&[], base_time());
        assert!(states.is_empty());
    }

    #[test]
    fn test_latest_timestamp_wins_regardless_of_input_order() {
        let t = base_time();
        // Deliberately out of order
        let events = vec![
            make_event("a", 2, t + Duration::minutes(10), 2),
            make_event("a", 1, t, 0),
            make_event("a", 3, t + Duration::minutes(20), 1),
        ];

        let states = project(&events, t + Duration::hours(1));
        assert_eq!(states.len(), 1);
        let a = &states["a"];
        assert_eq!(a.current_step_rank, 3);
        assert_eq!(a.last_seen, t + Duration::minutes(20));
    }

    #[test]
    fn test_future_events_excluded() {
        let t = base_time();
        let events = vec![
            make_event("a", 1, t, 0),
            make_event("a", 2, t + Duration::minutes(30), 1),
        ];

        let states = project(&events, t + Duration::minutes(10));
        assert_eq!(states["a"].current_step_rank, 1);

        // The same item advances once the snapshot covers the later event
        let states = project(&events, t + Duration::minutes(30));
        assert_eq!(states["a"].current_step_rank, 2);
    }

    #[test]
    fn test_equal_timestamp_higher_rank_wins() {
        let t = base_time();
        // A regression written with an identical timestamp must not win,
        // whichever side the seq assignment lands on
        let events = vec![
            make_event("a", 4, t, 0),
            make_event("a", 2, t, 1),
        ];
        let states = project(&events, t + Duration::minutes(1));
        assert_eq!(states["a"].current_step_rank, 4);

        let events = vec![
            make_event("a", 2, t, 0),
            make_event("a", 4, t, 1),
        ];
        let states = project(&events, t + Duration::minutes(1));
        assert_eq!(states["a"].current_step_rank, 4);
    }

    #[test]
    fn test_equal_timestamp_and_rank_higher_seq_wins() {
        let t = base_time();
        let mut first = make_event("a", 2, t, 0);
        first.step_name = "step2 (old label)".to_string();
        let second = make_event("a", 2, t, 1);

        let as_of = t + Duration::minutes(1);
        let forward = project(&[first.clone(), second.clone()], as_of);
        let reversed = project(&[second, first], as_of);

        // seq settles the tie, so delivery order cannot change the winner
        assert_eq!(forward["a"].current_step_name, "step2");
        assert_eq!(forward, reversed);
    }

    #[test]
    fn test_idempotent() {
        let t = base_time();
        let events = vec![
            make_event("a", 1, t, 0),
            make_event("b", 2, t + Duration::minutes(5), 1),
            make_event("a", 2, t + Duration::minutes(8), 2),
        ];
        let as_of = t + Duration::minutes(10);

        let first = project(&events, as_of);
        let second = project(&events, as_of);
        assert_eq!(first, second);
    }

    #[test]
    fn test_monotonic_snapshot() {
        let t = base_time();
        let events = vec![
            make_event("a", 1, t, 0),
            make_event("a", 2, t + Duration::minutes(10), 1),
            make_event("b", 1, t + Duration::minutes(5), 2),
        ];

        let t1 = t + Duration::minutes(6);
        let t2 = t + Duration::minutes(30);
        let early = project(&events, t1);
        let late = project(&events, t2);

        for (item_id, state) in &early {
            let later = late.get(item_id).expect("item vanished from later snapshot");
            assert!(later.current_step_rank >= state.current_step_rank);
        }
    }
}
