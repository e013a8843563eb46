//! Event-log analytics for the RFID tracking backend
//!
//! Consumes the append-only scan-event stream and derives, per request:
//! - the current state of every tracked item (latest-state projection)
//! - per-step throughput and dwell statistics
//! - anomaly detections (idle items, skipped steps, duplicate scans)
//!
//! ## Architecture
//!
//! ```text
//!  ┌─────────────┐     ┌───────────────┐
//!  │ EventStore  │     │ CatalogSource │      (collaborators, read-only)
//!  └──────┬──────┘     └───────┬───────┘
//!         │ ScanEvents         │ StepCatalog
//!         └─────────┬──────────┘
//!                   ▼
//!         ┌──────────────────┐
//!         │    Aggregator    │  captures as_of once, fetches once
//!         └────────┬─────────┘
//!                  │ snapshot
//!         ┌────────┴─────────┐
//!         ▼                  ▼
//!  ┌─────────────┐    ┌─────────────┐
//!  │  Projector  │──▶ │  Analyzers  │   (throughput + anomaly,
//!  │ (ItemState) │    │             │    pure over the snapshot)
//!  └─────────────┘    └──────┬──────┘
//!                            ▼
//!                   StatisticsReport
//! ```
//!
//! The engine is request-scoped and stateless between requests: nothing is
//! cached, every report recomputes from the collaborators' current data.

pub mod aggregator;
pub mod anomaly;
pub mod projector;
pub mod store;
pub mod throughput;

pub use aggregator::{
    GlobalKpis, ReportOptions, StatisticsAggregator, StatisticsReport,
};
pub use anomaly::{
    detect, AnomalyReport, DetectorConfig, DuplicateScan, IdleItem, SkippedTransition,
};
pub use projector::project;
pub use store::{CatalogSource, EventStore, MemoryEventStore};
pub use throughput::{analyze, DailyCount, StepCount, StepDwell, ThroughputReport};
