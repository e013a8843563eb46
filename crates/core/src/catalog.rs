use crate::event::ScanEvent;
use serde::{Deserialize, Serialize};

/// One process step in the canonical ordered sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub rank: u32,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_type: Option<String>,
}

/// Ordered list of named process steps.
///
/// Ranks are unique and sorted ascending; the terminal step is the one with
/// the highest rank. The catalog is fetched per report computation and passed
/// down explicitly, never read from process-wide state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCatalog {
    steps: Vec<StepInfo>,
}

impl StepCatalog {
    /// Build a catalog from unordered steps. Sorts by rank; on duplicate
    /// ranks the first occurrence wins.
    pub fn new(mut steps: Vec<StepInfo>) -> Self {
        steps.sort_by_key(|s| s.rank);
        steps.dedup_by_key(|s| s.rank);
        Self { steps }
    }

    /// The eight-step textile process used to seed fresh deployments
    pub fn textile_default() -> Self {
        let steps = [
            (1, "Collection & Intake", "Portal Reader"),
            (2, "Automated Sorting", "Overhead Array"),
            (3, "Pre-treatment", "Handheld Scanner"),
            (4, "Wash Processing", "Tunnel Reader"),
            (5, "Thermal Drying", "Exit Scanner"),
            (6, "Quality Assurance", "Mobile Reader"),
            (7, "Packaging & Dispatch", "Portal Reader"),
            (8, "Delivery & Confirmation", "Mobile Scanner"),
        ];
        Self::new(
            steps
                .iter()
                .map(|(rank, name, reader)| StepInfo {
                    rank: *rank,
                    name: name.to_string(),
                    reader_type: Some(reader.to_string()),
                })
                .collect(),
        )
    }

    pub fn steps(&self) -> &[StepInfo] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Canonical name for a rank, if the catalog knows it
    pub fn name_of(&self, rank: u32) -> Option<&str> {
        self.steps
            .iter()
            .find(|s| s.rank == rank)
            .map(|s| s.name.as_str())
    }

    /// The terminal (highest) rank; None for an empty catalog
    pub fn terminal_rank(&self) -> Option<u32> {
        self.steps.last().map(|s| s.rank)
    }

    pub fn is_terminal(&self, rank: u32) -> bool {
        self.terminal_rank() == Some(rank)
    }

    /// Whether an event's denormalized (rank, name) pair matches the catalog
    pub fn agrees(&self, event: &ScanEvent) -> bool {
        self.name_of(event.step_rank) == Some(event.step_name.as_str())
    }
}
