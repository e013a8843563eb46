pub mod catalog;
pub mod error;
pub mod event;
pub mod state;

pub use catalog::{StepCatalog, StepInfo};
pub use error::{CatalogSkew, EngineError};
pub use event::{ScanEvent, ScanOrderKey};
pub use state::ItemState;
