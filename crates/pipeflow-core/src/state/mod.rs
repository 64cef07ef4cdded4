//! Estado de runs (`PipelineRunState`) y su persistencia.

pub mod store;
pub mod types;

pub use store::{InMemoryStateStore, JsonFileStateStore, RunStateStore};
pub use types::{PipelineRunState, RunStateDocument, RunStatus, SkipReason, StageRecord, StageState};
