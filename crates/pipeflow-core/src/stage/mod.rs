//! Definición de stages: trait de lógica, resultado y nodo del DAG.

pub mod definition;
pub mod run_result;
pub mod spec;

pub use definition::{Stage, StageKind};
pub use run_result::StageResult;
pub use spec::StageSpec;
