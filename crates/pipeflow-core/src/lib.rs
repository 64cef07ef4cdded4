//! pipeflow-core: motor DAG con memoización por fingerprint.
//!
//! Un stage sólo se ejecuta si no existe un artifact válido con el mismo
//! fingerprint (datos + código + config). Las salidas se escriben con
//! write-then-rename y se confirman en el registry en una transacción.
pub mod cancel;
pub mod constants;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod fingerprint;
pub mod hashing;
pub mod model;
pub mod registry;
pub mod stage;
pub mod state;
pub mod writer;

pub use cancel::CancelToken;
pub use dag::Dag;
pub use engine::{EngineSettings, ExecutionPlan, GcReport, Orchestrator, OrchestratorBuilder, RunOptions, RunSummary};
pub use errors::{DagError, EngineError, RegistryError, StageError, StageFailure, WriteError};
pub use fingerprint::compute_fingerprint;
pub use model::{Artifact, ArtifactStatus, ExecutionContext, Fingerprint, NewArtifact, PipelineConfig};
pub use registry::{ArtifactRegistry, InMemoryArtifactRegistry};
pub use stage::{Stage, StageKind, StageResult, StageSpec};
pub use state::{InMemoryStateStore, JsonFileStateStore, PipelineRunState, RunStateStore, RunStatus, StageState};
pub use writer::AtomicWriter;
