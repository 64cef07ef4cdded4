//! Motor de ejecución: orquestador, builder, workers y mantenimiento.

pub mod builder;
pub mod core;
pub mod maintenance;
pub mod report;
pub mod settings;
mod worker;

pub use builder::OrchestratorBuilder;
pub use self::core::Orchestrator;
pub use maintenance::{collect_garbage, GcReport};
pub use report::{ExecutionPlan, FailedStage, PlanAction, PlannedStage, RunReason, RunSummary};
pub use settings::{init_dotenv, EngineSettings, RunOptions};
