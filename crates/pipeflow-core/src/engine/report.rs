//! Resultados visibles de un run: resumen final y plan de dry-run.

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::state::{PipelineRunState, RunStatus, SkipReason, StageState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedStage {
    pub stage: String,
    pub error: String,
}

/// Resumen de un run terminado.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub excluded: Vec<String>,
    pub failed: Vec<FailedStage>,
    /// No se intentaron por un upstream fallido o por cancelación.
    pub blocked: Vec<String>,
    pub resume_point: Option<String>,
    /// Un origen por cada rama rota; `--resume` reanuda desde todos.
    pub resume_from: Vec<String>,
}

impl RunSummary {
    pub fn from_state(run: &PipelineRunState) -> Self {
        let mut s = Self { run_id: run.run_id,
                           status: run.status,
                           executed: Vec::new(),
                           skipped: Vec::new(),
                           excluded: Vec::new(),
                           failed: Vec::new(),
                           blocked: Vec::new(),
                           resume_point: run.resume_point.clone(),
                           resume_from: run.resume_from.clone() };
        for (name, rec) in &run.stages {
            match rec.state {
                StageState::Committed => s.executed.push(name.clone()),
                StageState::Skipped if rec.skip_reason == Some(SkipReason::Excluded) => s.excluded.push(name.clone()),
                StageState::Skipped => s.skipped.push(name.clone()),
                StageState::Failed => s.failed.push(FailedStage { stage: name.clone(),
                                                                  error: rec.error.clone().unwrap_or_default() }),
                StageState::Blocked | StageState::Pending | StageState::Running => s.blocked.push(name.clone()),
            }
        }
        s
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Succeeded
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "run {} {}", self.run_id, self.status)?;
        writeln!(f, "  executed: {}", list(&self.executed))?;
        writeln!(f, "  skipped:  {}", list(&self.skipped))?;
        if !self.excluded.is_empty() {
            writeln!(f, "  excluded: {}", list(&self.excluded))?;
        }
        for failed in &self.failed {
            writeln!(f, "  failed:   {} ({})", failed.stage, failed.error)?;
        }
        if !self.blocked.is_empty() {
            writeln!(f, "  blocked:  {}", list(&self.blocked))?;
        }
        if !self.resume_from.is_empty() {
            writeln!(f, "  resume from: {}", list(&self.resume_from))?;
        } else if let Some(rp) = &self.resume_point {
            writeln!(f, "  resume from: {rp}")?;
        }
        Ok(())
    }
}

fn list(v: &[String]) -> String {
    if v.is_empty() {
        "-".to_string()
    } else {
        v.join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunReason {
    /// No hay artifact válido con este fingerprint.
    NoMatchingArtifact,
    /// Un upstream se ejecutará; el fingerprint aún no es calculable.
    UpstreamWillRun,
    /// Hay cache hit pero el archivo falta o no coincide con su hash.
    OutputMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PlanAction {
    Skip { artifact_id: i64, version: i64 },
    Run { reason: RunReason },
    Excluded { artifact_id: Option<i64> },
    Blocked { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStage {
    pub stage: String,
    pub input_hash: Option<String>,
    #[serde(flatten)]
    pub action: PlanAction,
}

/// Decisiones skip/run calculadas sin ejecutar ni escribir nada.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionPlan {
    pub stages: Vec<PlannedStage>,
}

impl ExecutionPlan {
    pub fn get(&self, stage: &str) -> Option<&PlannedStage> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn to_run(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| matches!(s.action, PlanAction::Run { .. }))
            .map(|s| s.stage.as_str())
            .collect()
    }

    pub fn to_skip(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| matches!(s.action, PlanAction::Skip { .. }))
            .map(|s| s.stage.as_str())
            .collect()
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for s in &self.stages {
            let hash = s.input_hash.as_deref().map(|h| &h[..h.len().min(12)]).unwrap_or("-");
            let action = match &s.action {
                PlanAction::Skip { artifact_id, version } => format!("skip (artifact {artifact_id} v{version})"),
                PlanAction::Run { reason } => format!("run ({})", match reason {
                                                    RunReason::NoMatchingArtifact => "no matching artifact",
                                                    RunReason::UpstreamWillRun => "upstream pending",
                                                    RunReason::OutputMismatch => "cached output missing or altered",
                                                }),
                PlanAction::Excluded { artifact_id: Some(id) } => format!("excluded (uses artifact {id})"),
                PlanAction::Excluded { artifact_id: None } => "excluded (no artifact)".to_string(),
                PlanAction::Blocked { reason } => format!("blocked ({reason})"),
            };
            writeln!(f, "{:<24} {:<14} {action}", s.stage, hash)?;
        }
        Ok(())
    }
}
