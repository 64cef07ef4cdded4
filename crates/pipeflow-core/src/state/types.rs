use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::MAX_RETAINED_RUNS;

/// Estado de un stage dentro de un run.
///
/// Transiciones válidas:
/// - `Pending` -> `Skipped` (cache hit o excluido)
/// - `Pending` -> `Running` -> `Committed` | `Failed`
/// - `Pending` -> `Failed` (gate o fingerprint fallan antes de invocar)
/// - `Pending` -> `Blocked` (un upstream falló o el run se canceló)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Pending,
    Skipped,
    Running,
    Committed,
    Failed,
    Blocked,
}

impl StageState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// El stage dejó un artifact utilizable por sus dependientes.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Skipped | Self::Committed)
    }

    pub fn can_transition_to(&self, next: StageState) -> bool {
        use StageState::*;
        matches!((self, next),
                 (Pending, Skipped)
                 | (Pending, Running)
                 | (Pending, Failed)
                 | (Pending, Blocked)
                 | (Running, Committed)
                 | (Running, Failed))
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Skipped => "skipped",
            Self::Running => "running",
            Self::Committed => "committed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Existe un artifact válido con el mismo `input_hash`.
    CacheHit,
    /// Fuera de la selección (`--from`, `--skip` o stage deshabilitado).
    Excluded,
    /// Otro run confirmó el mismo fingerprint mientras éste ejecutaba.
    ConcurrentCommit,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageRecord {
    pub state: StageState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Todos los stages seleccionados terminaron en `Committed` o `Skipped`.
    Succeeded,
    /// Algún stage falló pero otros produjeron o reutilizaron artifacts.
    Partial,
    /// Ningún stage seleccionado quedó satisfecho.
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Estado de una ejecución del pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRunState {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_stage: Option<String>,
    #[serde(default)]
    pub excluded: Vec<String>,
    /// Stage desde el que `--resume` debe reanudar (primer fallo en orden
    /// topológico).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_point: Option<String>,
    /// Todos los stages fallidos cuyo upstream terminó bien, uno por rama
    /// rota. `--resume` reanuda desde cada uno.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resume_from: Vec<String>,
    /// En orden topológico.
    pub stages: IndexMap<String, StageRecord>,
}

impl PipelineRunState {
    pub fn new(run_id: Uuid, order: &[String]) -> Self {
        Self { run_id,
               started_at: Utc::now(),
               finished_at: None,
               status: RunStatus::Running,
               start_stage: None,
               excluded: Vec::new(),
               resume_point: None,
               resume_from: Vec::new(),
               stages: order.iter().map(|n| (n.clone(), StageRecord::default())).collect() }
    }

    pub fn record(&self, stage: &str) -> Option<&StageRecord> {
        self.stages.get(stage)
    }

    pub fn record_mut(&mut self, stage: &str) -> &mut StageRecord {
        self.stages.entry(stage.to_string()).or_default()
    }

    pub fn state_of(&self, stage: &str) -> Option<StageState> {
        self.stages.get(stage).map(|r| r.state)
    }

    pub fn stages_in(&self, state: StageState) -> Vec<String> {
        self.stages.iter().filter(|(_, r)| r.state == state).map(|(n, _)| n.clone()).collect()
    }

    /// Cierra el run: calcula estado final y punto de reanudación.
    pub fn finish(&mut self, cancelled: bool) {
        let failed = self.stages.values().any(|r| matches!(r.state, StageState::Failed | StageState::Blocked));
        let satisfied = self.stages.values().any(|r| r.state.is_satisfied());
        self.status = if cancelled {
            RunStatus::Cancelled
        } else if !failed {
            RunStatus::Succeeded
        } else if satisfied {
            RunStatus::Partial
        } else {
            RunStatus::Failed
        };
        self.resume_point = self.stages
                                .iter()
                                .find(|(_, r)| matches!(r.state, StageState::Failed | StageState::Blocked))
                                .map(|(n, _)| n.clone());
        self.finished_at = Some(Utc::now());
    }
}

/// Documento persistido entre runs, indexado por `run_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStateDocument {
    #[serde(default)]
    pub runs: BTreeMap<Uuid, PipelineRunState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_run: Option<Uuid>,
}

impl RunStateDocument {
    pub fn latest(&self) -> Option<&PipelineRunState> {
        self.latest_run.and_then(|id| self.runs.get(&id))
    }

    pub fn get(&self, run_id: Uuid) -> Option<&PipelineRunState> {
        self.runs.get(&run_id)
    }

    /// Inserta/actualiza un run, lo marca como el último y poda los más
    /// antiguos por encima de `MAX_RETAINED_RUNS`.
    pub fn upsert(&mut self, run: PipelineRunState) {
        self.latest_run = Some(run.run_id);
        self.runs.insert(run.run_id, run);
        while self.runs.len() > MAX_RETAINED_RUNS {
            let oldest = self.runs
                             .values()
                             .filter(|r| Some(r.run_id) != self.latest_run)
                             .min_by_key(|r| r.started_at)
                             .map(|r| r.run_id);
            match oldest {
                Some(id) => {
                    self.runs.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Runs del más reciente al más antiguo.
    pub fn history(&self) -> Vec<&PipelineRunState> {
        let mut v: Vec<&PipelineRunState> = self.runs.values().collect();
        v.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        v
    }
}
