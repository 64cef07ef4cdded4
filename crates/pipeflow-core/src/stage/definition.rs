use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::run_result::StageResult;
use crate::errors::StageError;
use crate::model::ExecutionContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Ingest,
    Normalize,
    Validate,
    Aggregate,
    Custom,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::Normalize => "normalize",
            Self::Validate => "validate",
            Self::Aggregate => "aggregate",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lógica de un stage. Las implementaciones deben ser deterministas respecto
/// a sus inputs, `params` y las claves de config que declaran.
///
/// Toda salida se escribe mediante `ctx.writer()`; una salida escrita por
/// otro camino hace fallar la invocación.
pub trait Stage: Send + Sync + fmt::Debug {
    fn kind(&self) -> StageKind;

    /// Identidad declarada de la lógica. Cambiarla invalida los artifacts del
    /// stage (entra en el `code_hash`).
    fn code_version(&self) -> &str;

    /// Identidad completa hasheada en `code_hash`.
    fn code_identity(&self) -> Value {
        json!({ "kind": self.kind().as_str(), "version": self.code_version() })
    }

    /// Parámetros propios (entran en `config_hash`).
    fn params(&self) -> Value {
        Value::Null
    }

    /// Claves de la config global que afectan a este stage. Sólo éstas entran
    /// en `config_hash`.
    fn relevant_config_keys(&self) -> Vec<String> {
        Vec::new()
    }

    /// Archivos externos leídos por el stage (p.ej. la fuente de un ingest).
    /// Su contenido entra en `data_hash`.
    fn external_inputs(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError>;
}
