//! Pipeline declarado en JSON.
//!
//! ```json
//! {
//!   "config": { "validation.strict": false },
//!   "stages": [
//!     { "name": "ingest", "kind": "ingest", "params": { "source": "raw/bp.csv" } },
//!     { "name": "normalize", "kind": "normalize", "depends_on": ["ingest"] }
//!   ]
//! }
//! ```
//!
//! Las rutas relativas de `params.source` se resuelven contra el directorio
//! del archivo de pipeline.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use pipeflow_core::errors::ConfigError;
use pipeflow_core::{PipelineConfig, StageKind, StageSpec};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::connector::LocalFileConnector;
use crate::error::AdapterError;
use crate::stages::{CsvMerge, CsvNormalize, CsvValidate, IngestStage};

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    pub name: String,
    pub kind: StageKind,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IngestParams {
    source: PathBuf,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineFile {
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    pub stages: Vec<StageDef>,
}

/// Pipeline listo para el builder del orquestador.
#[derive(Debug)]
pub struct Pipeline {
    pub config: PipelineConfig,
    pub stages: Vec<StageSpec>,
}

fn parse_params<T: DeserializeOwned>(def: &StageDef) -> Result<T, AdapterError> {
    let raw = if def.params.is_null() { Value::Object(Default::default()) } else { def.params.clone() };
    serde_json::from_value(raw).map_err(|source| AdapterError::Params { stage: def.name.clone(),
                                                                        source })
}

impl StageDef {
    /// Construye el nodo del DAG con su implementación según `kind`.
    pub fn into_spec(self, base_dir: &Path) -> Result<StageSpec, AdapterError> {
        let spec = match self.kind {
            StageKind::Ingest => {
                let p: IngestParams = parse_params(&self)?;
                let source = if p.source.is_absolute() { p.source } else { base_dir.join(p.source) };
                let mut stage = IngestStage::new(LocalFileConnector::new(source));
                if let Some(file_name) = p.file_name {
                    stage = stage.with_file_name(file_name);
                }
                StageSpec::new(&self.name, stage)
            }
            StageKind::Normalize => StageSpec::new(&self.name, CsvNormalize::new(parse_params(&self)?)),
            StageKind::Validate => StageSpec::new(&self.name, CsvValidate::new(parse_params(&self)?)),
            StageKind::Aggregate => StageSpec::new(&self.name, CsvMerge::new(parse_params(&self)?)),
            StageKind::Custom => {
                return Err(AdapterError::UnsupportedKind { stage: self.name,
                                                           kind: self.kind })
            }
        };
        let mut spec = spec.with_dependencies(self.depends_on);
        if let Some(secs) = self.timeout_secs {
            spec = spec.with_timeout(Duration::from_secs(secs));
        }
        if !self.enabled {
            spec = spec.disabled();
        }
        Ok(spec)
    }
}

impl PipelineFile {
    pub fn from_path(path: &Path) -> Result<Self, AdapterError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io { path: path.to_path_buf(),
                                                                               source })?;
        let file = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: path.to_path_buf(),
                                                                                     source })?;
        Ok(file)
    }

    pub fn into_pipeline(self, base_dir: &Path) -> Result<Pipeline, AdapterError> {
        let stages = self.stages
                         .into_iter()
                         .map(|def| def.into_spec(base_dir))
                         .collect::<Result<Vec<_>, _>>()?;
        Ok(Pipeline { config: PipelineConfig::from_map(self.config),
                      stages })
    }
}

/// Lee y materializa un archivo de pipeline.
pub fn load_pipeline(path: &Path) -> Result<Pipeline, AdapterError> {
    let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let pipeline = PipelineFile::from_path(path)?.into_pipeline(&base_dir)?;
    debug!("pipeline:loaded path={} stages={}", path.display(), pipeline.stages.len());
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn def(value: Value) -> StageDef {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn stage_defs_map_to_specs() {
        let base = Path::new("/data/pipe");
        let ingest = def(json!({ "name": "ingest", "kind": "ingest", "params": { "source": "raw.csv" } }));
        let spec = ingest.into_spec(base).unwrap();
        assert_eq!(spec.runner.external_inputs(), vec![PathBuf::from("/data/pipe/raw.csv")]);
        assert_eq!(spec.runner.kind(), StageKind::Ingest);

        let validate = def(json!({
            "name": "validate", "kind": "validate", "depends_on": ["normalize"],
            "enabled": false, "timeout_secs": 30,
            "params": { "required_columns": ["date"] }
        }));
        let spec = validate.into_spec(base).unwrap();
        assert!(spec.dependencies.contains("normalize"));
        assert!(!spec.enabled);
        assert_eq!(spec.timeout, Some(Duration::from_secs(30)));
        assert_eq!(spec.runner.params()["required_columns"], json!(["date"]));
    }

    #[test]
    fn bad_params_and_custom_kinds_are_rejected() {
        let base = Path::new("/");
        let merge = def(json!({ "name": "merge", "kind": "aggregate" }));
        assert!(matches!(merge.into_spec(base), Err(AdapterError::Params { .. })));
        let custom = def(json!({ "name": "x", "kind": "custom" }));
        assert!(matches!(custom.into_spec(base), Err(AdapterError::UnsupportedKind { .. })));
    }
}
