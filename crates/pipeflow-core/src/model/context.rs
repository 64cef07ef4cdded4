use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::config::PipelineConfig;
use crate::errors::StageError;
use crate::writer::AtomicWriter;

/// Contexto entregado a `Stage::run`.
///
/// `inputs` mapea nombre de stage upstream -> ruta de su artifact vigente.
/// `output_dir` es el directorio reservado al stage; las salidas se escriben
/// con `writer()` para que el orquestador pueda verificar el commit.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub stage_name: String,
    pub run_id: Uuid,
    pub inputs: BTreeMap<String, PathBuf>,
    pub config: Arc<PipelineConfig>,
    pub params: Value,
    pub output_dir: PathBuf,
    writer: AtomicWriter,
}

impl ExecutionContext {
    pub fn new(stage_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self { stage_name: stage_name.into(),
               run_id: Uuid::nil(),
               inputs: BTreeMap::new(),
               config: Arc::new(PipelineConfig::default()),
               params: Value::Null,
               output_dir: output_dir.into(),
               writer: AtomicWriter::new() }
    }

    pub fn with_input(mut self, stage: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.inputs.insert(stage.into(), path.into());
        self
    }

    pub fn with_config(mut self, config: Arc<PipelineConfig>) -> Self {
        self.config = config;
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    pub fn with_writer(mut self, writer: AtomicWriter) -> Self {
        self.writer = writer;
        self
    }

    pub fn writer(&self) -> &AtomicWriter {
        &self.writer
    }

    pub fn is_cancelled(&self) -> bool {
        self.writer.cancel_token().is_cancelled()
    }

    pub fn input(&self, stage: &str) -> Result<&Path, StageError> {
        self.inputs
            .get(stage)
            .map(PathBuf::as_path)
            .ok_or_else(|| StageError::MissingInput(stage.to_string()))
    }

    /// El único input del stage; error si hay cero o más de uno.
    pub fn single_input(&self) -> Result<(&str, &Path), StageError> {
        let mut it = self.inputs.iter();
        match (it.next(), it.next()) {
            (Some((name, path)), None) => Ok((name.as_str(), path.as_path())),
            (None, _) => Err(StageError::msg(format!("stage '{}' expects one input, got none", self.stage_name))),
            _ => Err(StageError::msg(format!("stage '{}' expects one input, got {}", self.stage_name, self.inputs.len()))),
        }
    }

    pub fn output_path(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }
}
