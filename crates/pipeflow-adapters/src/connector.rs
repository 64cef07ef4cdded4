//! Fuentes de datos upstream.
//!
//! Un conector sólo sabe producir un archivo local (`produce() -> ruta`). El
//! orquestador nunca lo invoca directamente: se envuelve en un
//! [`IngestStage`](crate::stages::IngestStage) sin dependencias.

use std::fmt;
use std::path::{Path, PathBuf};

use pipeflow_core::StageError;

pub trait Connector: Send + Sync + fmt::Debug {
    /// Identidad de la lógica del conector (entra en el `code_hash`).
    fn version(&self) -> &str;

    /// Archivos cuyo contenido determina lo que `produce` devuelve. Entran en
    /// el `data_hash` del stage que envuelve al conector.
    fn source_files(&self) -> Vec<PathBuf>;

    /// Materializa los datos y devuelve la ruta del archivo producido.
    fn produce(&self) -> Result<PathBuf, StageError>;
}

/// Conector sobre un archivo ya presente en disco (exportaciones, mocks).
#[derive(Debug, Clone)]
pub struct LocalFileConnector {
    path: PathBuf,
}

impl LocalFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Connector for LocalFileConnector {
    fn version(&self) -> &str {
        "local-file/1"
    }

    fn source_files(&self) -> Vec<PathBuf> {
        vec![self.path.clone()]
    }

    fn produce(&self) -> Result<PathBuf, StageError> {
        if !self.path.is_file() {
            return Err(StageError::msg(format!("source file {} not found", self.path.display())));
        }
        Ok(self.path.clone())
    }
}
