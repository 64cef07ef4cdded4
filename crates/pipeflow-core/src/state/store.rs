use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use super::types::RunStateDocument;
use crate::errors::StateError;
use crate::writer::AtomicWriter;

/// Persistencia del documento de estado entre runs.
pub trait RunStateStore {
    /// Documento vacío si aún no existe.
    fn load(&self) -> Result<RunStateDocument, StateError>;
    fn save(&self, doc: &RunStateDocument) -> Result<(), StateError>;
}

/// Documento JSON en disco, reescrito atómicamente en cada `save`.
#[derive(Debug, Clone)]
pub struct JsonFileStateStore {
    path: PathBuf,
    writer: AtomicWriter,
}

impl JsonFileStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(),
               writer: AtomicWriter::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunStateStore for JsonFileStateStore {
    fn load(&self) -> Result<RunStateDocument, StateError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(RunStateDocument::default()),
            Err(source) => {
                return Err(StateError::Io { path: self.path.clone(),
                                            source })
            }
        };
        serde_json::from_str(&raw).map_err(|source| StateError::Corrupt { path: self.path.clone(),
                                                                          source })
    }

    fn save(&self, doc: &RunStateDocument) -> Result<(), StateError> {
        let body = serde_json::to_vec_pretty(doc).map_err(|source| StateError::Corrupt { path: self.path.clone(),
                                                                                         source })?;
        self.writer.write_bytes(&self.path, &body)?;
        debug!("run_state:saved path={} runs={}", self.path.display(), doc.runs.len());
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    doc: Mutex<RunStateDocument>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStateStore for InMemoryStateStore {
    fn load(&self) -> Result<RunStateDocument, StateError> {
        Ok(self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn save(&self, doc: &RunStateDocument) -> Result<(), StateError> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = doc.clone();
        Ok(())
    }
}
