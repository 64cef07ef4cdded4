//! Errores del core.
//!
//! Cada componente tiene su propio enum; `StageFailure` agrupa lo que puede
//! hacer fallar una invocación concreta y `EngineError` lo que aborta un run
//! completo.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errores estructurales del grafo.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum DagError {
    #[error("duplicate stage: {0}")]
    DuplicateStage(String),
    #[error("stage '{stage}' depends on unknown stage '{dependency}'")]
    UnknownDependency { stage: String, dependency: String },
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("cycle detected: {}", .cycle.join(" -> "))]
    Cycle { cycle: Vec<String> },
}

#[derive(Debug, Error)]
pub enum FingerprintError {
    #[error("cannot hash input {path}: {source}")]
    Input {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errores del escritor atómico. En todos los casos el temporal se elimina y
/// el destino final queda intacto.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("non-atomic target {path}: {reason}")]
    NonAtomicTarget { path: PathBuf, reason: String },
    #[error("write to {0} cancelled before commit")]
    Cancelled(PathBuf),
    #[error("writer callback for {path} failed: {source}")]
    Rejected {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),
    #[error("concurrent modification on stage '{stage}'")]
    ConcurrentModification { stage: String },
    #[error("artifact not found: {0}")]
    NotFound(i64),
    #[error("registry corrupt: {0}")]
    Corrupt(String),
    #[error("invalid artifact reference '{0}' (expected <stage>:v<N>, <stage>:latest or sha256:<hex>)")]
    InvalidReference(String),
}

/// Error devuelto por la lógica de un stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("{message}")]
    Execution {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
    #[error("missing input from stage '{0}'")]
    MissingInput(String),
}

impl StageError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Execution { message: message.into(),
                          source: None }
    }

    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
        where E: std::error::Error + Send + Sync + 'static
    {
        Self::Execution { message: message.into(),
                          source: Some(Box::new(source)) }
    }

    /// `true` si el destino no admite rename atómico (aborta el run).
    pub fn is_non_atomic_target(&self) -> bool {
        matches!(self, Self::Write(WriteError::NonAtomicTarget { .. }))
    }
}

impl From<std::io::Error> for StageError {
    fn from(e: std::io::Error) -> Self {
        Self::with_source("io error", e)
    }
}

/// Causa por la que una invocación de stage terminó en FAILED.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),
    #[error(transparent)]
    Stage(#[from] StageError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("input artifact of stage '{stage}' missing on disk: {path}")]
    MissingInput { stage: String, path: PathBuf },
    #[error("no valid artifact for upstream stage '{0}'")]
    UnresolvedInput(String),
    #[error("stage did not write {0} through the atomic writer")]
    OutputNotCommitted(PathBuf),
    #[error("stage timed out after {0:?}")]
    Timeout(Duration),
    #[error("stage panicked: {0}")]
    Panicked(String),
    #[error("cancelled")]
    Cancelled,
}

impl StageFailure {
    /// Fallos que abortan el run completo en lugar de sólo bloquear dependientes.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Stage(e) if e.is_non_atomic_target())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum StateError {
    #[error("cannot read run state {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt run state {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Write(#[from] WriteError),
}

/// Errores que abortan un run (o una operación de mantenimiento) completo.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Dag(#[from] DagError),
    #[error("stage '{stage}' targets a non-atomic location: {source}")]
    NonAtomicTarget {
        stage: String,
        #[source]
        source: StageError,
    },
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("worker pool: {0}")]
    Pool(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
