//! Registro de un artifact persistido.
//!
//! Un `Artifact` describe un archivo final producido por un stage: su
//! fingerprint (`input_hash` y componentes), el hash de contenido, la versión
//! monotónica por stage y su estado en el ciclo de vida.
//!
//! Ciclo de vida: `Valid` -> `Superseded` (al confirmarse una versión nueva)
//! o `Valid` -> `Zombie` (archivo ausente o alterado detectado en
//! reconciliación). Nunca se vuelve a `Valid`.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStatus {
    Valid,
    Superseded,
    Zombie,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Superseded => "superseded",
            Self::Zombie => "zombie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "superseded" => Some(Self::Superseded),
            "zombie" => Some(Self::Zombie),
            _ => None,
        }
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: i64,
    pub stage_name: String,
    pub version: i64,
    pub input_hash: String,
    pub data_hash: String,
    pub code_hash: String,
    pub config_hash: String,
    pub output_path: PathBuf,
    pub content_hash: String,
    pub row_count: u64,
    pub created_at: DateTime<Utc>,
    pub status: ArtifactStatus,
    pub run_id: Option<Uuid>,
    /// Ids de los artifacts upstream consumidos (orden por nombre de stage).
    pub inputs: Vec<i64>,
    pub metadata: Value,
}

impl Artifact {
    pub fn is_valid(&self) -> bool {
        self.status == ArtifactStatus::Valid
    }
}

/// Condición optimista sobre la versión vigente al confirmar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitGuard {
    /// Reemplaza lo que haya vigente.
    #[default]
    Unchecked,
    /// Falla con `ConcurrentModification` si el id vigente no es el esperado
    /// (`None` = no debía haber ninguno).
    ExpectPrior(Option<i64>),
}

/// Datos para confirmar una versión nueva.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArtifact {
    pub stage_name: String,
    pub input_hash: String,
    pub data_hash: String,
    pub code_hash: String,
    pub config_hash: String,
    pub output_path: PathBuf,
    pub content_hash: String,
    pub row_count: u64,
    pub run_id: Option<Uuid>,
    pub inputs: Vec<i64>,
    pub metadata: Value,
    pub guard: CommitGuard,
}

impl NewArtifact {
    pub fn new(stage_name: impl Into<String>,
               input_hash: impl Into<String>,
               output_path: impl Into<PathBuf>,
               content_hash: impl Into<String>,
               row_count: u64)
               -> Self {
        Self { stage_name: stage_name.into(),
               input_hash: input_hash.into(),
               data_hash: String::new(),
               code_hash: String::new(),
               config_hash: String::new(),
               output_path: output_path.into(),
               content_hash: content_hash.into(),
               row_count,
               run_id: None,
               inputs: Vec::new(),
               metadata: Value::Object(Default::default()),
               guard: CommitGuard::Unchecked }
    }

    pub fn with_fingerprint(mut self, fp: &Fingerprint) -> Self {
        self.input_hash = fp.input_hash.clone();
        self.data_hash = fp.data_hash.clone();
        self.code_hash = fp.code_hash.clone();
        self.config_hash = fp.config_hash.clone();
        self
    }

    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = Some(run_id);
        self
    }

    pub fn with_inputs(mut self, inputs: Vec<i64>) -> Self {
        self.inputs = inputs;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn expecting_prior(mut self, prior: Option<i64>) -> Self {
        self.guard = CommitGuard::ExpectPrior(prior);
        self
    }
}
