//! Parámetros del orquestador y opciones por run.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

use crate::stage::StageKind;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Tamaño del pool de workers (mínimo 1).
    pub workers: usize,
    /// Timeout por defecto de cada invocación; `StageSpec::timeout` lo
    /// sobrescribe.
    pub stage_timeout: Option<Duration>,
    /// Ante `ConcurrentModification` repetir el lookup y saltar si otro run ya
    /// confirmó el mismo fingerprint.
    pub retry_on_conflict: bool,
    /// Tratar un error de lectura del registry como cache miss.
    pub lookup_failure_as_miss: bool,
    /// En cache hit, comprobar que el archivo existe y conserva su hash.
    pub verify_outputs_on_skip: bool,
    /// Raíz bajo la que cada stage recibe `<raíz>/<stage>/`.
    pub artifact_root: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self { workers: 1,
               stage_timeout: None,
               retry_on_conflict: true,
               lookup_failure_as_miss: false,
               verify_outputs_on_skip: true,
               artifact_root: PathBuf::from("data/artifacts") }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let d = Self::default();
        let timeout_secs: u64 = env_or("PIPEFLOW_STAGE_TIMEOUT_SECS", 0);
        Self { workers: env_or("PIPEFLOW_WORKERS", d.workers).max(1),
               stage_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
               retry_on_conflict: env_or("PIPEFLOW_RETRY_ON_CONFLICT", d.retry_on_conflict),
               lookup_failure_as_miss: env_or("PIPEFLOW_LOOKUP_MISS_ON_ERROR", d.lookup_failure_as_miss),
               verify_outputs_on_skip: env_or("PIPEFLOW_VERIFY_OUTPUTS", d.verify_outputs_on_skip),
               artifact_root: env::var("PIPEFLOW_ARTIFACT_ROOT").map(PathBuf::from).unwrap_or(d.artifact_root) }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_artifact_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.artifact_root = root.into();
        self
    }

    pub fn with_stage_timeout(mut self, timeout: Duration) -> Self {
        self.stage_timeout = Some(timeout);
        self
    }

    pub fn with_lookup_failure_as_miss(mut self, enabled: bool) -> Self {
        self.lookup_failure_as_miss = enabled;
        self
    }
}

/// Selección de stages para un run concreto.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Ejecutar sólo `start_stage` y sus descendientes.
    pub start_stage: Option<String>,
    /// Stages excluidos por nombre.
    pub skip: Vec<String>,
    /// Stages excluidos por tipo (p.ej. `--skip-ingestion`).
    pub skip_kinds: Vec<StageKind>,
    /// Reanudar desde el punto de fallo del último run.
    pub resume: bool,
}

impl RunOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from_stage(stage: impl Into<String>) -> Self {
        Self { start_stage: Some(stage.into()),
               ..Self::default() }
    }

    pub fn skipping<I, S>(mut self, stages: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.skip.extend(stages.into_iter().map(Into::into));
        self
    }

    pub fn resuming() -> Self {
        Self { resume: true,
               ..Self::default() }
    }
}
