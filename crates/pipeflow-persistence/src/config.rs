//! Configuración del registry SQLite desde variables de entorno.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use dotenvy::dotenv;
use once_cell::sync::Lazy;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { path: PathBuf::from("data/registry.db"),
               max_connections: 4,
               busy_timeout: Duration::from_millis(5000) }
    }
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(),
               ..Self::default() }
    }

    /// `PIPEFLOW_REGISTRY_PATH`, `PIPEFLOW_DB_MAX_CONNECTIONS`,
    /// `PIPEFLOW_DB_BUSY_TIMEOUT_MS`; los valores ausentes o inválidos toman
    /// el default.
    pub fn from_env() -> Self {
        // asegura que .env se haya cargado
        Lazy::force(&DOTENV_LOADED);
        let d = Self::default();
        let path = env::var("PIPEFLOW_REGISTRY_PATH").map(PathBuf::from).unwrap_or(d.path);
        let max_connections = env::var("PIPEFLOW_DB_MAX_CONNECTIONS").ok()
                                                                     .and_then(|v| v.parse().ok())
                                                                     .unwrap_or(d.max_connections);
        let busy_timeout = env::var("PIPEFLOW_DB_BUSY_TIMEOUT_MS").ok()
                                                                  .and_then(|v| v.parse().ok())
                                                                  .map(Duration::from_millis)
                                                                  .unwrap_or(d.busy_timeout);
        Self { path,
               max_connections,
               busy_timeout }
    }
}

/// Forzar carga temprana de .env desde aplicaciones externas si se desea.
pub fn init_dotenv() {
    Lazy::force(&DOTENV_LOADED);
}
