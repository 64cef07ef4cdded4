use std::path::Path;

use pipeflow_core::NewArtifact;
use pipeflow_persistence::{DbConfig, SqliteArtifactRegistry};

/// Registry sobre `<dir>/registry.db`, migrado.
pub fn open_registry(dir: &Path) -> SqliteArtifactRegistry {
    SqliteArtifactRegistry::open(&DbConfig::new(dir.join("registry.db"))).expect("open registry")
}

pub fn new_art(stage: &str, input_hash: &str) -> NewArtifact {
    NewArtifact::new(stage, input_hash, format!("/data/{stage}.csv"), format!("sha256:{input_hash}"), 3)
}
