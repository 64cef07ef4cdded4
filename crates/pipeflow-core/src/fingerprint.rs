//! Cálculo de fingerprints.
//!
//! `input_hash = blake3(data_hash ␟ code_hash ␟ config_hash)` donde:
//! - `data_hash`: pares (clave, sha256 del contenido) de cada input,
//!   ordenados por clave. Depende del contenido, no de mtimes.
//! - `code_hash`: identidad declarada del stage + `ENGINE_VERSION`.
//! - `config_hash`: `params` del stage + sólo las claves de config que el
//!   stage declara relevantes.
//!
//! Todo se serializa como JSON canónico antes de hashear; el resultado es
//! estable entre procesos y máquinas.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::constants::ENGINE_VERSION;
use crate::errors::FingerprintError;
use crate::hashing::{hash_file, hash_str, hash_value};
use crate::model::{Fingerprint, PipelineConfig};
use crate::stage::Stage;

const COMPONENT_SEPARATOR: char = '\u{1f}';

/// Input de datos con su clave de orden. Para artifacts upstream la clave es
/// el nombre del stage (`stage:<nombre>`), así mover la raíz de artifacts no
/// invalida nada; para archivos externos es la ruta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataInput {
    pub key: String,
    pub path: PathBuf,
}

impl DataInput {
    pub fn upstream(stage: &str, path: impl Into<PathBuf>) -> Self {
        Self { key: format!("stage:{stage}"),
               path: path.into() }
    }

    pub fn external(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self { key: format!("external:{}", path.display()),
               path }
    }
}

pub fn combine(data_hash: &str, code_hash: &str, config_hash: &str) -> String {
    hash_str(&format!("{data_hash}{COMPONENT_SEPARATOR}{code_hash}{COMPONENT_SEPARATOR}{config_hash}"))
}

/// `data_hash` sobre rutas; la clave de orden es la propia ruta.
pub fn compute_data_hash<P: AsRef<Path>>(paths: &[P]) -> Result<String, FingerprintError> {
    let inputs: Vec<DataInput> = paths.iter()
                                      .map(|p| DataInput { key: p.as_ref().display().to_string(),
                                                           path: p.as_ref().to_path_buf() })
                                      .collect();
    compute_keyed_data_hash(&inputs)
}

pub fn compute_keyed_data_hash(inputs: &[DataInput]) -> Result<String, FingerprintError> {
    let mut pairs = Vec::with_capacity(inputs.len());
    for input in inputs {
        let content = hash_file(&input.path).map_err(|source| FingerprintError::Input { path: input.path.clone(),
                                                                                         source })?;
        pairs.push((input.key.clone(), content));
    }
    pairs.sort();
    let value = Value::Array(pairs.into_iter().map(|(k, h)| json!([k, h])).collect());
    Ok(hash_value(&value))
}

pub fn compute_code_hash(stage: &dyn Stage) -> String {
    hash_value(&json!({ "engine_version": ENGINE_VERSION, "identity": stage.code_identity() }))
}

pub fn compute_config_hash(stage: &dyn Stage, config: &PipelineConfig) -> String {
    let keys = stage.relevant_config_keys();
    hash_value(&json!({ "params": stage.params(), "config": config.subset(&keys) }))
}

/// Fingerprint completo de una invocación.
pub fn compute_fingerprint(stage: &dyn Stage,
                           inputs: &[DataInput],
                           config: &PipelineConfig)
                           -> Result<Fingerprint, FingerprintError> {
    let data_hash = compute_keyed_data_hash(inputs)?;
    Ok(Fingerprint::new(data_hash, compute_code_hash(stage), compute_config_hash(stage, config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageError;
    use crate::model::ExecutionContext;
    use crate::stage::{StageKind, StageResult};
    use std::fs;

    #[derive(Debug)]
    struct Probe {
        version: &'static str,
        keys: Vec<String>,
        params: Value,
    }

    impl Stage for Probe {
        fn kind(&self) -> StageKind {
            StageKind::Normalize
        }
        fn code_version(&self) -> &str {
            self.version
        }
        fn params(&self) -> Value {
            self.params.clone()
        }
        fn relevant_config_keys(&self) -> Vec<String> {
            self.keys.clone()
        }
        fn run(&self, _ctx: &ExecutionContext) -> Result<StageResult, StageError> {
            Err(StageError::msg("probe"))
        }
    }

    fn probe(version: &'static str) -> Probe {
        Probe { version,
                keys: vec!["csv.delimiter".into()],
                params: json!({"trim": true}) }
    }

    #[test]
    fn data_hash_ignores_argument_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("b.csv");
        fs::write(&a, "x\n1\n").unwrap();
        fs::write(&b, "y\n2\n").unwrap();
        assert_eq!(compute_data_hash(&[&a, &b]).unwrap(), compute_data_hash(&[&b, &a]).unwrap());
    }

    #[test]
    fn data_hash_follows_content_not_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        fs::write(&a, "x\n1\n").unwrap();
        let first = compute_data_hash(&[&a]).unwrap();
        fs::write(&a, "x\n1\n").unwrap();
        assert_eq!(first, compute_data_hash(&[&a]).unwrap());
        fs::write(&a, "x\n2\n").unwrap();
        assert_ne!(first, compute_data_hash(&[&a]).unwrap());
    }

    #[test]
    fn upstream_keys_are_location_independent() {
        let one = tempfile::tempdir().unwrap();
        let two = tempfile::tempdir().unwrap();
        for d in [&one, &two] {
            fs::write(d.path().join("out.csv"), "same").unwrap();
        }
        let h1 = compute_keyed_data_hash(&[DataInput::upstream("ingest", one.path().join("out.csv"))]).unwrap();
        let h2 = compute_keyed_data_hash(&[DataInput::upstream("ingest", two.path().join("out.csv"))]).unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn missing_input_is_an_error() {
        let err = compute_data_hash(&[Path::new("/definitely/not/here.csv")]).unwrap_err();
        assert!(matches!(err, FingerprintError::Input { .. }));
    }

    #[test]
    fn code_hash_tracks_declared_version() {
        assert_eq!(compute_code_hash(&probe("v1")), compute_code_hash(&probe("v1")));
        assert_ne!(compute_code_hash(&probe("v1")), compute_code_hash(&probe("v2")));
    }

    #[test]
    fn config_hash_only_sees_relevant_keys() {
        let stage = probe("v1");
        let base = PipelineConfig::new().with("csv.delimiter", ",").with("unrelated", 1);
        let unrelated_change = base.clone().with("unrelated", 2);
        let relevant_change = base.clone().with("csv.delimiter", ";");

        let h = compute_config_hash(&stage, &base);
        assert_eq!(h, compute_config_hash(&stage, &unrelated_change));
        assert_ne!(h, compute_config_hash(&stage, &relevant_change));
    }

    #[test]
    fn params_change_config_hash() {
        let a = probe("v1");
        let mut b = probe("v1");
        b.params = json!({"trim": false});
        let cfg = PipelineConfig::new();
        assert_ne!(compute_config_hash(&a, &cfg), compute_config_hash(&b, &cfg));
    }

    #[test]
    fn combine_changes_with_any_component() {
        let base = combine("d", "c", "k");
        assert_eq!(base, combine("d", "c", "k"));
        assert_ne!(base, combine("d2", "c", "k"));
        assert_ne!(base, combine("d", "c2", "k"));
        assert_ne!(base, combine("d", "c", "k2"));
        assert_ne!(combine("ab", "c", "k"), combine("a", "bc", "k"));
    }
}
