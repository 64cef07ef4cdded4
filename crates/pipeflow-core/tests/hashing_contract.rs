use std::fs;

use pipeflow_core::fingerprint::DataInput;
use pipeflow_core::hashing::{hash_bytes, hash_file, hash_value};
use pipeflow_core::{compute_fingerprint, ExecutionContext, PipelineConfig, Stage, StageError, StageKind,
                    StageResult};
use serde_json::json;

#[derive(Debug)]
struct Fixed(&'static str);

impl Stage for Fixed {
    fn kind(&self) -> StageKind {
        StageKind::Aggregate
    }

    fn code_version(&self) -> &str {
        self.0
    }

    fn run(&self, _ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        Err(StageError::msg("not executed"))
    }
}

#[test]
fn hash_value_produces_hex_64() {
    let h = hash_value(&json!({"b": 2, "a": 1}));
    // blake3 en hex
    assert_eq!(h.len(), 64);
    assert_eq!(h, hash_value(&json!({"a": 1, "b": 2})));
}

#[test]
fn content_hash_is_prefixed_sha256() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("f.csv");
    fs::write(&path, "a,b\n1,2\n").unwrap();
    let h = hash_file(&path).unwrap();
    assert!(h.starts_with("sha256:"));
    assert_eq!(h.len(), "sha256:".len() + 64);
    assert_eq!(h, hash_bytes(b"a,b\n1,2\n"));
}

#[test]
fn fingerprint_is_reproducible_and_code_sensitive() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("in.csv");
    fs::write(&path, "x\n1\n").unwrap();
    let inputs = [DataInput::upstream("ingest", &path)];
    let config = PipelineConfig::new().with("unrelated", 1);

    let a = compute_fingerprint(&Fixed("v1"), &inputs, &config).unwrap();
    let b = compute_fingerprint(&Fixed("v1"), &inputs, &PipelineConfig::new()).unwrap();
    assert_eq!(a, b);

    let c = compute_fingerprint(&Fixed("v2"), &inputs, &config).unwrap();
    assert_eq!(a.data_hash, c.data_hash);
    assert_ne!(a.code_hash, c.code_hash);
    assert_ne!(a.input_hash, c.input_hash);
}
