use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use pipeflow_core::{ExecutionContext, InMemoryArtifactRegistry, JsonFileStateStore, Orchestrator,
                    OrchestratorBuilder, RunOptions, RunStatus, Stage, StageError, StageKind, StageResult,
                    StageSpec, StageState, EngineSettings};

/// Copia su input (o el archivo externo) y añade una línea.
#[derive(Debug)]
struct Append {
    source: Option<PathBuf>,
    fail_if_exists: Option<PathBuf>,
}

impl Stage for Append {
    fn kind(&self) -> StageKind {
        StageKind::Custom
    }

    fn code_version(&self) -> &str {
        "append-1"
    }

    fn external_inputs(&self) -> Vec<PathBuf> {
        self.source.iter().cloned().collect()
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        if self.fail_if_exists.as_ref().is_some_and(|p| p.exists()) {
            return Err(StageError::msg("marker present"));
        }
        let input = match &self.source {
            Some(p) => p.clone(),
            None => ctx.single_input()?.1.to_path_buf(),
        };
        let mut body = fs::read_to_string(&input)?;
        body.push_str(&format!("{}\n", ctx.stage_name));
        let out = ctx.output_path("data.txt");
        ctx.writer().write_bytes(&out, body.as_bytes())?;
        Ok(StageResult::new(out, body.lines().count() as u64))
    }
}

fn orchestrator(root: &Path,
                registry: &Arc<InMemoryArtifactRegistry>)
                -> Orchestrator<InMemoryArtifactRegistry, JsonFileStateStore> {
    let marker = root.join("fail-transform");
    OrchestratorBuilder::with_shared_registry(Arc::clone(registry), JsonFileStateStore::new(root.join("run_state.json")))
        .add_stage(StageSpec::new("extract", Append { source: Some(root.join("in.txt")),
                                                      fail_if_exists: None }))
        .unwrap()
        .add_stage(StageSpec::new("transform", Append { source: None,
                                                        fail_if_exists: Some(marker) }).depends_on("extract"))
        .unwrap()
        .add_stage(StageSpec::new("load", Append { source: None,
                                                   fail_if_exists: None }).depends_on("transform"))
        .unwrap()
        .settings(EngineSettings::default().with_artifact_root(root.join("artifacts")))
        .build()
        .unwrap()
}

#[test]
fn resume_point_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("in.txt"), "seed\n").unwrap();
    fs::write(root.join("fail-transform"), "").unwrap();
    let registry = Arc::new(InMemoryArtifactRegistry::new());

    let first = orchestrator(root, &registry).run(&RunOptions::all()).unwrap();
    assert_eq!(first.status, RunStatus::Partial);
    assert_eq!(first.resume_point.as_deref(), Some("transform"));

    // nuevo proceso: el estado se relee desde disco
    fs::remove_file(root.join("fail-transform")).unwrap();
    let orch = orchestrator(root, &registry);
    let latest = orch.latest_run().unwrap().unwrap();
    assert_eq!(latest.run_id, first.run_id);
    assert_eq!(latest.state_of("load"), Some(StageState::Blocked));

    let resumed = orch.run(&RunOptions::resuming()).unwrap();
    assert_eq!(resumed.status, RunStatus::Succeeded);
    assert_eq!(resumed.excluded, vec!["extract"]);
    assert_eq!(resumed.executed, vec!["transform", "load"]);

    let history = orch.run_history().unwrap();
    assert_eq!(history.runs.len(), 2);
    assert_eq!(history.latest_run, Some(resumed.run_id));

    let out = fs::read_to_string(root.join("artifacts/load/data.txt")).unwrap();
    assert_eq!(out, "seed\nextract\ntransform\nload\n");
}

#[test]
fn state_document_has_no_leftover_temp_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("in.txt"), "seed\n").unwrap();
    let registry = Arc::new(InMemoryArtifactRegistry::new());
    orchestrator(root, &registry).run(&RunOptions::all()).unwrap();

    let leftovers: Vec<_> = fs::read_dir(root).unwrap()
                                              .filter_map(|e| e.ok())
                                              .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                                              .collect();
    assert!(leftovers.is_empty());
    let raw = fs::read_to_string(root.join("run_state.json")).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(doc["latest_run"].is_string());
}
