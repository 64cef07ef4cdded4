//! Workspace temporal con un pipeline JSON, registry SQLite y documento de
//! estado, manejado a través de la CLI.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use pipeflow::{App, Cli};
use pipeflow_core::CancelToken;
use serde_json::Value;
use tempfile::TempDir;

pub struct Workspace {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl Workspace {
    pub fn new(pipeline: Value) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("raw")).unwrap();
        let ws = Self { dir };
        ws.write_pipeline(pipeline);
        ws
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root().join(rel)
    }

    pub fn write(&self, rel: &str, body: &str) {
        fs::write(self.path(rel), body).unwrap();
    }

    pub fn write_pipeline(&self, pipeline: Value) {
        fs::write(self.path("pipeline.json"), serde_json::to_vec_pretty(&pipeline).unwrap()).unwrap();
    }

    pub fn cli(&self, args: &[&str]) -> Cli {
        let pipeline = self.path("pipeline.json");
        let registry = self.path("data/registry.db");
        let state = self.path("data/run_state.json");
        let artifacts = self.path("artifacts");
        let mut full = vec!["pipeflow",
                            "--pipeline",
                            pipeline.to_str().unwrap(),
                            "--registry",
                            registry.to_str().unwrap(),
                            "--state",
                            state.to_str().unwrap(),
                            "--artifact-root",
                            artifacts.to_str().unwrap()];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    pub fn open(&self, args: &[&str]) -> anyhow::Result<(App, Cli)> {
        let cli = self.cli(args);
        let app = App::open(&cli, CancelToken::new())?;
        Ok((app, cli))
    }

    /// Ejecuta el subcomando y devuelve (éxito, stdout).
    pub fn exec(&self, args: &[&str]) -> (bool, String) {
        let (app, cli) = self.open(args).unwrap();
        let mut out = Vec::new();
        let ok = app.execute(&cli.command, &mut out).unwrap();
        (ok, String::from_utf8(out).unwrap())
    }

    /// Igual que `exec` con `--json`, parseando la salida.
    pub fn json(&self, args: &[&str]) -> (bool, Value) {
        let mut with_json = vec!["--json"];
        with_json.extend_from_slice(args);
        let (ok, out) = self.exec(&with_json);
        (ok, serde_json::from_str(&out).unwrap())
    }
}

pub fn names(v: &Value) -> Vec<String> {
    v.as_array()
     .unwrap()
     .iter()
     .map(|s| s.as_str().unwrap().to_string())
     .collect()
}
