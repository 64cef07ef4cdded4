//! Cableado de la CLI: pipeline JSON + registry SQLite + documento de estado.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use pipeflow_adapters::load_pipeline;
use pipeflow_core::{Artifact, ArtifactRegistry, CancelToken, EngineSettings, JsonFileStateStore, Orchestrator,
                    OrchestratorBuilder, PipelineConfig, RunSummary};
use pipeflow_persistence::{DbConfig, SqliteArtifactRegistry};
use serde::Serialize;

use crate::cli::{Cli, Command};

/// Prefijo de las variables de entorno que entran en la config de negocio.
pub const CONFIG_ENV_PREFIX: &str = "PIPEFLOW_CFG_";

pub type CliOrchestrator = Orchestrator<SqliteArtifactRegistry, JsonFileStateStore>;

pub struct App {
    orchestrator: CliOrchestrator,
    registry_path: PathBuf,
    state_path: PathBuf,
    json: bool,
}

impl App {
    /// Config efectiva: pipeline < `--config` < `PIPEFLOW_CFG_*`.
    fn business_config(cli: &Cli, from_pipeline: PipelineConfig) -> Result<PipelineConfig> {
        let mut config = from_pipeline;
        if let Some(path) = &cli.config {
            config = config.merged(PipelineConfig::from_json_file(path)?);
        }
        Ok(config.merged(PipelineConfig::from_env_prefix(CONFIG_ENV_PREFIX)))
    }

    pub fn open(cli: &Cli, cancel: CancelToken) -> Result<Self> {
        let pipeline =
            load_pipeline(&cli.pipeline).with_context(|| format!("loading pipeline {}", cli.pipeline.display()))?;
        let config = Self::business_config(cli, pipeline.config)?;

        let mut db = DbConfig::from_env();
        if let Some(path) = &cli.registry {
            db.path = path.clone();
        }
        let registry = SqliteArtifactRegistry::open(&db).with_context(|| format!("opening registry {}",
                                                                                   db.path.display()))?;

        let mut settings = EngineSettings::from_env();
        if let Some(root) = &cli.artifact_root {
            settings = settings.with_artifact_root(root);
        }
        if let Some(workers) = cli.workers {
            settings = settings.with_workers(workers);
        }

        let orchestrator = OrchestratorBuilder::new(registry, JsonFileStateStore::new(&cli.state))
            .stages(pipeline.stages)?
            .config(config)
            .settings(settings)
            .cancel_token(cancel)
            .build()?;
        Ok(Self { orchestrator,
                  registry_path: db.path,
                  state_path: cli.state.clone(),
                  json: cli.json })
    }

    pub fn orchestrator(&self) -> &CliOrchestrator {
        &self.orchestrator
    }

    fn emit<T: Serialize>(&self, out: &mut dyn Write, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        } else {
            write!(out, "{}", text())?;
        }
        Ok(())
    }

    fn emit_summary(&self, out: &mut dyn Write, summary: &RunSummary) -> Result<()> {
        self.emit(out, summary, || summary.to_string())
    }

    /// Ejecuta un subcomando. `Ok(false)` indica que terminó con stages
    /// fallidos (el binario sale con código distinto de cero).
    pub fn execute(&self, command: &Command, out: &mut dyn Write) -> Result<bool> {
        let orch = &self.orchestrator;
        match command {
            Command::Run(args) if args.dry_run => {
                let plan = orch.plan(&args.select.to_options())?;
                self.emit(out, &plan, || plan.to_string())?;
            }
            Command::Run(args) => {
                let summary = orch.run(&args.select.to_options())?;
                self.emit_summary(out, &summary)?;
                return Ok(summary.is_success());
            }
            Command::Plan(select) => {
                let plan = orch.plan(&select.to_options())?;
                self.emit(out, &plan, || plan.to_string())?;
            }
            Command::Versions { stage } => {
                orch.dag().dependencies_of(stage)?;
                let versions = orch.registry().list_versions(stage)?;
                self.emit(out, &versions, || artifact_lines(&versions))?;
            }
            Command::Show { reference } => match orch.registry().resolve(reference)? {
                Some(artifact) => self.emit(out, &artifact, || artifact_lines(std::slice::from_ref(&artifact)))?,
                None => bail!("no artifact matches '{reference}'"),
            },
            Command::Lineage { artifact_id } => {
                if orch.registry().get(*artifact_id)?.is_none() {
                    bail!("artifact {artifact_id} not found");
                }
                let lineage = orch.registry().lineage_of(*artifact_id)?;
                self.emit(out, &lineage, || artifact_lines(&lineage))?;
            }
            Command::Status => match orch.latest_run()? {
                Some(run) => {
                    let summary = RunSummary::from_state(&run);
                    self.emit(out, &run, || summary.to_string())?;
                }
                None => writeln!(out, "no runs recorded")?,
            },
            Command::Reconcile => {
                let zombies = orch.reconcile()?;
                self.emit(out, &zombies, || {
                        if zombies.is_empty() {
                            "registry consistent\n".to_string()
                        } else {
                            artifact_lines(&zombies)
                        }
                    })?;
            }
            Command::Gc { apply, keep } => {
                let mut protected = vec![self.registry_path.clone(), self.state_path.clone()];
                protected.extend(keep.iter().cloned());
                let report = orch.gc(*apply, &protected)?;
                self.emit(out, &report, || {
                        let verb = if report.applied { "removed" } else { "would remove" };
                        let mut s = String::new();
                        for path in report.files() {
                            s.push_str(&format!("{verb} {}\n", path.display()));
                        }
                        if !report.zombies.is_empty() {
                            s.push_str(&format!("marked zombie: {:?}\n", report.zombies));
                        }
                        if report.is_empty() {
                            s.push_str("nothing to collect\n");
                        }
                        s
                    })?;
            }
            Command::Clean { stages, apply } => {
                let removed = orch.clean(stages, *apply)?;
                self.emit(out, &removed, || {
                        let verb = if *apply { "removed" } else { "would remove" };
                        removed.iter().map(|p| format!("{verb} {}\n", p.display())).collect()
                    })?;
            }
        }
        Ok(true)
    }
}

fn artifact_lines(artifacts: &[Artifact]) -> String {
    artifacts.iter()
             .map(|a| {
                 format!("{:<6} {:<20} v{:<4} {:<10} rows={:<8} {} {}\n",
                         a.id,
                         a.stage_name,
                         a.version,
                         a.status.as_str(),
                         a.row_count,
                         a.created_at.format("%Y-%m-%d %H:%M:%S"),
                         a.output_path.display())
             })
             .collect()
}
