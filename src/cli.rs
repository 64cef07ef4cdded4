//! Definición de la línea de comandos.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use pipeflow_core::{RunOptions, StageKind};

#[derive(Debug, Parser)]
#[command(name = "pipeflow", version, about = "DAG pipeline runner with fingerprint memoization")]
pub struct Cli {
    /// Archivo JSON con la declaración del pipeline.
    #[arg(long, short, value_name = "FILE", env = "PIPEFLOW_PIPELINE", default_value = "pipeline.json")]
    pub pipeline: PathBuf,

    /// Config de negocio (objeto JSON); tiene prioridad sobre la del pipeline.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Base SQLite del registry. Por defecto `PIPEFLOW_REGISTRY_PATH`.
    #[arg(long, value_name = "FILE")]
    pub registry: Option<PathBuf>,

    /// Documento de estado de runs.
    #[arg(long, value_name = "FILE", env = "PIPEFLOW_STATE_PATH", default_value = "data/run_state.json")]
    pub state: PathBuf,

    /// Raíz de salidas. Por defecto `PIPEFLOW_ARTIFACT_ROOT`.
    #[arg(long, value_name = "DIR")]
    pub artifact_root: Option<PathBuf>,

    /// Tamaño del pool de workers. Por defecto `PIPEFLOW_WORKERS`.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Salida en JSON en lugar de texto.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Ejecuta el pipeline.
    Run(RunArgs),
    /// Muestra las decisiones skip/run sin ejecutar nada.
    Plan(SelectArgs),
    /// Historial de versiones de un stage (la más reciente primero).
    Versions { stage: String },
    /// Un artifact por referencia: `<stage>:v<N>`, `<stage>:latest` o
    /// `sha256:<hex>`.
    Show { reference: String },
    /// Artifacts upstream que produjeron un artifact.
    Lineage { artifact_id: i64 },
    /// Resumen del último run.
    Status,
    /// Marca como zombie los artifacts cuyo archivo falta o cambió.
    Reconcile,
    /// Archivos bajo la raíz de artifacts sin fila válida y temporales
    /// huérfanos.
    Gc {
        /// Borrar (por defecto sólo se listan).
        #[arg(long)]
        apply: bool,
        /// Rutas adicionales que nunca se borran.
        #[arg(long, value_name = "PATH")]
        keep: Vec<PathBuf>,
    },
    /// Borra las salidas vigentes de los stages (todos si no se indica
    /// ninguno).
    Clean {
        stages: Vec<String>,
        #[arg(long)]
        apply: bool,
    },
}

#[derive(Debug, Clone, Default, Args)]
pub struct SelectArgs {
    /// Ejecuta sólo este stage y sus descendientes.
    #[arg(long, visible_alias = "from", value_name = "STAGE")]
    pub start_stage: Option<String>,

    /// Stages excluidos (se usan sus artifacts vigentes).
    #[arg(long, value_name = "STAGE", value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Excluye todos los stages de ingesta.
    #[arg(long)]
    pub skip_ingestion: bool,

    /// Reanuda desde el stage fallido del último run.
    #[arg(long, conflicts_with = "start_stage")]
    pub resume: bool,
}

impl SelectArgs {
    pub fn to_options(&self) -> RunOptions {
        let mut opts = RunOptions { start_stage: self.start_stage.clone(),
                                    skip: self.skip.clone(),
                                    resume: self.resume,
                                    ..RunOptions::default() };
        if self.skip_ingestion {
            opts.skip_kinds.push(StageKind::Ingest);
        }
        opts
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Igual que `plan`.
    #[arg(long)]
    pub dry_run: bool,
}
