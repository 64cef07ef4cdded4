//! Ingest: envuelve un `Connector` como stage sin dependencias.
//!
//! El contenido de los archivos fuente entra en el `data_hash`, de modo que
//! un cambio en la fuente invalida el ingest y todo lo que cuelga de él.

use std::path::PathBuf;

use log::info;
use pipeflow_core::{ExecutionContext, Stage, StageError, StageKind, StageResult};
use serde_json::{json, Value};

use crate::connector::{Connector, LocalFileConnector};
use crate::table::Table;

#[derive(Debug)]
pub struct IngestStage<C = LocalFileConnector> {
    connector: C,
    file_name: String,
}

impl<C: Connector> IngestStage<C> {
    pub fn new(connector: C) -> Self {
        Self { connector,
               file_name: "raw.csv".to_string() }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }
}

impl<C: Connector> Stage for IngestStage<C> {
    fn kind(&self) -> StageKind {
        StageKind::Ingest
    }

    fn code_version(&self) -> &str {
        self.connector.version()
    }

    fn params(&self) -> Value {
        json!({ "file_name": self.file_name })
    }

    fn external_inputs(&self) -> Vec<PathBuf> {
        self.connector.source_files()
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        let source = self.connector.produce()?;
        let table = Table::read(&source)?;
        info!("ingest: stage={} source={} rows={}", ctx.stage_name, source.display(), table.len());
        table.commit(ctx, &self.file_name)
    }
}
