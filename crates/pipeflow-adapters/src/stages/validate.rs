//! Validate: columnas requeridas, filas incompletas y duplicados.
//!
//! Una columna requerida ausente se crea vacía (y sus filas se descartan
//! después), salvo con `validation.strict = true`, donde hace fallar el stage.

use std::collections::HashSet;

use log::{info, warn};
use pipeflow_core::{ExecutionContext, Stage, StageError, StageKind, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params_value;
use crate::table::Table;

pub const STRICT_KEY: &str = "validation.strict";

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateParams {
    #[serde(default)]
    pub required_columns: Vec<String>,
    /// Descarta duplicados sobre las columnas requeridas (la fila completa si
    /// no hay ninguna). Se conserva la primera aparición.
    #[serde(default = "default_true")]
    pub dedupe: bool,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl Default for ValidateParams {
    fn default() -> Self {
        Self { required_columns: Vec::new(),
               dedupe: true,
               file_name: None }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CsvValidate {
    params: ValidateParams,
}

impl CsvValidate {
    pub fn new(params: ValidateParams) -> Self {
        Self { params }
    }
}

impl Stage for CsvValidate {
    fn kind(&self) -> StageKind {
        StageKind::Validate
    }

    fn code_version(&self) -> &str {
        "csv-validate/1"
    }

    fn params(&self) -> Value {
        params_value(&self.params)
    }

    fn relevant_config_keys(&self) -> Vec<String> {
        vec![STRICT_KEY.to_string()]
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        let (_, input) = ctx.single_input()?;
        let mut table = Table::read(input)?;
        let strict = ctx.config.get_bool(STRICT_KEY).unwrap_or(false);

        let mut required = Vec::with_capacity(self.params.required_columns.len());
        for col in &self.params.required_columns {
            let idx = match table.column(col) {
                Some(idx) => idx,
                None if strict => {
                    return Err(StageError::msg(format!("required column '{col}' missing in {}", input.display())))
                }
                None => {
                    warn!("validate: stage={} missing_column={col} action=create_empty", ctx.stage_name);
                    table.push_column(col.as_str())
                }
            };
            required.push(idx);
        }

        let before = table.len();
        table.rows.retain(|row| required.iter().all(|&i| !row[i].is_empty()));
        let incomplete = before - table.len();
        if incomplete > 0 {
            warn!("validate: stage={} dropped_incomplete={incomplete}", ctx.stage_name);
        }

        let mut duplicates = 0;
        if self.params.dedupe {
            let mut seen = HashSet::new();
            let before = table.len();
            table.rows.retain(|row| {
                          let key: Vec<&str> = if required.is_empty() {
                              row.iter().map(String::as_str).collect()
                          } else {
                              required.iter().map(|&i| row[i].as_str()).collect()
                          };
                          seen.insert(key.join("\u{1f}"))
                      });
            duplicates = before - table.len();
        }
        info!("validate: stage={} rows={} dropped_duplicates={duplicates}", ctx.stage_name, table.len());
        table.commit(ctx, self.params.file_name.as_deref().unwrap_or("validated.csv"))
    }
}
