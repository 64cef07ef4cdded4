//! Normalize: cabeceras en snake_case, celdas recortadas y marcadores de
//! nulo convertidos en celdas vacías.

use std::collections::BTreeMap;

use log::info;
use pipeflow_core::{ExecutionContext, Stage, StageError, StageKind, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params_value;
use crate::table::Table;

/// Clave de config con la lista de marcadores de nulo.
pub const NULL_TOKENS_KEY: &str = "normalize.null_tokens";
const DEFAULT_NULL_TOKENS: &[&str] = &["NA", "N/A", "null", "NaN"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeParams {
    /// Renombrado aplicado después de normalizar la cabecera.
    pub rename: BTreeMap<String, String>,
    /// Columnas descartadas (nombre ya normalizado).
    pub drop: Vec<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CsvNormalize {
    params: NormalizeParams,
}

impl CsvNormalize {
    pub fn new(params: NormalizeParams) -> Self {
        Self { params }
    }
}

fn normalize_header(raw: &str) -> String {
    raw.trim()
       .to_lowercase()
       .chars()
       .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
       .collect()
}

fn null_tokens(ctx: &ExecutionContext) -> Vec<String> {
    match ctx.config.get(NULL_TOKENS_KEY) {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(str::to_string).collect(),
        _ => DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect(),
    }
}

impl Stage for CsvNormalize {
    fn kind(&self) -> StageKind {
        StageKind::Normalize
    }

    fn code_version(&self) -> &str {
        "csv-normalize/1"
    }

    fn params(&self) -> Value {
        params_value(&self.params)
    }

    fn relevant_config_keys(&self) -> Vec<String> {
        vec![NULL_TOKENS_KEY.to_string()]
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        let (_, input) = ctx.single_input()?;
        let table = Table::read(input)?;
        let nulls = null_tokens(ctx);

        let headers: Vec<String> = table.headers
                                        .iter()
                                        .map(|h| {
                                            let h = normalize_header(h);
                                            self.params.rename.get(&h).cloned().unwrap_or(h)
                                        })
                                        .collect();
        let keep: Vec<usize> = (0..headers.len()).filter(|&i| !self.params.drop.contains(&headers[i]))
                                                 .collect();

        let mut out = Table::new(keep.iter().map(|&i| headers[i].clone()).collect());
        for row in &table.rows {
            out.rows.push(keep.iter()
                              .map(|&i| {
                                  let cell = row[i].trim();
                                  if nulls.iter().any(|n| n == cell) {
                                      String::new()
                                  } else {
                                      cell.to_string()
                                  }
                              })
                              .collect());
        }
        info!("normalize: stage={} columns={} rows={}", ctx.stage_name, out.headers.len(), out.len());
        out.commit(ctx, self.params.file_name.as_deref().unwrap_or("normalized.csv"))
    }
}
