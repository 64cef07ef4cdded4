//! Merge (aggregate): outer join de todos los inputs por una columna clave.
//!
//! Las filas de salida se ordenan por clave. La columna `flag_column` marca
//! las filas con alguna celda vacía tras el join.

use std::collections::BTreeMap;

use log::{info, warn};
use pipeflow_core::{ExecutionContext, Stage, StageError, StageKind, StageResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::params_value;
use crate::table::Table;

fn default_flag() -> String {
    "missing_data_flag".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeParams {
    pub key: String,
    #[serde(default = "default_flag")]
    pub flag_column: String,
    #[serde(default)]
    pub file_name: Option<String>,
}

impl MergeParams {
    pub fn on(key: impl Into<String>) -> Self {
        Self { key: key.into(),
               flag_column: default_flag(),
               file_name: None }
    }
}

#[derive(Debug, Clone)]
pub struct CsvMerge {
    params: MergeParams,
}

impl CsvMerge {
    pub fn new(params: MergeParams) -> Self {
        Self { params }
    }
}

impl Stage for CsvMerge {
    fn kind(&self) -> StageKind {
        StageKind::Aggregate
    }

    fn code_version(&self) -> &str {
        "csv-merge/1"
    }

    fn params(&self) -> Value {
        params_value(&self.params)
    }

    fn run(&self, ctx: &ExecutionContext) -> Result<StageResult, StageError> {
        if ctx.inputs.is_empty() {
            return Err(StageError::msg(format!("stage '{}' has nothing to merge", ctx.stage_name)));
        }
        let key = &self.params.key;

        // (tabla, índice de la clave, offset de sus columnas en la salida)
        let mut sources = Vec::with_capacity(ctx.inputs.len());
        let mut headers = vec![key.clone()];
        for (stage, path) in &ctx.inputs {
            let table = Table::read(path)?;
            let key_idx = table.column(key)
                               .ok_or_else(|| StageError::msg(format!("input '{stage}' has no column '{key}'")))?;
            let offset = headers.len() - 1;
            for (i, h) in table.headers.iter().enumerate() {
                if i == key_idx {
                    continue;
                }
                let name = if headers.contains(h) { format!("{stage}.{h}") } else { h.clone() };
                headers.push(name);
            }
            sources.push((table, key_idx, offset));
        }
        let width = headers.len() - 1;

        let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut skipped = 0usize;
        for (table, key_idx, offset) in &sources {
            for row in &table.rows {
                if row[*key_idx].is_empty() {
                    skipped += 1;
                    continue;
                }
                let cells = merged.entry(row[*key_idx].clone()).or_insert_with(|| vec![String::new(); width]);
                let values = row.iter().enumerate().filter(|(i, _)| i != key_idx).map(|(_, v)| v);
                for (slot, value) in cells[*offset..].iter_mut().zip(values) {
                    if !value.is_empty() {
                        slot.clone_from(value);
                    }
                }
            }
        }
        if skipped > 0 {
            warn!("merge: stage={} rows_without_key={skipped}", ctx.stage_name);
        }

        headers.push(self.params.flag_column.clone());
        let mut out = Table::new(headers);
        for (k, cells) in merged {
            let incomplete = cells.iter().any(String::is_empty);
            let mut row = Vec::with_capacity(width + 2);
            row.push(k);
            row.extend(cells);
            row.push(incomplete.to_string());
            out.rows.push(row);
        }
        info!("merge: stage={} inputs={} rows={}", ctx.stage_name, sources.len(), out.len());
        out.commit(ctx, self.params.file_name.as_deref().unwrap_or("merged.csv"))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn outer_join_on_key_with_missing_flag() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("bp.csv"), "date,sys\n2024-01-02,118\n2024-01-01,120\n").unwrap();
        fs::write(dir.path().join("hr.csv"), "date,hr,sys\n2024-01-01,70,x\n2024-01-03,65,y\n").unwrap();
        let ctx = ExecutionContext::new("merge", dir.path().join("out")).with_input("bp", dir.path().join("bp.csv"))
                                                                        .with_input("hr", dir.path().join("hr.csv"));

        let res = CsvMerge::new(MergeParams::on("date")).run(&ctx).unwrap();
        assert_eq!(res.row_count, 3);
        assert_eq!(fs::read_to_string(res.output_path).unwrap(),
                   "date,sys,hr,hr.sys,missing_data_flag\n\
                    2024-01-01,120,70,x,false\n\
                    2024-01-02,118,,,true\n\
                    2024-01-03,,65,y,true\n");
    }

    #[test]
    fn missing_key_column_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.csv"), "day,v\n1,2\n").unwrap();
        let ctx = ExecutionContext::new("merge", dir.path().join("out")).with_input("a", dir.path().join("a.csv"));
        assert!(CsvMerge::new(MergeParams::on("date")).run(&ctx).is_err());
        let empty = ExecutionContext::new("merge", dir.path().join("out"));
        assert!(CsvMerge::new(MergeParams::on("date")).run(&empty).is_err());
    }
}
