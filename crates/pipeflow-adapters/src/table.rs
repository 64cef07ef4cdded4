//! Tabla CSV en memoria compartida por los stages de este crate.
//!
//! Las celdas se guardan como texto; una celda vacía equivale a "sin valor".
//! La escritura siempre pasa por el `AtomicWriter` del contexto para que el
//! orquestador pueda verificar el commit del archivo.

use std::io;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use pipeflow_core::{ExecutionContext, StageError, StageResult};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: Vec<String>) -> Self {
        Self { headers,
               rows: Vec::new() }
    }

    /// Lee un CSV con cabecera. Las filas cortas se completan con celdas
    /// vacías; las largas se truncan al ancho de la cabecera.
    pub fn read(path: &Path) -> Result<Self, StageError> {
        let mut reader = ReaderBuilder::new().has_headers(true)
                                             .flexible(true)
                                             .from_path(path)
                                             .map_err(|e| {
                                                 StageError::with_source(format!("cannot open {}", path.display()),
                                                                         e)
                                             })?;
        let headers: Vec<String> =
            reader.headers()
                  .map_err(|e| StageError::with_source(format!("cannot read header of {}", path.display()), e))?
                  .iter()
                  .map(str::to_string)
                  .collect();
        let width = headers.len();
        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                                   StageError::with_source(format!("{}: bad record {}", path.display(), line + 1), e)
                               })?;
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(width, String::new());
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Añade una columna vacía y devuelve su índice.
    pub fn push_column(&mut self, name: impl Into<String>) -> usize {
        self.headers.push(name.into());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.headers.len() - 1
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write_csv<W: io::Write>(&self, out: W) -> io::Result<()> {
        let mut writer = WriterBuilder::new().from_writer(out);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()
    }

    /// Escribe la tabla en `output_dir/file_name` y devuelve el resultado del
    /// stage con el número de filas y los encabezados como esquema.
    pub fn commit(&self, ctx: &ExecutionContext, file_name: &str) -> Result<StageResult, StageError> {
        let out = ctx.output_path(file_name);
        ctx.writer().write_atomically(&out, |w| self.write_csv(w))?;
        Ok(StageResult::new(out, self.rows.len() as u64).with_schema(self.headers.iter().cloned()))
    }
}
