use std::path::PathBuf;

/// Resultado de una invocación exitosa: el archivo final (ya renombrado),
/// su número de filas y, si el stage lo conoce, el esquema de columnas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageResult {
    pub output_path: PathBuf,
    pub row_count: u64,
    pub schema: Vec<String>,
}

impl StageResult {
    pub fn new(output_path: impl Into<PathBuf>, row_count: u64) -> Self {
        Self { output_path: output_path.into(),
               row_count,
               schema: Vec::new() }
    }

    pub fn with_schema<I, S>(mut self, columns: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.schema = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Formato de la salida según su extensión (`csv`, `json`, ...).
    pub fn format(&self) -> Option<String> {
        self.output_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}
