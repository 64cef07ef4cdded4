//! Stages concretos sobre CSV. Cada uno es una variante etiquetada por su
//! `StageKind`; todos leen sus inputs del contexto y escriben un único
//! archivo de salida.

pub mod ingest;
pub mod merge;
pub mod normalize;
pub mod validate;

pub use ingest::IngestStage;
pub use merge::{CsvMerge, MergeParams};
pub use normalize::{CsvNormalize, NormalizeParams};
pub use validate::{CsvValidate, ValidateParams};

use serde::Serialize;
use serde_json::Value;

pub(crate) fn params_value<P: Serialize>(params: &P) -> Value {
    serde_json::to_value(params).unwrap_or(Value::Null)
}
