//! pipeflow-adapters: variantes concretas de `Stage`.
//!
//! - `connector`: contrato `produce() -> ruta` para fuentes de datos.
//! - `stages`: ingest, normalize, validate y merge sobre CSV.
//! - `pipeline`: carga de un pipeline declarado en JSON.
//!
//! La lógica de negocio es deliberadamente simple; al core sólo le importa el
//! contrato de `Stage`.

pub mod connector;
pub mod error;
pub mod pipeline;
pub mod stages;
pub mod table;

pub use connector::{Connector, LocalFileConnector};
pub use error::AdapterError;
pub use pipeline::{load_pipeline, Pipeline, PipelineFile, StageDef};
pub use stages::{CsvMerge, CsvNormalize, CsvValidate, IngestStage};
pub use table::Table;
