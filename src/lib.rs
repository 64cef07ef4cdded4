//! pipeflow: CLI del motor de pipelines.
//!
//! Carga un pipeline declarado en JSON (`pipeflow-adapters`), abre el
//! registry SQLite (`pipeflow-persistence`) y delega en el orquestador de
//! `pipeflow-core`.

pub mod app;
pub mod cli;
pub mod logging;

pub use app::App;
pub use cli::{Cli, Command};
