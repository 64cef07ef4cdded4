//! pipeflow-persistence
//!
//! Registry de artifacts durable sobre SQLite (Diesel + r2d2), con las
//! mismas invariantes que el backend en memoria del core.
//!
//! Módulos:
//! - `sqlite`: pool de conexiones e implementación de `ArtifactRegistry`.
//! - `migrations`: runner embebido de migraciones Diesel.
//! - `config`: carga de configuración desde .env.
//! - `schema`: tablas Diesel declaradas para compilar queries.

pub mod config;
pub mod error;
pub mod migrations;
pub mod schema;
pub mod sqlite;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use sqlite::{build_pool, ConnectionProvider, PoolProvider, SqliteArtifactRegistry, SqlitePool};
