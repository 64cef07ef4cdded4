//! Errores de persistencia.
//! Mapea errores de Diesel / conexión a variantes semánticas y éstas a
//! `RegistryError` del core.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use pipeflow_core::RegistryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("unique violation: {0}")]
    UniqueViolation(String),
    #[error("check violation: {0}")]
    CheckViolation(String),
    #[error("foreign key violation: {0}")]
    ForeignKeyViolation(String),
    #[error("not found")]
    NotFound,
    /// El vigente del stage no es el esperado por el commit.
    #[error("conflicting commit on stage '{0}'")]
    Conflict(String),
    #[error("database busy: {0}")]
    Busy(String),
    #[error("transient IO / connection pool error: {0}")]
    TransientIo(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("unknown database error: {0}")]
    Unknown(String),
}

fn is_busy_message(msg: &str) -> bool {
    let m = msg.to_lowercase();
    m.contains("database is locked") || m.contains("database is busy") || m.contains("database table is locked")
}

impl From<DieselError> for PersistenceError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => Self::NotFound,
            DieselError::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation => Self::UniqueViolation(info.message().to_string()),
                DatabaseErrorKind::CheckViolation => Self::CheckViolation(info.message().to_string()),
                DatabaseErrorKind::ForeignKeyViolation => Self::ForeignKeyViolation(info.message().to_string()),
                _ if is_busy_message(info.message()) => Self::Busy(info.message().to_string()),
                other => Self::Unknown(format!("db error kind {:?}: {}", other, info.message())),
            },
            DieselError::DeserializationError(e) => Self::Corrupt(format!("deser: {e}")),
            DieselError::SerializationError(e) => Self::Unknown(format!("ser: {e}")),
            DieselError::AlreadyInTransaction => Self::Unknown("already in transaction".into()),
            DieselError::RollbackErrorOnCommit { rollback_error, commit_error } => {
                Self::Unknown(format!("rollback={rollback_error}; commit={commit_error}"))
            }
            DieselError::BrokenTransactionManager => Self::TransientIo("broken transaction manager".into()),
            DieselError::QueryBuilderError(e) => Self::Unknown(format!("query builder: {e}")),
            DieselError::RollbackTransaction => Self::Unknown("rollback transaction".into()),
            DieselError::NotInTransaction => Self::Unknown("not in transaction".into()),
            other => Self::Unknown(format!("unhandled diesel error: {other:?}")),
        }
    }
}

impl PersistenceError {
    /// Errores que vale la pena reintentar con backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy(_) | Self::TransientIo(_))
    }

    /// Clasificación hacia el core. `stage` da contexto a los conflictos de
    /// commit (violación del índice de un-vigente-por-stage incluida).
    pub fn into_registry_error(self, stage: Option<&str>) -> RegistryError {
        match self {
            Self::Conflict(stage) => RegistryError::ConcurrentModification { stage },
            Self::UniqueViolation(msg) => match stage {
                Some(stage) => RegistryError::ConcurrentModification { stage: stage.to_string() },
                None => RegistryError::Corrupt(format!("unique violation: {msg}")),
            },
            Self::Busy(msg) | Self::TransientIo(msg) => RegistryError::Unavailable(msg),
            Self::Corrupt(msg) => RegistryError::Corrupt(msg),
            other => RegistryError::Unavailable(other.to_string()),
        }
    }
}

impl From<PersistenceError> for RegistryError {
    fn from(e: PersistenceError) -> Self {
        e.into_registry_error(None)
    }
}
