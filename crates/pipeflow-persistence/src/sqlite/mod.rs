//! Registry de artifacts sobre SQLite (Diesel + r2d2).
//!
//! - Un único archivo de base de datos; WAL para lectores concurrentes.
//! - `commit` corre en `BEGIN IMMEDIATE`: el lock de escritura se toma al
//!   inicio, así dos commits del mismo stage quedan serializados y el segundo
//!   ve el resultado del primero al comprobar su guard.
//! - El índice parcial `artifacts_one_valid_per_stage` respalda la invariante
//!   de un solo artifact vigente por stage aunque otro proceso escriba sin
//!   pasar por aquí.
//! - Reintento con backoff ante `database is locked` sólo en lecturas. Un
//!   commit bloqueado falla en el primer intento con `Unavailable`: el
//!   orquestador lo registra como fallo del stage.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection};
use diesel::sqlite::SqliteConnection;
use log::{debug, info, warn};
use pipeflow_core::model::CommitGuard;
use pipeflow_core::{Artifact, ArtifactRegistry, ArtifactStatus, NewArtifact, RegistryError};
use uuid::Uuid;

use crate::config::DbConfig;
use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;
use crate::schema::{artifact_inputs, artifacts};

/// Alias de tipo para el pool r2d2 de conexiones SQLite.
pub type SqlitePool = r2d2::Pool<ConnectionManager<SqliteConnection>>;
pub type PooledConn = r2d2::PooledConnection<ConnectionManager<SqliteConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Contrato: devuelve una conexión válida o `PersistenceError::TransientIo`.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PooledConn, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un pool.
pub struct PoolProvider {
    pub pool: SqlitePool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PooledConn, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// PRAGMAs aplicados a cada conexión nueva del pool.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), r2d2::Error> {
        conn.batch_execute(&format!("PRAGMA busy_timeout = {};
                                     PRAGMA foreign_keys = ON;
                                     PRAGMA journal_mode = WAL;
                                     PRAGMA synchronous = NORMAL;",
                                    self.busy_timeout.as_millis()))
            .map_err(r2d2::Error::QueryError)
    }
}

/// Fila mapeada de la tabla `artifacts`.
#[derive(Queryable, Selectable, Debug)]
#[diesel(table_name = artifacts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArtifactRow {
    pub id: i64,
    pub stage_name: String,
    pub version: i64,
    pub input_hash: String,
    pub data_hash: String,
    pub code_hash: String,
    pub config_hash: String,
    pub output_path: String,
    pub content_hash: String,
    pub row_count: i64,
    pub created_at: String,
    pub status: String,
    pub run_id: Option<String>,
    pub metadata: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = artifacts)]
struct NewArtifactRow<'a> {
    stage_name: &'a str,
    version: i64,
    input_hash: &'a str,
    data_hash: &'a str,
    code_hash: &'a str,
    config_hash: &'a str,
    output_path: String,
    content_hash: &'a str,
    row_count: i64,
    created_at: String,
    status: &'a str,
    run_id: Option<String>,
    metadata: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = artifact_inputs)]
struct InputRow {
    artifact_id: i64,
    position: i32,
    input_id: i64,
}

/// Filas de `artifact_inputs` en el orden declarado de inputs.
fn input_rows(artifact_id: i64, inputs: &[i64]) -> Result<Vec<InputRow>, PersistenceError> {
    inputs.iter()
          .enumerate()
          .map(|(position, input_id)| {
              let position = i32::try_from(position).map_err(|e| corrupt(artifact_id, "input position", e))?;
              Ok(InputRow { artifact_id,
                            position,
                            input_id: *input_id })
          })
          .collect()
}

fn corrupt(id: i64, field: &str, e: impl std::fmt::Display) -> PersistenceError {
    PersistenceError::Corrupt(format!("artifact {id} {field}: {e}"))
}

fn to_artifact(row: ArtifactRow, inputs: Vec<i64>) -> Result<Artifact, PersistenceError> {
    let id = row.id;
    let created_at = DateTime::parse_from_rfc3339(&row.created_at).map_err(|e| corrupt(id, "created_at", e))?
                                                                  .with_timezone(&Utc);
    let status = ArtifactStatus::parse(&row.status).ok_or_else(|| corrupt(id, "status", &row.status))?;
    let run_id = row.run_id
                    .as_deref()
                    .map(Uuid::parse_str)
                    .transpose()
                    .map_err(|e| corrupt(id, "run_id", e))?;
    let metadata = serde_json::from_str(&row.metadata).map_err(|e| corrupt(id, "metadata", e))?;
    let row_count = u64::try_from(row.row_count).map_err(|e| corrupt(id, "row_count", e))?;
    Ok(Artifact { id,
                  stage_name: row.stage_name,
                  version: row.version,
                  input_hash: row.input_hash,
                  data_hash: row.data_hash,
                  code_hash: row.code_hash,
                  config_hash: row.config_hash,
                  output_path: PathBuf::from(row.output_path),
                  content_hash: row.content_hash,
                  row_count,
                  created_at,
                  status,
                  run_id,
                  inputs,
                  metadata })
}

/// Completa las filas con sus inputs (una sola consulta para todas).
fn hydrate(conn: &mut SqliteConnection, rows: Vec<ArtifactRow>) -> Result<Vec<Artifact>, PersistenceError> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let links: Vec<(i64, i64)> = artifact_inputs::table.filter(artifact_inputs::artifact_id.eq_any(&ids))
                                                       .order((artifact_inputs::artifact_id.asc(),
                                                               artifact_inputs::position.asc()))
                                                       .select((artifact_inputs::artifact_id, artifact_inputs::input_id))
                                                       .load(conn)?;
    let mut by_artifact: HashMap<i64, Vec<i64>> = HashMap::new();
    for (artifact_id, input_id) in links {
        by_artifact.entry(artifact_id).or_default().push(input_id);
    }
    rows.into_iter()
        .map(|r| {
            let inputs = by_artifact.remove(&r.id).unwrap_or_default();
            to_artifact(r, inputs)
        })
        .collect()
}

fn hydrate_one(conn: &mut SqliteConnection, row: Option<ArtifactRow>) -> Result<Option<Artifact>, PersistenceError> {
    match row {
        Some(row) => Ok(hydrate(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

/// Retry simple con backoff (hasta 3 reintentos: 15ms, 30ms, 45ms).
fn with_retry<F, T>(mut f: F) -> Result<T, PersistenceError>
    where F: FnMut() -> Result<T, PersistenceError>
{
    let mut attempts = 0;
    loop {
        match f() {
            Err(e) if e.is_retryable() && attempts < 3 => {
                let delay_ms = 15 * ((attempts + 1) as u64);
                warn!("retryable error (attempt {}): {e} -> sleeping {delay_ms}ms", attempts + 1);
                std::thread::sleep(Duration::from_millis(delay_ms));
                attempts += 1;
            }
            r => return r,
        }
    }
}

/// Implementación SQLite de `ArtifactRegistry`.
pub struct SqliteArtifactRegistry<P: ConnectionProvider = PoolProvider> {
    provider: P,
}

impl SqliteArtifactRegistry<PoolProvider> {
    /// Abre (o crea) la base de datos y aplica migraciones pendientes.
    pub fn open(cfg: &DbConfig) -> Result<Self, PersistenceError> {
        Ok(Self::new(PoolProvider { pool: build_pool(cfg)? }))
    }

    pub fn from_env() -> Result<Self, PersistenceError> {
        crate::config::init_dotenv();
        Self::open(&DbConfig::from_env())
    }
}

impl<P: ConnectionProvider> SqliteArtifactRegistry<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn read<T, F>(&self, mut f: F) -> Result<T, RegistryError>
        where F: FnMut(&mut SqliteConnection) -> Result<T, PersistenceError>
    {
        with_retry(|| {
            let mut conn = self.provider.connection()?;
            f(&mut conn)
        }).map_err(RegistryError::from)
    }

    /// Número total de filas (cualquier estado).
    pub fn count(&self) -> Result<i64, RegistryError> {
        self.read(|conn| Ok(artifacts::table.count().get_result(conn)?))
    }

    fn commit_in_tx(conn: &mut SqliteConnection, new: &NewArtifact) -> Result<Artifact, PersistenceError> {
        conn.immediate_transaction(|tx| {
                let prior: Option<i64> = artifacts::table.filter(artifacts::stage_name.eq(&new.stage_name))
                                                         .filter(artifacts::status.eq(ArtifactStatus::Valid.as_str()))
                                                         .select(artifacts::id)
                                                         .first(tx)
                                                         .optional()?;
                if let CommitGuard::ExpectPrior(expected) = new.guard {
                    if expected != prior {
                        debug!("commit:conflict stage={} expected={expected:?} found={prior:?}", new.stage_name);
                        return Err(PersistenceError::Conflict(new.stage_name.clone()));
                    }
                }
                let max_version: Option<i64> = artifacts::table.filter(artifacts::stage_name.eq(&new.stage_name))
                                                               .select(diesel::dsl::max(artifacts::version))
                                                               .first(tx)?;
                let version = max_version.unwrap_or(0) + 1;

                if let Some(prior_id) = prior {
                    diesel::update(artifacts::table.find(prior_id))
                        .set(artifacts::status.eq(ArtifactStatus::Superseded.as_str()))
                        .execute(tx)?;
                }
                let row_count = i64::try_from(new.row_count)
                    .map_err(|e| PersistenceError::CheckViolation(format!("row_count: {e}")))?;
                diesel::insert_into(artifacts::table)
                    .values(NewArtifactRow { stage_name: &new.stage_name,
                                             version,
                                             input_hash: &new.input_hash,
                                             data_hash: &new.data_hash,
                                             code_hash: &new.code_hash,
                                             config_hash: &new.config_hash,
                                             output_path: new.output_path.to_string_lossy().into_owned(),
                                             content_hash: &new.content_hash,
                                             row_count,
                                             created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                                             status: ArtifactStatus::Valid.as_str(),
                                             run_id: new.run_id.map(|u| u.to_string()),
                                             metadata: new.metadata.to_string() })
                    .execute(tx)?;
                let row: ArtifactRow = artifacts::table.filter(artifacts::stage_name.eq(&new.stage_name))
                                                       .filter(artifacts::version.eq(version))
                                                       .select(ArtifactRow::as_select())
                                                       .first(tx)?;
                let links = input_rows(row.id, &new.inputs)?;
                if !links.is_empty() {
                    diesel::insert_into(artifact_inputs::table).values(&links).execute(tx)?;
                }
                to_artifact(row, new.inputs.clone())
            })
    }
}

impl<P: ConnectionProvider> ArtifactRegistry for SqliteArtifactRegistry<P> {
    fn lookup(&self, stage_name: &str, input_hash: &str) -> Result<Option<Artifact>, RegistryError> {
        debug!("lookup stage={stage_name} input_hash={input_hash}");
        self.read(|conn| {
                let row = artifacts::table.filter(artifacts::stage_name.eq(stage_name))
                                          .filter(artifacts::input_hash.eq(input_hash))
                                          .filter(artifacts::status.eq(ArtifactStatus::Valid.as_str()))
                                          .select(ArtifactRow::as_select())
                                          .first(conn)
                                          .optional()?;
                hydrate_one(conn, row)
            })
    }

    fn latest_valid(&self, stage_name: &str) -> Result<Option<Artifact>, RegistryError> {
        self.read(|conn| {
                let row = artifacts::table.filter(artifacts::stage_name.eq(stage_name))
                                          .filter(artifacts::status.eq(ArtifactStatus::Valid.as_str()))
                                          .select(ArtifactRow::as_select())
                                          .first(conn)
                                          .optional()?;
                hydrate_one(conn, row)
            })
    }

    fn commit(&self, new: NewArtifact) -> Result<Artifact, RegistryError> {
        let stage = new.stage_name.clone();
        let artifact = self.provider
                           .connection()
                           .and_then(|mut conn| Self::commit_in_tx(&mut conn, &new))
                           .map_err(|e| {
                               warn!("commit:failed stage={stage} input_hash={} err={e}", new.input_hash);
                               e.into_registry_error(Some(&stage))
                           })?;
        info!("commit stage={} id={} version={} input_hash={}",
              artifact.stage_name,
              artifact.id,
              artifact.version,
              artifact.input_hash);
        Ok(artifact)
    }

    fn get(&self, id: i64) -> Result<Option<Artifact>, RegistryError> {
        self.read(|conn| {
                let row = artifacts::table.find(id)
                                          .select(ArtifactRow::as_select())
                                          .first(conn)
                                          .optional()?;
                hydrate_one(conn, row)
            })
    }

    fn list_versions(&self, stage_name: &str) -> Result<Vec<Artifact>, RegistryError> {
        self.read(|conn| {
                let rows = artifacts::table.filter(artifacts::stage_name.eq(stage_name))
                                           .order(artifacts::version.desc())
                                           .select(ArtifactRow::as_select())
                                           .load(conn)?;
                hydrate(conn, rows)
            })
    }

    fn list_valid(&self) -> Result<Vec<Artifact>, RegistryError> {
        self.read(|conn| {
                let rows = artifacts::table.filter(artifacts::status.eq(ArtifactStatus::Valid.as_str()))
                                           .order(artifacts::stage_name.asc())
                                           .select(ArtifactRow::as_select())
                                           .load(conn)?;
                hydrate(conn, rows)
            })
    }

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Artifact>, RegistryError> {
        self.read(|conn| {
                let row = artifacts::table.filter(artifacts::content_hash.eq(content_hash))
                                          .order(artifacts::id.desc())
                                          .select(ArtifactRow::as_select())
                                          .first(conn)
                                          .optional()?;
                hydrate_one(conn, row)
            })
    }

    fn mark_zombie(&self, id: i64) -> Result<(), RegistryError> {
        let found = self.read(|conn| {
                            let exists: i64 = artifacts::table.filter(artifacts::id.eq(id)).count().get_result(conn)?;
                            if exists == 0 {
                                return Ok(false);
                            }
                            diesel::update(artifacts::table.filter(artifacts::id.eq(id))
                                                           .filter(artifacts::status.eq(ArtifactStatus::Valid.as_str())))
                                .set(artifacts::status.eq(ArtifactStatus::Zombie.as_str()))
                                .execute(conn)?;
                            Ok(true)
                        })?;
        if !found {
            return Err(RegistryError::NotFound(id));
        }
        debug!("mark_zombie id={id}");
        Ok(())
    }
}

/// Construye el pool y aplica migraciones pendientes con la primera conexión.
pub fn build_pool(cfg: &DbConfig) -> Result<SqlitePool, PersistenceError> {
    if let Some(dir) = cfg.path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| PersistenceError::TransientIo(format!("create {}: {e}", dir.display())))?;
    }
    let manager = ConnectionManager::<SqliteConnection>::new(cfg.path.to_string_lossy());
    let pool = r2d2::Pool::builder().min_idle(Some(1))
                                    .max_size(cfg.max_connections.max(1))
                                    .connection_customizer(Box::new(ConnectionOptions { busy_timeout: cfg.busy_timeout }))
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    info!("registry:open path={} max_connections={}", cfg.path.display(), cfg.max_connections);
    Ok(pool)
}
