//! Evaluación de un stage dentro de un worker del pool.
//!
//! Secuencia: gates de inputs -> fingerprint -> lookup -> (skip | invocar ->
//! verificar commit del writer -> `Registry::commit`). El worker nunca
//! modifica el `PipelineRunState`; informa al scheduler por canal.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, warn};
use serde_json::json;
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::errors::{RegistryError, StageError, StageFailure};
use crate::fingerprint::{compute_fingerprint, DataInput};
use crate::hashing::hash_file;
use crate::model::{Artifact, ExecutionContext, NewArtifact, PipelineConfig};
use crate::registry::ArtifactRegistry;
use crate::stage::{Stage, StageResult};
use crate::state::SkipReason;
use crate::writer::AtomicWriter;

use super::settings::EngineSettings;

/// Trabajo preparado por el scheduler para un stage listo.
pub(crate) struct StageJob {
    pub name: String,
    pub runner: Arc<dyn Stage>,
    /// Artifacts upstream resueltos, ordenados por nombre de stage.
    pub inputs: Vec<(String, Artifact)>,
    /// Dependencias sin artifact válido (excluidas sin historial).
    pub unresolved: Vec<String>,
    pub timeout: Option<Duration>,
    pub output_dir: PathBuf,
}

/// Lo que el worker comparte (por referencia) con el scheduler.
pub(crate) struct WorkerEnv<'a, R: ?Sized> {
    pub registry: &'a R,
    pub config: &'a Arc<PipelineConfig>,
    pub settings: &'a EngineSettings,
    pub run_id: Uuid,
    pub cancel: &'a CancelToken,
}

#[derive(Debug)]
pub(crate) enum StageOutcome {
    Skipped { artifact: Artifact, reason: SkipReason },
    Committed { artifact: Artifact },
    Failed { failure: StageFailure, input_hash: Option<String> },
}

#[derive(Debug)]
pub(crate) enum WorkerMsg {
    Started { stage: String, input_hash: String },
    Finished { stage: String, outcome: StageOutcome },
}

/// `true` si el archivo del artifact existe y conserva su content hash.
pub(crate) fn output_matches(artifact: &Artifact) -> bool {
    hash_file(&artifact.output_path).map(|h| h == artifact.content_hash).unwrap_or(false)
}

pub(crate) fn data_inputs(runner: &dyn Stage, inputs: &[(String, Artifact)]) -> Vec<DataInput> {
    inputs.iter()
          .map(|(dep, art)| DataInput::upstream(dep, &art.output_path))
          .chain(runner.external_inputs().into_iter().map(DataInput::external))
          .collect()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Ejecuta `runner.run(ctx)` capturando panics y aplicando el timeout. Al
/// expirar se cancela `token`: el writer de la invocación ya no podrá
/// renombrar nada aunque el hilo siga vivo.
fn invoke(runner: Arc<dyn Stage>,
          ctx: ExecutionContext,
          timeout: Option<Duration>,
          token: &CancelToken)
          -> Result<StageResult, StageFailure> {
    let Some(limit) = timeout else {
        return match panic::catch_unwind(AssertUnwindSafe(|| runner.run(&ctx))) {
            Ok(res) => res.map_err(StageFailure::from),
            Err(payload) => Err(StageFailure::Panicked(panic_message(payload))),
        };
    };

    let (tx, rx) = mpsc::channel();
    let name = ctx.stage_name.clone();
    thread::Builder::new().name(format!("pipeflow-stage-{name}"))
                          .spawn(move || {
                              let res = panic::catch_unwind(AssertUnwindSafe(|| runner.run(&ctx)));
                              let _ = tx.send(res.map_err(panic_message));
                          })
                          .map_err(|e| StageFailure::Stage(StageError::with_source("cannot spawn stage thread", e)))?;

    match rx.recv_timeout(limit) {
        Ok(Ok(res)) => res.map_err(StageFailure::from),
        Ok(Err(msg)) => Err(StageFailure::Panicked(msg)),
        Err(RecvTimeoutError::Timeout) => {
            token.cancel();
            warn!("stage:timeout stage={name} limit={limit:?}");
            Err(StageFailure::Timeout(limit))
        }
        Err(RecvTimeoutError::Disconnected) => Err(StageFailure::Panicked("stage thread exited without result".into())),
    }
}

pub(crate) fn execute_stage<R>(job: StageJob, env: &WorkerEnv<'_, R>, tx: &Sender<WorkerMsg>) -> StageOutcome
    where R: ArtifactRegistry + ?Sized
{
    let failed = |failure: StageFailure, input_hash: Option<String>| StageOutcome::Failed { failure, input_hash };
    let name = job.name.as_str();

    if let Some(dep) = job.unresolved.first() {
        return failed(StageFailure::UnresolvedInput(dep.clone()), None);
    }
    // gate: todo input resuelto debe existir en disco
    for (dep, art) in &job.inputs {
        if !art.output_path.is_file() {
            return failed(StageFailure::MissingInput { stage: dep.clone(),
                                                       path: art.output_path.clone() },
                          None);
        }
    }

    let fp = match compute_fingerprint(job.runner.as_ref(), &data_inputs(job.runner.as_ref(), &job.inputs), env.config) {
        Ok(fp) => fp,
        Err(e) => return failed(e.into(), None),
    };
    let input_hash = fp.input_hash.clone();
    debug!("stage:fingerprint stage={name} input_hash={input_hash} data={} code={} config={}",
           fp.data_hash,
           fp.code_hash,
           fp.config_hash);

    let hit = match env.registry.lookup(name, &input_hash) {
        Ok(hit) => hit,
        Err(e) if env.settings.lookup_failure_as_miss => {
            warn!("stage:lookup_failed stage={name} err={e} (treated as miss)");
            None
        }
        Err(e) => return failed(e.into(), Some(input_hash)),
    };

    if let Some(artifact) = hit {
        if !env.settings.verify_outputs_on_skip || output_matches(&artifact) {
            return StageOutcome::Skipped { artifact,
                                           reason: SkipReason::CacheHit };
        }
        warn!("stage:cache_hit_discarded stage={name} artifact={} path={} (missing or altered)",
              artifact.id,
              artifact.output_path.display());
        if let Err(e) = env.registry.mark_zombie(artifact.id) {
            return failed(e.into(), Some(input_hash));
        }
    }

    let prior = match env.registry.latest_valid(name) {
        Ok(prior) => prior.map(|a| a.id),
        Err(e) => return failed(e.into(), Some(input_hash)),
    };

    let _ = tx.send(WorkerMsg::Started { stage: job.name.clone(),
                                         input_hash: input_hash.clone() });

    let token = env.cancel.child();
    let writer = AtomicWriter::with_cancel(token.clone());
    let mut ctx = ExecutionContext::new(name, &job.output_dir).with_run_id(env.run_id)
                                                               .with_config(Arc::clone(env.config))
                                                               .with_params(job.runner.params())
                                                               .with_writer(writer.clone());
    for (dep, art) in &job.inputs {
        ctx = ctx.with_input(dep.clone(), art.output_path.clone());
    }

    let result = match invoke(Arc::clone(&job.runner), ctx, job.timeout, &token) {
        Ok(r) => r,
        Err(f) => return failed(f, Some(input_hash)),
    };
    if token.is_cancelled() {
        return failed(StageFailure::Cancelled, Some(input_hash));
    }
    let Some(content_hash) = writer.committed_hash(&result.output_path) else {
        return failed(StageFailure::OutputNotCommitted(result.output_path), Some(input_hash));
    };

    let metadata = json!({
        "kind": job.runner.kind().as_str(),
        "code_version": job.runner.code_version(),
        "format": result.format(),
        "schema": result.schema,
    });
    let new = NewArtifact::new(name, input_hash.clone(), result.output_path, content_hash, result.row_count)
        .with_fingerprint(&fp)
        .with_run_id(env.run_id)
        .with_inputs(job.inputs.iter().map(|(_, a)| a.id).collect())
        .with_metadata(metadata)
        .expecting_prior(prior);

    match env.registry.commit(new) {
        Ok(artifact) => StageOutcome::Committed { artifact },
        Err(RegistryError::ConcurrentModification { stage }) if env.settings.retry_on_conflict => {
            warn!("stage:commit_conflict stage={stage} input_hash={input_hash}, re-checking registry");
            match env.registry.lookup(name, &input_hash) {
                Ok(Some(artifact)) => StageOutcome::Skipped { artifact,
                                                              reason: SkipReason::ConcurrentCommit },
                Ok(None) => failed(RegistryError::ConcurrentModification { stage }.into(), Some(input_hash)),
                Err(e) => failed(e.into(), Some(input_hash)),
            }
        }
        Err(e) => failed(e.into(), Some(input_hash)),
    }
}
