//! Orquestador: recorre el DAG, decide skip/run por fingerprint, ejecuta
//! stages en el pool de workers y registra cada transición en el
//! `PipelineRunState`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use rayon::ThreadPoolBuilder;
use uuid::Uuid;

use super::builder::OrchestratorBuilder;
use super::maintenance::{self, GcReport};
use super::report::{ExecutionPlan, PlanAction, PlannedStage, RunReason, RunSummary};
use super::settings::{EngineSettings, RunOptions};
use super::worker::{self, StageJob, StageOutcome, WorkerEnv, WorkerMsg};
use crate::cancel::CancelToken;
use crate::constants::TEMP_GRACE_SECS;
use crate::dag::Dag;
use crate::errors::{EngineError, RegistryError, StageFailure};
use crate::fingerprint::compute_fingerprint;
use crate::model::{Artifact, PipelineConfig};
use crate::registry::ArtifactRegistry;
use crate::state::{PipelineRunState, RunStateDocument, RunStateStore, RunStatus, SkipReason, StageState};

/// Motor de ejecución del pipeline.
///
/// Genérico sobre el backend de registry `R` y el almacén de estado `S`,
/// igual que en tests (memoria) y en producción (SQLite + JSON en disco).
pub struct Orchestrator<R, S>
    where R: ArtifactRegistry,
          S: RunStateStore
{
    pub(crate) dag: Dag,
    pub(crate) registry: Arc<R>,
    pub(crate) state_store: S,
    pub(crate) config: Arc<PipelineConfig>,
    pub(crate) settings: EngineSettings,
    pub(crate) cancel: CancelToken,
}

/// Stages elegidos para un run, ya validados contra el DAG.
#[derive(Debug)]
struct Selection {
    order: Vec<String>,
    selected: Vec<String>,
    excluded: Vec<String>,
    start_stage: Option<String>,
}

impl<R, S> Orchestrator<R, S>
    where R: ArtifactRegistry,
          S: RunStateStore
{
    pub fn builder(registry: R, state_store: S) -> OrchestratorBuilder<R, S> {
        OrchestratorBuilder::new(registry, state_store)
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token para cancelar desde otro hilo (p.ej. un handler de señal).
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn output_dir_for(&self, stage: &str) -> PathBuf {
        self.settings.artifact_root.join(stage)
    }

    pub fn run_history(&self) -> Result<RunStateDocument, EngineError> {
        Ok(self.state_store.load()?)
    }

    pub fn latest_run(&self) -> Result<Option<PipelineRunState>, EngineError> {
        Ok(self.state_store.load()?.latest().cloned())
    }

    fn select(&self, opts: &RunOptions) -> Result<Selection, EngineError> {
        let order = self.dag.topological_order()?;

        let mut roots: Vec<String> = opts.start_stage.iter().cloned().collect();
        if opts.resume && roots.is_empty() {
            let doc = self.state_store.load()?;
            if let Some(latest) = doc.latest() {
                roots = latest.resume_from.clone();
                if roots.is_empty() {
                    roots.extend(latest.resume_point.clone());
                }
            }
            if roots.is_empty() {
                info!("run:resume nothing failed in latest run, running all stages");
            } else {
                info!("run:resume from={}", roots.join(","));
            }
        }

        let candidates: HashSet<String> = if roots.is_empty() {
            order.iter().cloned().collect()
        } else {
            let mut union = HashSet::new();
            for root in &roots {
                union.extend(self.dag.subgraph_from(root)?);
            }
            union
        };
        let start_stage = roots.first().cloned();
        // también valida que los nombres de `skip` existan
        let kept: HashSet<String> = self.dag.subgraph_excluding(&opts.skip)?.into_iter().collect();
        let (selected, excluded): (Vec<String>, Vec<String>) = order.iter().cloned().partition(|n| {
            candidates.contains(n)
            && kept.contains(n)
            && self.dag
                   .get(n)
                   .is_some_and(|s| s.enabled && !opts.skip_kinds.contains(&s.runner.kind()))
        });
        Ok(Selection { order,
                       selected,
                       excluded,
                       start_stage })
    }

    /// Artifact de un stage excluido: su última versión válida, si existe.
    fn resolve_excluded(&self, name: &str) -> Result<Option<Artifact>, RegistryError> {
        self.registry
            .latest_valid(name)
            .inspect_err(|e| error!("stage:resolve_failed stage={name} err={e}"))
    }

    /// Stages fallidos o bloqueados cuyas dependencias no lo están: el
    /// origen de cada rama rota.
    fn failed_roots(&self, run: &PipelineRunState) -> Vec<String> {
        let broken = |n: &str| matches!(run.state_of(n), Some(StageState::Failed | StageState::Blocked));
        run.stages
           .keys()
           .filter(|n| broken(n))
           .filter(|n| {
               self.dag
                   .get(n)
                   .is_some_and(|s| !s.dependencies.iter().any(|d| broken(d)))
           })
           .cloned()
           .collect()
    }

    fn persist(&self, doc: &mut RunStateDocument, run: &PipelineRunState) -> Result<(), EngineError> {
        doc.upsert(run.clone());
        self.state_store.save(doc)?;
        Ok(())
    }

    /// Ejecuta el pipeline.
    ///
    /// Sólo abortan el run los errores de DAG, un destino no atómico y los
    /// fallos del documento de estado; cualquier otro fallo de stage queda
    /// registrado y bloquea únicamente a sus dependientes.
    pub fn run(&self, opts: &RunOptions) -> Result<RunSummary, EngineError> {
        let sel = self.select(opts)?;
        let run_id = Uuid::new_v4();
        let run_cancel = self.cancel.child();
        let mut doc = self.state_store.load()?;
        let mut run = PipelineRunState::new(run_id, &sel.order);
        run.start_stage = sel.start_stage.clone();
        run.excluded = sel.excluded.clone();
        info!("run:start run_id={run_id} stages={} selected={} workers={}",
              sel.order.len(),
              sel.selected.len(),
              self.settings.workers);

        let mut resolved: HashMap<String, Artifact> = HashMap::new();
        let mut unresolvable: HashMap<String, RegistryError> = HashMap::new();
        for name in &sel.excluded {
            let artifact = match self.resolve_excluded(name) {
                Ok(found) => found,
                Err(e) => {
                    unresolvable.insert(name.clone(), e);
                    None
                }
            };
            let rec = run.record_mut(name);
            rec.state = StageState::Skipped;
            rec.skip_reason = Some(SkipReason::Excluded);
            if let Some(e) = unresolvable.get(name) {
                rec.error = Some(e.to_string());
            }
            if let Some(a) = &artifact {
                rec.artifact_id = Some(a.id);
                rec.version = Some(a.version);
                rec.input_hash = Some(a.input_hash.clone());
            }
            info!("stage:skipped stage={name} reason=excluded artifact={:?}", artifact.as_ref().map(|a| a.id));
            if let Some(a) = artifact {
                resolved.insert(name.clone(), a);
            }
        }
        self.persist(&mut doc, &run)?;

        let pool = ThreadPoolBuilder::new().num_threads(self.settings.workers.max(1))
                                           .thread_name(|i| format!("pipeflow-worker-{i}"))
                                           .build()
                                           .map_err(|e| EngineError::Pool(e.to_string()))?;
        let (tx, rx) = mpsc::channel::<WorkerMsg>();
        let env = WorkerEnv { registry: self.registry.as_ref(),
                              config: &self.config,
                              settings: &self.settings,
                              run_id,
                              cancel: &run_cancel };

        let fatal = pool.in_place_scope(|scope| {
                            let mut fatal: Option<EngineError> = None;
                            let mut in_flight: HashSet<String> = HashSet::new();
                            loop {
                                if fatal.is_none() && !run_cancel.is_cancelled() {
                                    for job in
                                        self.ready_jobs(&sel.selected, &mut run, &resolved, &unresolvable, &in_flight)
                                    {
                                        in_flight.insert(job.name.clone());
                                        let tx = tx.clone();
                                        let env = &env;
                                        scope.spawn(move |_| {
                                                 let name = job.name.clone();
                                                 let outcome =
                                                     std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                                                         worker::execute_stage(job, env, &tx)
                                                     })).unwrap_or_else(|_| StageOutcome::Failed {
                                                            failure: StageFailure::Panicked("worker panicked".into()),
                                                            input_hash: None });
                                                 let _ = tx.send(WorkerMsg::Finished { stage: name, outcome });
                                             });
                                    }
                                    if let Err(e) = self.persist(&mut doc, &run) {
                                        fatal.get_or_insert(e);
                                        run_cancel.cancel();
                                    }
                                }
                                if in_flight.is_empty() {
                                    break;
                                }
                                let Ok(msg) = rx.recv() else {
                                    break;
                                };
                                if let Some(e) = self.apply(msg, &mut run, &mut resolved, &mut in_flight) {
                                    fatal.get_or_insert(e);
                                    run_cancel.cancel();
                                }
                                if let Err(e) = self.persist(&mut doc, &run) {
                                    fatal.get_or_insert(e);
                                    run_cancel.cancel();
                                }
                            }
                            fatal
                        });

        let cancelled = run_cancel.is_cancelled() && fatal.is_none();
        let reason = if fatal.is_some() { "run aborted" } else { "cancelled" };
        for name in &sel.selected {
            let rec = run.record_mut(name);
            if rec.state == StageState::Pending {
                rec.state = StageState::Blocked;
                rec.error = Some(reason.to_string());
            }
        }
        run.finish(cancelled);
        run.resume_from = self.failed_roots(&run);
        if fatal.is_some() {
            run.status = RunStatus::Failed;
        }
        self.persist(&mut doc, &run)?;

        if let Some(e) = fatal {
            error!("run:aborted run_id={run_id} err={e}");
            return Err(e);
        }
        let summary = RunSummary::from_state(&run);
        info!("run:done run_id={run_id} status={} executed={} skipped={} excluded={} failed={} blocked={}",
              summary.status,
              summary.executed.len(),
              summary.skipped.len(),
              summary.excluded.len(),
              summary.failed.len(),
              summary.blocked.len());
        Ok(summary)
    }

    /// Propaga bloqueos y devuelve los stages listos para despachar. Recorre
    /// en orden topológico, así un bloqueo alcanza a toda la descendencia en
    /// una sola pasada.
    fn ready_jobs(&self,
                  selected: &[String],
                  run: &mut PipelineRunState,
                  resolved: &HashMap<String, Artifact>,
                  unresolvable: &HashMap<String, RegistryError>,
                  in_flight: &HashSet<String>)
                  -> Vec<StageJob> {
        let mut jobs = Vec::new();
        for name in selected {
            if run.state_of(name) != Some(StageState::Pending) || in_flight.contains(name) {
                continue;
            }
            let Some(spec) = self.dag.get(name) else { continue };
            let broken = spec.dependencies
                             .iter()
                             .find(|d| matches!(run.state_of(d), Some(StageState::Failed | StageState::Blocked)));
            if let Some(dep) = broken {
                let rec = run.record_mut(name);
                rec.state = StageState::Blocked;
                rec.error = Some(format!("upstream '{dep}' did not complete"));
                rec.finished_at = Some(chrono::Utc::now());
                warn!("stage:blocked stage={name} upstream={dep}");
                continue;
            }
            if !spec.dependencies.iter().all(|d| run.state_of(d).is_some_and(|s| s.is_satisfied())) {
                continue;
            }
            // el registry no pudo resolver un upstream excluido
            if let Some((dep, e)) = spec.dependencies.iter().find_map(|d| unresolvable.get(d).map(|e| (d, e))) {
                let failure = StageFailure::Registry(e.clone());
                let rec = run.record_mut(name);
                rec.state = StageState::Failed;
                rec.error = Some(failure.to_string());
                rec.finished_at = Some(chrono::Utc::now());
                error!("stage:failed stage={name} upstream={dep} err={failure}");
                continue;
            }
            let mut inputs = Vec::new();
            let mut unresolved = Vec::new();
            for dep in &spec.dependencies {
                match resolved.get(dep) {
                    Some(a) => inputs.push((dep.clone(), a.clone())),
                    None => unresolved.push(dep.clone()),
                }
            }
            jobs.push(StageJob { name: name.clone(),
                                 runner: Arc::clone(&spec.runner),
                                 inputs,
                                 unresolved,
                                 timeout: spec.timeout.or(self.settings.stage_timeout),
                                 output_dir: self.output_dir_for(name) });
        }
        jobs
    }

    /// Aplica un mensaje de worker al estado del run. Devuelve el error fatal
    /// si el fallo debe abortar el run.
    fn apply(&self,
             msg: WorkerMsg,
             run: &mut PipelineRunState,
             resolved: &mut HashMap<String, Artifact>,
             in_flight: &mut HashSet<String>)
             -> Option<EngineError> {
        let now = chrono::Utc::now();
        match msg {
            WorkerMsg::Started { stage, input_hash } => {
                let rec = run.record_mut(&stage);
                rec.state = StageState::Running;
                rec.started_at = Some(now);
                info!("stage:running stage={stage} input_hash={input_hash}");
                rec.input_hash = Some(input_hash);
                None
            }
            WorkerMsg::Finished { stage, outcome } => {
                in_flight.remove(&stage);
                let rec = run.record_mut(&stage);
                rec.finished_at = Some(now);
                match outcome {
                    StageOutcome::Skipped { artifact, reason } => {
                        rec.state = StageState::Skipped;
                        rec.skip_reason = Some(reason);
                        rec.input_hash = Some(artifact.input_hash.clone());
                        rec.artifact_id = Some(artifact.id);
                        rec.version = Some(artifact.version);
                        rec.row_count = Some(artifact.row_count);
                        info!("stage:skipped stage={stage} reason={reason:?} artifact={} version={}",
                              artifact.id,
                              artifact.version);
                        resolved.insert(stage, artifact);
                        None
                    }
                    StageOutcome::Committed { artifact } => {
                        rec.state = StageState::Committed;
                        rec.artifact_id = Some(artifact.id);
                        rec.version = Some(artifact.version);
                        rec.row_count = Some(artifact.row_count);
                        info!("stage:committed stage={stage} artifact={} version={} rows={} hash={}",
                              artifact.id,
                              artifact.version,
                              artifact.row_count,
                              artifact.content_hash);
                        resolved.insert(stage, artifact);
                        None
                    }
                    StageOutcome::Failed { failure, input_hash } => {
                        rec.state = StageState::Failed;
                        rec.error = Some(failure.to_string());
                        if input_hash.is_some() {
                            rec.input_hash = input_hash;
                        }
                        error!("stage:failed stage={stage} err={failure}");
                        match failure {
                            StageFailure::Stage(source) if source.is_non_atomic_target() => {
                                Some(EngineError::NonAtomicTarget { stage, source })
                            }
                            _ => None,
                        }
                    }
                }
            }
        }
    }

    /// Dry-run: calcula fingerprints y decisiones sin invocar stages ni
    /// escribir en el registry ni en el estado.
    pub fn plan(&self, opts: &RunOptions) -> Result<ExecutionPlan, EngineError> {
        let sel = self.select(opts)?;
        let excluded: HashSet<&String> = sel.excluded.iter().collect();
        let mut resolved: HashMap<String, Artifact> = HashMap::new();
        let mut actions: HashMap<String, PlanAction> = HashMap::new();
        let mut plan = ExecutionPlan::default();

        for name in &sel.order {
            let Some(spec) = self.dag.get(name) else { continue };
            let mut input_hash = None;
            let action = if excluded.contains(name) {
                let artifact = self.resolve_excluded(name)?;
                let id = artifact.as_ref().map(|a| a.id);
                if let Some(a) = artifact {
                    resolved.insert(name.clone(), a);
                }
                PlanAction::Excluded { artifact_id: id }
            } else if let Some(dep) = spec.dependencies
                                          .iter()
                                          .find(|d| matches!(actions.get(*d), Some(PlanAction::Blocked { .. })))
            {
                PlanAction::Blocked { reason: format!("upstream '{dep}' blocked") }
            } else if spec.dependencies.iter().any(|d| matches!(actions.get(d), Some(PlanAction::Run { .. }))) {
                PlanAction::Run { reason: RunReason::UpstreamWillRun }
            } else {
                let mut inputs = Vec::new();
                let mut missing = None;
                for dep in &spec.dependencies {
                    match resolved.get(dep) {
                        Some(a) if a.output_path.is_file() => inputs.push((dep.clone(), a.clone())),
                        _ => {
                            missing = Some(dep.clone());
                            break;
                        }
                    }
                }
                match missing {
                    Some(dep) => PlanAction::Blocked { reason: format!("no usable artifact for upstream '{dep}'") },
                    None => {
                        let data = worker::data_inputs(spec.runner.as_ref(), &inputs);
                        match compute_fingerprint(spec.runner.as_ref(), &data, &self.config) {
                            Err(e) => PlanAction::Blocked { reason: e.to_string() },
                            Ok(fp) => {
                                let hit = match self.registry.lookup(name, &fp.input_hash) {
                                    Ok(hit) => hit,
                                    Err(e) if self.settings.lookup_failure_as_miss => {
                                        warn!("plan:lookup_failed stage={name} err={e} (treated as miss)");
                                        None
                                    }
                                    Err(e) => return Err(e.into()),
                                };
                                input_hash = Some(fp.input_hash);
                                match hit {
                                    Some(a) if !self.settings.verify_outputs_on_skip || worker::output_matches(&a) => {
                                        let action = PlanAction::Skip { artifact_id: a.id,
                                                                        version: a.version };
                                        resolved.insert(name.clone(), a);
                                        action
                                    }
                                    Some(_) => PlanAction::Run { reason: RunReason::OutputMismatch },
                                    None => PlanAction::Run { reason: RunReason::NoMatchingArtifact },
                                }
                            }
                        }
                    }
                }
            };
            actions.insert(name.clone(), action.clone());
            plan.stages.push(PlannedStage { stage: name.clone(),
                                            input_hash,
                                            action });
        }
        Ok(plan)
    }

    /// Marca como zombie los artifacts válidos cuyo archivo falta o cambió.
    pub fn reconcile(&self) -> Result<Vec<Artifact>, EngineError> {
        Ok(self.registry.reconcile()?)
    }

    /// Lista (y con `apply` borra) archivos bajo la raíz de artifacts sin fila
    /// válida que los respalde y temporales huérfanos. Con `apply` reconcilia
    /// antes el registry.
    pub fn gc(&self, apply: bool, protected: &[PathBuf]) -> Result<GcReport, EngineError> {
        let mut zombies = Vec::new();
        if apply {
            zombies = self.reconcile()?.into_iter().map(|a| a.id).collect();
        }
        let mut report = maintenance::collect_garbage(self.registry.as_ref(),
                                                     &self.settings.artifact_root,
                                                     apply,
                                                     protected,
                                                     Duration::from_secs(TEMP_GRACE_SECS))?;
        report.zombies = zombies;
        Ok(report)
    }

    /// Borra las salidas vigentes de `stages` (todas si está vacío). Las filas
    /// del registry no se tocan; el siguiente run detecta el archivo ausente
    /// y re-ejecuta.
    pub fn clean(&self, stages: &[String], apply: bool) -> Result<Vec<PathBuf>, EngineError> {
        let targets: Vec<String> = if stages.is_empty() {
            self.dag.topological_order()?
        } else {
            for s in stages {
                self.dag.dependencies_of(s)?;
            }
            stages.to_vec()
        };
        let mut out = Vec::new();
        for stage in &targets {
            let Some(art) = self.registry.latest_valid(stage)? else { continue };
            if !art.output_path.exists() {
                continue;
            }
            if apply {
                maintenance::remove_file(&art.output_path)?;
                info!("clean:removed stage={stage} path={}", art.output_path.display());
            }
            out.push(art.output_path);
        }
        Ok(out)
    }

    pub fn artifact_root(&self) -> &Path {
        &self.settings.artifact_root
    }
}
