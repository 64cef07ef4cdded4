//! Builder para `Orchestrator`.
//!
//! Acumula stages, configuración y parámetros del motor. `build` valida el
//! grafo completo (referencias y ciclos) antes de devolver el orquestador,
//! así un DAG inválido nunca llega a ejecutar nada.

use std::sync::Arc;

use crate::cancel::CancelToken;
use crate::dag::Dag;
use crate::errors::DagError;
use crate::model::PipelineConfig;
use crate::registry::ArtifactRegistry;
use crate::stage::StageSpec;
use crate::state::RunStateStore;

use super::core::Orchestrator;
use super::settings::EngineSettings;

pub struct OrchestratorBuilder<R, S>
    where R: ArtifactRegistry,
          S: RunStateStore
{
    registry: Arc<R>,
    state_store: S,
    dag: Dag,
    config: PipelineConfig,
    settings: EngineSettings,
    cancel: CancelToken,
}

impl<R, S> OrchestratorBuilder<R, S>
    where R: ArtifactRegistry,
          S: RunStateStore
{
    pub fn new(registry: R, state_store: S) -> Self {
        Self::with_shared_registry(Arc::new(registry), state_store)
    }

    /// Para compartir un mismo registry entre varios orquestadores.
    pub fn with_shared_registry(registry: Arc<R>, state_store: S) -> Self {
        Self { registry,
               state_store,
               dag: Dag::new(),
               config: PipelineConfig::default(),
               settings: EngineSettings::default(),
               cancel: CancelToken::new() }
    }

    /// Sólo falla con nombres duplicados; dependencias desconocidas y ciclos
    /// se detectan en `build`.
    pub fn add_stage(mut self, spec: StageSpec) -> Result<Self, DagError> {
        self.dag.add_stage(spec)?;
        Ok(self)
    }

    pub fn stages<I>(mut self, specs: I) -> Result<Self, DagError>
        where I: IntoIterator<Item = StageSpec>
    {
        for spec in specs {
            self.dag.add_stage(spec)?;
        }
        Ok(self)
    }

    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Token externo (p.ej. compartido con un handler de Ctrl-C).
    pub fn cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn build(self) -> Result<Orchestrator<R, S>, DagError> {
        self.dag.topological_order()?;
        Ok(Orchestrator { dag: self.dag,
                          registry: self.registry,
                          state_store: self.state_store,
                          config: Arc::new(self.config),
                          settings: self.settings,
                          cancel: self.cancel })
    }
}
