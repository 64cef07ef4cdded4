use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::definition::Stage;

/// Nodo del DAG: nombre único, dependencias y runner.
#[derive(Clone)]
pub struct StageSpec {
    pub name: String,
    pub dependencies: BTreeSet<String>,
    pub runner: Arc<dyn Stage>,
    /// Sobrescribe el timeout global para este stage.
    pub timeout: Option<Duration>,
    /// `false` equivale a `--skip` permanente.
    pub enabled: bool,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, runner: impl Stage + 'static) -> Self {
        Self::from_arc(name, Arc::new(runner))
    }

    pub fn from_arc(name: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self { name: name.into(),
               dependencies: BTreeSet::new(),
               runner,
               timeout: None,
               enabled: true }
    }

    pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
        where I: IntoIterator<Item = S>,
              S: Into<String>
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSpec")
         .field("name", &self.name)
         .field("dependencies", &self.dependencies)
         .field("kind", &self.runner.kind())
         .field("timeout", &self.timeout)
         .field("enabled", &self.enabled)
         .finish()
    }
}
