//! Señal de cancelación cooperativa compartida entre orquestador, workers y
//! escritores atómicos.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Token clonable. Un token hijo se considera cancelado si él o su padre lo
/// están; cancelar el hijo no afecta al padre.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<CancelToken>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.parent.as_ref().is_some_and(|p| p.is_cancelled())
    }

    /// Crea un token dependiente (p.ej. para el timeout de una invocación).
    pub fn child(&self) -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)),
               parent: Some(Arc::new(self.clone())) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_observes_parent_but_not_the_reverse() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }
}
