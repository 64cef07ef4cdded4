//! Suscriptor de logs del binario.
//!
//! Las librerías del workspace emiten por la fachada `log`; el subscriber de
//! `tracing` los recoge mediante el puente `tracing-log`. `RUST_LOG` tiene
//! prioridad sobre el nivel por defecto.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Instala el subscriber global. Devuelve `false` si ya había uno.
pub fn init() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter)
                             .with_target(false)
                             .with_writer(std::io::stderr)
                             .try_init()
                             .is_ok()
}
