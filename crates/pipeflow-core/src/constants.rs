//! Constantes del motor core.
//!
//! `ENGINE_VERSION` participa en el `code_hash` de cada stage: un cambio de
//! versión del motor invalida todos los artifacts aunque datos y config no
//! cambien.

/// Versión lógica del motor. Subirla sólo ante cambios incompatibles en el
/// cálculo de fingerprints o en la forma de los artifacts.
pub const ENGINE_VERSION: &str = "pipeflow-1";

/// Prefijo de los content hashes (sha256 sobre bytes del archivo).
pub const CONTENT_HASH_PREFIX: &str = "sha256:";

/// Tamaño de bloque al hashear archivos.
pub const HASH_CHUNK_SIZE: usize = 8 * 1024;

/// Sufijo de los archivos temporales del escritor atómico.
pub const TEMP_FILE_SUFFIX: &str = ".tmp";

/// Número máximo de runs que se conservan en el documento de estado.
pub const MAX_RETAINED_RUNS: usize = 50;

/// Antigüedad mínima (segundos) para que `gc` considere huérfano un
/// temporal; uno más reciente puede pertenecer a una escritura en curso.
pub const TEMP_GRACE_SECS: u64 = 600;
