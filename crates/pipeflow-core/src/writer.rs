//! Escritor atómico (write-then-rename).
//!
//! Todo archivo de salida de un stage pasa por aquí:
//! 1. Se escribe un temporal oculto `.{nombre}.{uuid}.tmp` en el MISMO
//!    directorio que el destino.
//! 2. flush + fsync del temporal y hash sha256 de su contenido.
//! 3. Se comprueba cancelación y que destino y temporal comparten device.
//! 4. `rename` atómico sobre el destino y fsync del directorio.
//!
//! Ante cualquier error el temporal se borra y el destino anterior (si
//! existía) queda intacto. Un lector concurrente ve el archivo viejo o el
//! nuevo completo, nunca uno parcial.
//!
//! El chequeo de cancelación del paso 3 y el `rename` no son atómicos entre
//! sí. Un hilo de stage que sobrevive a su timeout puede renombrar justo
//! después del chequeo: el archivo queda en la ruta final con un content
//! hash que no coincide con ninguna fila válida. Ese caso no se corrige
//! aquí; `gc --apply` reconcilia antes de barrer, marca zombie la fila y
//! borra el archivo.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::constants::TEMP_FILE_SUFFIX;
use crate::errors::WriteError;
use crate::hashing::hash_file;

/// Resultado de una escritura confirmada.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written<T> {
    pub value: T,
    pub path: PathBuf,
    pub content_hash: String,
}

/// Archivo ya renombrado a su destino final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedFile {
    pub path: PathBuf,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default)]
pub struct AtomicWriter {
    cancel: CancelToken,
    committed: Arc<Mutex<Vec<CommittedFile>>>,
}

/// Borra el temporal al salir del scope salvo que se desarme (también en panic).
struct TempGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for TempGuard {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = fs::remove_file(&self.path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("atomic_write:cleanup failed tmp={} err={e}", self.path.display());
                }
            }
        }
    }
}

/// Nombre del temporal para un destino dado.
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let file_name = final_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let dir = parent_dir(final_path);
    dir.join(format!(".{file_name}.{}{TEMP_FILE_SUFFIX}", Uuid::new_v4().simple()))
}

/// `true` si el nombre sigue el patrón de temporal del escritor.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(TEMP_FILE_SUFFIX) && n.len() > TEMP_FILE_SUFFIX.len() + 1)
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> WriteError + '_ {
    move |source| WriteError::Io { path: path.to_path_buf(),
                                   source }
}

#[cfg(unix)]
const EXDEV: i32 = 18;

#[cfg(unix)]
fn check_same_device(tmp: &Path, final_path: &Path) -> Result<(), WriteError> {
    use std::os::unix::fs::MetadataExt;
    let tmp_dev = fs::metadata(tmp).map_err(io_err(tmp))?.dev();
    match fs::metadata(final_path) {
        Ok(meta) if meta.dev() != tmp_dev => Err(WriteError::NonAtomicTarget { path: final_path.to_path_buf(),
                                                                               reason: "target lives on a different device than its directory".into() }),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn check_same_device(_tmp: &Path, _final_path: &Path) -> Result<(), WriteError> {
    Ok(())
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        debug!("atomic_write:dir fsync skipped dir={} err={e}", dir.display());
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

impl AtomicWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self { cancel,
               committed: Arc::default() }
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Escribe `final_path` de forma atómica. `write_fn` recibe el buffer del
    /// temporal; su valor de retorno se devuelve en `Written::value`.
    pub fn write_atomically<T, F>(&self, final_path: &Path, write_fn: F) -> Result<Written<T>, WriteError>
        where F: FnOnce(&mut BufWriter<File>) -> io::Result<T>
    {
        if final_path.is_dir() {
            return Err(WriteError::NonAtomicTarget { path: final_path.to_path_buf(),
                                                     reason: "target is a directory".into() });
        }
        if self.cancel.is_cancelled() {
            return Err(WriteError::Cancelled(final_path.to_path_buf()));
        }
        let dir = parent_dir(final_path);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let tmp = temp_path_for(final_path);
        let file = OpenOptions::new().write(true)
                                     .create_new(true)
                                     .open(&tmp)
                                     .map_err(io_err(&tmp))?;
        let mut guard = TempGuard { path: tmp.clone(),
                                    armed: true };
        debug!("atomic_write:start target={} tmp={}", final_path.display(), tmp.display());

        let mut buf = BufWriter::new(file);
        let value = write_fn(&mut buf).map_err(|source| WriteError::Rejected { path: final_path.to_path_buf(),
                                                                               source })?;
        let file = buf.into_inner().map_err(|e| WriteError::Io { path: tmp.clone(),
                                                                  source: e.into_error() })?;
        file.sync_all().map_err(io_err(&tmp))?;
        drop(file);

        let content_hash = hash_file(&tmp).map_err(io_err(&tmp))?;
        check_same_device(&tmp, final_path)?;

        if self.cancel.is_cancelled() {
            debug!("atomic_write:cancelled target={}", final_path.display());
            return Err(WriteError::Cancelled(final_path.to_path_buf()));
        }

        if let Err(source) = fs::rename(&tmp, final_path) {
            if is_cross_device(&source) {
                return Err(WriteError::NonAtomicTarget { path: final_path.to_path_buf(),
                                                         reason: format!("rename crosses devices: {source}") });
            }
            return Err(WriteError::Io { path: final_path.to_path_buf(),
                                        source });
        }
        guard.armed = false;
        sync_dir(&dir);

        debug!("atomic_write:done target={} hash={content_hash}", final_path.display());
        self.committed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CommittedFile { path: final_path.to_path_buf(),
                                  content_hash: content_hash.clone() });
        Ok(Written { value,
                     path: final_path.to_path_buf(),
                     content_hash })
    }

    /// Atajo para contenido ya materializado en memoria.
    pub fn write_bytes(&self, final_path: &Path, bytes: &[u8]) -> Result<Written<()>, WriteError> {
        self.write_atomically(final_path, |w| w.write_all(bytes))
    }

    /// Archivos confirmados por este escritor (y sus clones), en orden.
    pub fn committed(&self) -> Vec<CommittedFile> {
        self.committed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Content hash de la última escritura confirmada sobre `path`.
    pub fn committed_hash(&self, path: &Path) -> Option<String> {
        self.committed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .rev()
            .find(|c| c.path == path)
            .map(|c| c.content_hash.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_bytes;

    fn leftovers(dir: &Path) -> Vec<PathBuf> {
        fs::read_dir(dir).unwrap()
                         .filter_map(|e| e.ok().map(|e| e.path()))
                         .filter(|p| is_temp_file(p))
                         .collect()
    }

    #[test]
    fn commit_replaces_target_and_reports_hash() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();

        let w = AtomicWriter::new();
        let written = w.write_bytes(&target, b"a,b\n1,2\n").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "a,b\n1,2\n");
        assert_eq!(written.content_hash, hash_bytes(b"a,b\n1,2\n"));
        assert_eq!(w.committed_hash(&target), Some(written.content_hash));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn failing_callback_leaves_previous_content() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        fs::write(&target, "old").unwrap();

        let w = AtomicWriter::new();
        let err = w.write_atomically(&target, |buf| {
                       buf.write_all(b"partial")?;
                       Err::<(), _>(io::Error::other("boom"))
                   })
                   .unwrap_err();

        assert!(matches!(err, WriteError::Rejected { .. }));
        assert_eq!(fs::read_to_string(&target).unwrap(), "old");
        assert!(leftovers(dir.path()).is_empty());
        assert!(w.committed().is_empty());
    }

    #[test]
    fn panic_inside_callback_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        let w = AtomicWriter::new();
        let res = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = w.write_atomically(&target, |buf| -> io::Result<()> {
                         buf.write_all(b"x")?;
                         panic!("stage crashed mid-write");
                     });
        }));
        assert!(res.is_err());
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn cancellation_before_rename_abandons_write() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.csv");
        let token = CancelToken::new();
        let w = AtomicWriter::with_cancel(token.clone());
        let err = w.write_atomically(&target, |buf| {
                       token.cancel();
                       buf.write_all(b"data")
                   })
                   .unwrap_err();
        assert!(matches!(err, WriteError::Cancelled(_)));
        assert!(!target.exists());
        assert!(leftovers(dir.path()).is_empty());
    }

    #[test]
    fn directory_target_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = AtomicWriter::new().write_bytes(dir.path(), b"x").unwrap_err();
        assert!(matches!(err, WriteError::NonAtomicTarget { .. }));
    }

    #[test]
    fn temp_file_pattern() {
        assert!(is_temp_file(Path::new("/a/.out.csv.0123abcd.tmp")));
        assert!(!is_temp_file(Path::new("/a/out.csv")));
        assert!(!is_temp_file(Path::new("/a/report.tmp")));
    }
}
