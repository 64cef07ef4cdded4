//! Limpieza de la raíz de artifacts: archivos sin fila `Valid` que los
//! respalde y temporales abandonados por escrituras interrumpidas.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::{info, warn};
use serde::Serialize;
use walkdir::WalkDir;

use crate::errors::EngineError;
use crate::registry::ArtifactRegistry;
use crate::writer::is_temp_file;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Archivos sin artifact válido (zombies o restos de un crash entre
    /// rename y commit).
    pub untracked: Vec<PathBuf>,
    /// Temporales del escritor atómico más antiguos que el margen de gracia.
    pub temp_files: Vec<PathBuf>,
    /// Artifacts marcados zombie por la reconciliación previa.
    pub zombies: Vec<i64>,
    pub applied: bool,
}

impl GcReport {
    pub fn is_empty(&self) -> bool {
        self.untracked.is_empty() && self.temp_files.is_empty() && self.zombies.is_empty()
    }

    pub fn files(&self) -> impl Iterator<Item = &PathBuf> {
        self.untracked.iter().chain(self.temp_files.iter())
    }
}

fn canonical(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn older_than(path: &Path, grace: Duration) -> bool {
    let modified = fs::metadata(path).and_then(|m| m.modified());
    match modified {
        Ok(t) => SystemTime::now().duration_since(t).map(|age| age >= grace).unwrap_or(false),
        Err(_) => false,
    }
}

pub(crate) fn remove_file(path: &Path) -> Result<(), EngineError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(EngineError::Io { path: path.to_path_buf(),
                                             source }),
    }
}

/// Recorre `root` y clasifica lo que sobra. Con `apply` además lo borra.
/// Nunca toca rutas de `protected` ni los archivos de artifacts válidos.
pub fn collect_garbage<R>(registry: &R,
                          root: &Path,
                          apply: bool,
                          protected: &[PathBuf],
                          temp_grace: Duration)
                          -> Result<GcReport, EngineError>
    where R: ArtifactRegistry + ?Sized
{
    let mut report = GcReport { applied: apply,
                                ..GcReport::default() };
    if !root.is_dir() {
        return Ok(report);
    }
    let mut keep: HashSet<PathBuf> = registry.list_valid()?.iter().map(|a| canonical(&a.output_path)).collect();
    keep.extend(protected.iter().map(|p| canonical(p)));

    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("gc:walk_error root={} err={e}", root.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if keep.contains(&canonical(path)) {
            continue;
        }
        if is_temp_file(path) {
            if older_than(path, temp_grace) {
                report.temp_files.push(path.to_path_buf());
            }
        } else {
            report.untracked.push(path.to_path_buf());
        }
    }

    if apply {
        for path in report.files() {
            remove_file(path)?;
        }
        info!("gc:applied root={} untracked={} temp={}",
              root.display(),
              report.untracked.len(),
              report.temp_files.len());
    } else {
        info!("gc:dry_run root={} untracked={} temp={}",
              root.display(),
              report.untracked.len(),
              report.temp_files.len());
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NewArtifact;
    use crate::registry::InMemoryArtifactRegistry;
    use crate::writer::AtomicWriter;

    #[test]
    fn lists_untracked_and_temp_files_but_keeps_valid_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let reg = InMemoryArtifactRegistry::new();
        let writer = AtomicWriter::new();

        fs::create_dir_all(root.join("a")).unwrap();
        let kept = writer.write_bytes(&root.join("a/out.csv"), b"x\n1\n").unwrap();
        reg.commit(NewArtifact::new("a", "h1", kept.path.clone(), kept.content_hash, 1)).unwrap();
        fs::write(root.join("a/stray.csv"), b"orphan").unwrap();
        fs::write(root.join("a/.out.csv.abc.tmp"), b"partial").unwrap();
        fs::write(root.join("notes.txt"), b"keep me").unwrap();

        let protected = vec![root.join("notes.txt")];
        let dry = collect_garbage(&reg, root, false, &protected, Duration::ZERO).unwrap();
        assert_eq!(dry.untracked, vec![root.join("a/stray.csv")]);
        assert_eq!(dry.temp_files, vec![root.join("a/.out.csv.abc.tmp")]);
        assert!(root.join("a/stray.csv").exists(), "dry run must not delete");

        let applied = collect_garbage(&reg, root, true, &protected, Duration::ZERO).unwrap();
        assert!(applied.applied);
        assert!(!root.join("a/stray.csv").exists());
        assert!(!root.join("a/.out.csv.abc.tmp").exists());
        assert!(root.join("a/out.csv").exists());
        assert!(root.join("notes.txt").exists());
    }

    #[test]
    fn recent_temp_files_are_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".x.csv.1.tmp"), b"in progress").unwrap();
        let reg = InMemoryArtifactRegistry::new();
        let report = collect_garbage(&reg, dir.path(), true, &[], Duration::from_secs(3600)).unwrap();
        assert!(report.is_empty());
        assert!(dir.path().join(".x.csv.1.tmp").exists());
    }

    #[test]
    fn missing_root_is_empty_report() {
        let reg = InMemoryArtifactRegistry::new();
        let report = collect_garbage(&reg, Path::new("/nonexistent/pipeflow-root"), true, &[], Duration::ZERO).unwrap();
        assert!(report.is_empty());
    }
}
