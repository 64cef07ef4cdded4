//! Backend en memoria. Mismas invariantes que el backend durable; se usa en
//! tests del core y en `--dry-run` sin base de datos.

use std::sync::Mutex;

use chrono::Utc;

use super::ArtifactRegistry;
use crate::errors::RegistryError;
use crate::model::{Artifact, ArtifactStatus, CommitGuard, NewArtifact};

#[derive(Debug, Default)]
struct State {
    rows: Vec<Artifact>,
    next_id: i64,
}

#[derive(Debug, Default)]
pub struct InMemoryArtifactRegistry {
    inner: Mutex<State>,
}

impl InMemoryArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T, RegistryError>) -> Result<T, RegistryError> {
        let mut guard = self.inner
                            .lock()
                            .map_err(|_| RegistryError::Unavailable("registry mutex poisoned".into()))?;
        f(&mut guard)
    }

    /// Número total de filas (cualquier estado).
    pub fn len(&self) -> usize {
        self.inner.lock().map(|s| s.rows.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ArtifactRegistry for InMemoryArtifactRegistry {
    fn lookup(&self, stage_name: &str, input_hash: &str) -> Result<Option<Artifact>, RegistryError> {
        self.with_state(|s| {
                Ok(s.rows
                    .iter()
                    .find(|a| a.stage_name == stage_name && a.input_hash == input_hash && a.is_valid())
                    .cloned())
            })
    }

    fn latest_valid(&self, stage_name: &str) -> Result<Option<Artifact>, RegistryError> {
        self.with_state(|s| Ok(s.rows.iter().find(|a| a.stage_name == stage_name && a.is_valid()).cloned()))
    }

    fn commit(&self, new: NewArtifact) -> Result<Artifact, RegistryError> {
        self.with_state(|s| {
                let current = s.rows.iter().position(|a| a.stage_name == new.stage_name && a.is_valid());
                if let CommitGuard::ExpectPrior(expected) = new.guard {
                    if current.map(|i| s.rows[i].id) != expected {
                        return Err(RegistryError::ConcurrentModification { stage: new.stage_name.clone() });
                    }
                }
                let version = s.rows
                               .iter()
                               .filter(|a| a.stage_name == new.stage_name)
                               .map(|a| a.version)
                               .max()
                               .unwrap_or(0)
                              + 1;
                if let Some(i) = current {
                    s.rows[i].status = ArtifactStatus::Superseded;
                }
                s.next_id += 1;
                let art = Artifact { id: s.next_id,
                                     stage_name: new.stage_name,
                                     version,
                                     input_hash: new.input_hash,
                                     data_hash: new.data_hash,
                                     code_hash: new.code_hash,
                                     config_hash: new.config_hash,
                                     output_path: new.output_path,
                                     content_hash: new.content_hash,
                                     row_count: new.row_count,
                                     created_at: Utc::now(),
                                     status: ArtifactStatus::Valid,
                                     run_id: new.run_id,
                                     inputs: new.inputs,
                                     metadata: new.metadata };
                s.rows.push(art.clone());
                Ok(art)
            })
    }

    fn get(&self, id: i64) -> Result<Option<Artifact>, RegistryError> {
        self.with_state(|s| Ok(s.rows.iter().find(|a| a.id == id).cloned()))
    }

    fn list_versions(&self, stage_name: &str) -> Result<Vec<Artifact>, RegistryError> {
        self.with_state(|s| {
                let mut v: Vec<Artifact> = s.rows.iter().filter(|a| a.stage_name == stage_name).cloned().collect();
                v.sort_by(|a, b| b.version.cmp(&a.version));
                Ok(v)
            })
    }

    fn list_valid(&self) -> Result<Vec<Artifact>, RegistryError> {
        self.with_state(|s| Ok(s.rows.iter().filter(|a| a.is_valid()).cloned().collect()))
    }

    fn find_by_content_hash(&self, content_hash: &str) -> Result<Option<Artifact>, RegistryError> {
        self.with_state(|s| Ok(s.rows.iter().rev().find(|a| a.content_hash == content_hash).cloned()))
    }

    fn mark_zombie(&self, id: i64) -> Result<(), RegistryError> {
        self.with_state(|s| {
                let row = s.rows.iter_mut().find(|a| a.id == id).ok_or(RegistryError::NotFound(id))?;
                if row.is_valid() {
                    row.status = ArtifactStatus::Zombie;
                }
                Ok(())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::hash_bytes;
    use std::fs;
    use std::sync::Arc;

    fn new_art(stage: &str, input_hash: &str) -> NewArtifact {
        NewArtifact::new(stage, input_hash, format!("/tmp/{stage}.csv"), "sha256:00", 3)
    }

    #[test]
    fn commit_supersedes_and_bumps_version() {
        let reg = InMemoryArtifactRegistry::new();
        let v1 = reg.commit(new_art("ingest", "h1")).unwrap();
        let v2 = reg.commit(new_art("ingest", "h2")).unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));

        let versions = reg.list_versions("ingest").unwrap();
        assert_eq!(versions[0].status, ArtifactStatus::Valid);
        assert_eq!(versions[1].status, ArtifactStatus::Superseded);
        assert!(reg.lookup("ingest", "h1").unwrap().is_none());
        assert_eq!(reg.lookup("ingest", "h2").unwrap().map(|a| a.id), Some(v2.id));
        assert_eq!(reg.latest_valid("ingest").unwrap().map(|a| a.id), Some(v2.id));
    }

    #[test]
    fn guard_detects_stale_prior() {
        let reg = InMemoryArtifactRegistry::new();
        let v1 = reg.commit(new_art("s", "h1").expecting_prior(None)).unwrap();
        let err = reg.commit(new_art("s", "h2").expecting_prior(None)).unwrap_err();
        assert_eq!(err, RegistryError::ConcurrentModification { stage: "s".into() });
        assert_eq!(reg.len(), 1);
        reg.commit(new_art("s", "h2").expecting_prior(Some(v1.id))).unwrap();
    }

    #[test]
    fn concurrent_commits_keep_one_valid_row() {
        let reg = Arc::new(InMemoryArtifactRegistry::new());
        let handles: Vec<_> = (0..8).map(|i| {
                                        let reg = Arc::clone(&reg);
                                        std::thread::spawn(move || reg.commit(new_art("s", &format!("h{i}"))).unwrap())
                                    })
                                    .collect();
        for h in handles {
            h.join().unwrap();
        }
        let versions = reg.list_versions("s").unwrap();
        assert_eq!(versions.len(), 8);
        assert_eq!(versions.iter().filter(|a| a.is_valid()).count(), 1);
        let nums: Vec<i64> = versions.iter().map(|a| a.version).collect();
        assert_eq!(nums, (1..=8).rev().collect::<Vec<_>>());
    }

    #[test]
    fn zombie_versions_are_not_reused() {
        let reg = InMemoryArtifactRegistry::new();
        let v1 = reg.commit(new_art("s", "h1")).unwrap();
        reg.mark_zombie(v1.id).unwrap();
        assert!(reg.latest_valid("s").unwrap().is_none());
        let v2 = reg.commit(new_art("s", "h1")).unwrap();
        assert_eq!(v2.version, 2);
        assert_eq!(reg.get(v1.id).unwrap().unwrap().status, ArtifactStatus::Zombie);
    }

    #[test]
    fn references_resolve_by_version_latest_and_hash() {
        let reg = InMemoryArtifactRegistry::new();
        let v1 = reg.commit(new_art("s", "h1")).unwrap();
        let v2 = reg.commit(NewArtifact::new("s", "h2", "/tmp/s2.csv", "sha256:ff", 1)).unwrap();
        assert_eq!(reg.resolve("s:v1").unwrap().map(|a| a.id), Some(v1.id));
        assert_eq!(reg.resolve("s:latest").unwrap().map(|a| a.id), Some(v2.id));
        assert_eq!(reg.resolve("sha256:00").unwrap().map(|a| a.id), Some(v1.id));
        assert!(reg.resolve("s:v9").unwrap().is_none());
        for bad in ["s", "s:x", ":v1", "s:v"] {
            assert_eq!(reg.resolve(bad), Err(RegistryError::InvalidReference(bad.into())));
        }
    }

    #[test]
    fn lineage_walks_inputs() {
        let reg = InMemoryArtifactRegistry::new();
        let a = reg.commit(new_art("a", "ha")).unwrap();
        let b = reg.commit(new_art("b", "hb").with_inputs(vec![a.id])).unwrap();
        let c = reg.commit(new_art("c", "hc").with_inputs(vec![a.id])).unwrap();
        let d = reg.commit(new_art("d", "hd").with_inputs(vec![b.id, c.id])).unwrap();
        let ids: Vec<i64> = reg.lineage_of(d.id).unwrap().iter().map(|x| x.id).collect();
        assert_eq!(ids, vec![d.id, b.id, c.id, a.id]);
        assert_eq!(reg.lineage_of(999), Err(RegistryError::NotFound(999)));
    }

    #[test]
    fn reconcile_marks_missing_and_tampered_files() {
        let dir = tempfile::tempdir().unwrap();
        let ok = dir.path().join("ok.csv");
        let tampered = dir.path().join("tampered.csv");
        fs::write(&ok, "a").unwrap();
        fs::write(&tampered, "b").unwrap();

        let reg = InMemoryArtifactRegistry::new();
        reg.commit(NewArtifact::new("ok", "h", &ok, hash_bytes(b"a"), 1)).unwrap();
        reg.commit(NewArtifact::new("tampered", "h", &tampered, hash_bytes(b"b"), 1)).unwrap();
        let gone = reg.commit(NewArtifact::new("gone", "h", dir.path().join("gone.csv"), hash_bytes(b"c"), 1))
                      .unwrap();
        fs::write(&tampered, "changed").unwrap();

        let zombies = reg.reconcile().unwrap();
        let mut names: Vec<&str> = zombies.iter().map(|a| a.stage_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["gone", "tampered"]);
        assert!(zombies.iter().all(|a| a.status == ArtifactStatus::Zombie));
        assert!(reg.latest_valid("ok").unwrap().is_some());
        assert!(reg.latest_valid("gone").unwrap().is_none());
        assert_eq!(reg.get(gone.id).unwrap().unwrap().status, ArtifactStatus::Zombie);
    }

    #[test]
    fn find_by_content_hash_returns_newest() {
        let reg = InMemoryArtifactRegistry::new();
        reg.commit(NewArtifact::new("a", "h1", "/x", "sha256:same", 1)).unwrap();
        let second = reg.commit(NewArtifact::new("b", "h2", "/y", "sha256:same", 1)).unwrap();
        assert_eq!(reg.find_by_content_hash("sha256:same").unwrap().map(|a| a.id), Some(second.id));
        assert!(reg.find_by_content_hash("sha256:none").unwrap().is_none());
    }
}
