//! Contrato de `ArtifactRegistry` sobre SQLite (archivo temporal).

mod test_support;

use std::fs;

use pipeflow_core::hashing::hash_bytes;
use pipeflow_core::{ArtifactRegistry, ArtifactStatus, NewArtifact, RegistryError};
use serde_json::json;
use test_support::{new_art, open_registry};
use uuid::Uuid;

#[test]
fn commit_supersedes_previous_valid_version() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    let run_id = Uuid::new_v4();
    let v1 = reg.commit(new_art("ingest", "h1").with_run_id(run_id)).unwrap();
    let v2 = reg.commit(new_art("ingest", "h2").with_metadata(json!({"kind": "ingest"}))).unwrap();
    assert_eq!((v1.version, v2.version), (1, 2));
    assert_eq!(v1.run_id, Some(run_id));
    assert_eq!(v2.metadata["kind"], "ingest");

    let versions = reg.list_versions("ingest").unwrap();
    assert_eq!(versions.iter().map(|a| a.version).collect::<Vec<_>>(), vec![2, 1]);
    assert_eq!(versions[0].status, ArtifactStatus::Valid);
    assert_eq!(versions[1].status, ArtifactStatus::Superseded);

    assert!(reg.lookup("ingest", "h1").unwrap().is_none());
    assert_eq!(reg.lookup("ingest", "h2").unwrap().map(|a| a.id), Some(v2.id));
    assert_eq!(reg.latest_valid("ingest").unwrap(), Some(v2.clone()));
    assert_eq!(reg.get(v2.id).unwrap(), Some(v2));
    assert_eq!(reg.count().unwrap(), 2);
}

#[test]
fn guard_rejects_stale_prior_and_leaves_registry_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    let v1 = reg.commit(new_art("s", "h1").expecting_prior(None)).unwrap();
    let err = reg.commit(new_art("s", "h2").expecting_prior(None)).unwrap_err();
    assert_eq!(err, RegistryError::ConcurrentModification { stage: "s".into() });
    assert_eq!(reg.count().unwrap(), 1);
    assert_eq!(reg.latest_valid("s").unwrap().map(|a| a.id), Some(v1.id));

    let v2 = reg.commit(new_art("s", "h2").expecting_prior(Some(v1.id))).unwrap();
    assert_eq!(v2.version, 2);
}

#[test]
fn zombie_rows_never_serve_lookups_and_versions_keep_growing() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    let v1 = reg.commit(new_art("s", "h1")).unwrap();
    reg.mark_zombie(v1.id).unwrap();
    assert!(reg.lookup("s", "h1").unwrap().is_none());
    assert!(reg.latest_valid("s").unwrap().is_none());

    let v2 = reg.commit(new_art("s", "h1")).unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(reg.get(v1.id).unwrap().unwrap().status, ArtifactStatus::Zombie);
    assert_eq!(reg.mark_zombie(9999), Err(RegistryError::NotFound(9999)));
}

#[test]
fn lineage_follows_persisted_inputs() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    let a = reg.commit(new_art("a", "ha")).unwrap();
    let b = reg.commit(new_art("b", "hb").with_inputs(vec![a.id])).unwrap();
    let c = reg.commit(new_art("c", "hc").with_inputs(vec![a.id])).unwrap();
    let d = reg.commit(new_art("d", "hd").with_inputs(vec![c.id, b.id])).unwrap();
    assert_eq!(d.inputs, vec![c.id, b.id]);

    let ids: Vec<i64> = reg.lineage_of(d.id).unwrap().into_iter().map(|x| x.id).collect();
    assert_eq!(ids, vec![d.id, c.id, b.id, a.id]);
    assert_eq!(reg.get(d.id).unwrap().unwrap().inputs, vec![c.id, b.id]);
}

#[test]
fn find_by_content_hash_returns_newest_match() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    reg.commit(NewArtifact::new("x", "h1", "/data/x.csv", "sha256:same", 1)).unwrap();
    let newer = reg.commit(NewArtifact::new("y", "h2", "/data/y.csv", "sha256:same", 1)).unwrap();
    assert_eq!(reg.find_by_content_hash("sha256:same").unwrap().map(|a| a.id), Some(newer.id));
    assert!(reg.find_by_content_hash("sha256:none").unwrap().is_none());
}

#[test]
fn reconcile_marks_missing_and_altered_files() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    let ok = dir.path().join("ok.csv");
    let altered = dir.path().join("altered.csv");
    fs::write(&ok, b"a\n").unwrap();
    fs::write(&altered, b"b\n").unwrap();
    reg.commit(NewArtifact::new("ok", "h", &ok, hash_bytes(b"a\n"), 1)).unwrap();
    reg.commit(NewArtifact::new("altered", "h", &altered, hash_bytes(b"b\n"), 1)).unwrap();
    reg.commit(NewArtifact::new("gone", "h", dir.path().join("gone.csv"), "sha256:00", 1)).unwrap();
    fs::write(&altered, b"changed\n").unwrap();

    let mut zombies: Vec<String> = reg.reconcile().unwrap().into_iter().map(|a| a.stage_name).collect();
    zombies.sort();
    assert_eq!(zombies, vec!["altered", "gone"]);
    let valid: Vec<String> = reg.list_valid().unwrap().into_iter().map(|a| a.stage_name).collect();
    assert_eq!(valid, vec!["ok"]);
}

#[test]
fn rows_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let id = {
        let reg = open_registry(dir.path());
        reg.commit(new_art("s", "h1").with_inputs(vec![])).unwrap().id
    };
    let reg = open_registry(dir.path());
    let art = reg.get(id).unwrap().unwrap();
    assert_eq!(art.stage_name, "s");
    assert!(art.is_valid());
}
