//! Migraciones idempotentes y restricciones del esquema.

mod test_support;

use diesel::connection::SimpleConnection;
use pipeflow_core::ArtifactRegistry;
use pipeflow_persistence::{build_pool, DbConfig};
use test_support::{new_art, open_registry};

#[test]
fn migrations_are_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = DbConfig::new(dir.path().join("nested/registry.db"));
    build_pool(&cfg).unwrap();
    let pool = build_pool(&cfg).unwrap();
    let mut conn = pool.get().unwrap();
    conn.batch_execute("SELECT COUNT(*) FROM artifacts;").unwrap();
}

#[test]
fn schema_rejects_a_second_valid_row_per_stage() {
    let dir = tempfile::tempdir().unwrap();
    let reg = open_registry(dir.path());
    reg.commit(new_art("s", "h1")).unwrap();

    let pool = build_pool(&DbConfig::new(dir.path().join("registry.db"))).unwrap();
    let mut conn = pool.get().unwrap();
    let res = conn.batch_execute("INSERT INTO artifacts (stage_name, version, input_hash, data_hash, code_hash, \
                                  config_hash, output_path, content_hash, row_count, created_at, status) \
                                  VALUES ('s', 99, 'hx', '', '', '', '/x', 'sha256:x', 0, \
                                  '2025-01-01T00:00:00Z', 'valid');");
    assert!(res.is_err());
    let bad_status = conn.batch_execute("INSERT INTO artifacts (stage_name, version, input_hash, data_hash, \
                                         code_hash, config_hash, output_path, content_hash, row_count, created_at, \
                                         status) VALUES ('t', 1, 'hx', '', '', '', '/x', 'sha256:x', 0, \
                                         '2025-01-01T00:00:00Z', 'bogus');");
    assert!(bad_status.is_err());
}
