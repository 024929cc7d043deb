use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;

mod common;

#[cfg(not(feature = "storage-rocksdb"))]
#[test]
fn test_rocksdb_fallback_warning() {
    let csv = common::commands_file(&["create,a,100.00,USD,PIX,p1,p2,,,,"]);

    let mut cmd = Command::new(cargo_bin!("finguard"));
    cmd.arg(csv.path()).arg("--db-path").arg("some_db");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."))
        .stdout(predicate::str::contains(",PENDING,100,USD,PIX,0,0,false"));
}

#[cfg(not(feature = "cache-redis"))]
#[test]
fn test_redis_fallback_warning() {
    let csv = common::commands_file(&["create,a,100.00,USD,PIX,p1,p2,,,,"]);

    let mut cmd = Command::new(cargo_bin!("finguard"));
    cmd.arg(csv.path())
        .arg("--redis-url")
        .arg("redis://127.0.0.1:6379");

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("'cache-redis' feature is not enabled"));
}

#[cfg(feature = "storage-rocksdb")]
#[test]
fn test_rocksdb_no_fallback_warning() {
    let csv = common::commands_file(&["create,a,100.00,USD,PIX,p1,p2,,,,"]);

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test_db");

    let mut cmd = Command::new(cargo_bin!("finguard"));
    cmd.arg(csv.path()).arg("--db-path").arg(&db_path);

    cmd.assert()
        .success()
        .stderr(predicate::str::contains("Falling back").not());
}
