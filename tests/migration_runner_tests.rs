//! Integration tests for the migration runner
//!
//! Every test runs against a fresh SQLite file:
//! Registry → Runner → Ledger → live schema

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use sqlx::sqlite::SqliteConnectOptions;
use stellar_schema::storage::backend::{Backend, BackendKind};
use stellar_schema::storage::error::TransformationFailure;
use stellar_schema::storage::migrations;
use stellar_schema::storage::runner::LockPolicy;
use stellar_schema::storage::sqlite::SqliteBackend;
use stellar_schema::{
    Migration, MigrationError, MigrationRunner, Registry, Resolution, Target, Transformation, Version,
};
use tempfile::TempDir;

/// Fresh database file plus a backend handle for direct SQL
async fn fresh_db() -> (TempDir, String, SqliteBackend) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let url = format!("sqlite://{}", dir.path().join("stellar.db").display());
    let backend = SqliteBackend::connect(&url, 4)
        .await
        .expect("Failed to open SQLite database");
    (dir, url, backend)
}

fn game_runner(backend: &SqliteBackend) -> MigrationRunner {
    MigrationRunner::new(
        Arc::new(backend.clone()),
        migrations::registry().expect("Game registry must be valid"),
    )
}

async fn ledger_versions(backend: &SqliteBackend) -> Vec<Version> {
    backend
        .ledger_entries()
        .await
        .unwrap()
        .into_iter()
        .filter(|e| !e.dirty)
        .map(|e| e.version)
        .collect()
}

/// Test-only unit with literal statements
struct Scripted {
    version: Version,
    up: Vec<&'static str>,
    down: Vec<&'static str>,
    transactional: bool,
}

impl Scripted {
    fn new(version: Version, up: &'static str, down: &'static str) -> Self {
        Self {
            version,
            up: vec![up],
            down: vec![down],
            transactional: true,
        }
    }
}

impl Migration for Scripted {
    fn version(&self) -> Version {
        self.version
    }

    fn name(&self) -> &'static str {
        "scripted"
    }

    fn up(&self, _backend: BackendKind) -> Transformation {
        let t = Transformation::native(self.up.clone());
        if self.transactional {
            t
        } else {
            t.outside_transaction()
        }
    }

    fn down(&self, _backend: BackendKind) -> Transformation {
        let t = Transformation::native(self.down.clone());
        if self.transactional {
            t
        } else {
            t.outside_transaction()
        }
    }
}

fn five_units_with_broken_third() -> Registry {
    Registry::new(vec![
        Box::new(Scripted::new(1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a")),
        Box::new(Scripted::new(2, "CREATE TABLE b (id INTEGER)", "DROP TABLE b")),
        Box::new(Scripted::new(3, "CREATE TABLE c (id INTEGER REFERENCES", "DROP TABLE c")),
        Box::new(Scripted::new(4, "CREATE TABLE d (id INTEGER)", "DROP TABLE d")),
        Box::new(Scripted::new(5, "CREATE TABLE e (id INTEGER)", "DROP TABLE e")),
    ])
    .unwrap()
}

// ============================================================================
// Apply / revert
// ============================================================================

#[tokio::test]
async fn test_up_to_latest_applies_every_unit_in_order() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);

    let report = runner.up_to(Target::Latest).await.unwrap();
    assert_eq!(report.versions(), (1..=12).collect::<Vec<_>>());
    assert_eq!(ledger_versions(&backend).await, (1..=12).collect::<Vec<_>>());

    let status = runner.status().await.unwrap();
    assert!(status.is_consistent());
    assert!(status.pending.is_empty());
    assert_eq!(status.current_version(), Some(12));
    assert!(status.modified.is_empty());
}

#[tokio::test]
async fn test_second_up_is_noop() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);

    runner.up_to(Target::Latest).await.unwrap();
    let before = backend.ledger_entries().await.unwrap();

    let report = runner.up_to(Target::Latest).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(backend.ledger_entries().await.unwrap(), before);
}

#[tokio::test]
async fn test_wallet_address_unit_twice_does_not_readd_column() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);

    let first = runner.up_to(Target::Version(7)).await.unwrap();
    assert_eq!(first.versions().last(), Some(&7));

    let second = runner.up_to(Target::Version(7)).await.unwrap();
    assert!(second.is_noop());

    // Lower target than current is also a no-op
    assert!(runner.up_to(Target::Version(5)).await.unwrap().is_noop());

    let schema = runner.schema().await.unwrap();
    assert!(schema.has_column("players", "wallet_address"));
    assert!(!schema.has_column("players", "matrix_user_id"));
    assert_eq!(ledger_versions(&backend).await, (1..=7).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_down_reverts_last_in_first_out() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Latest).await.unwrap();

    let report = runner.down_to(8).await.unwrap();
    assert_eq!(report.versions(), vec![12, 11, 10, 9]);
    assert_eq!(ledger_versions(&backend).await, (1..=8).collect::<Vec<_>>());

    let schema = runner.schema().await.unwrap();
    assert!(!schema.has_column("players", "landed_at_planet_id"));
    assert!(!schema.has_column("players", "tutorial_state"));
    assert!(schema.has_column("players", "wallet_address"));

    let status = runner.status().await.unwrap();
    assert_eq!(status.pending_versions(), vec![9, 10, 11, 12]);
}

#[tokio::test]
async fn test_down_to_zero_empties_schema() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Latest).await.unwrap();

    runner.down_to(0).await.unwrap();
    assert!(ledger_versions(&backend).await.is_empty());
    assert!(runner.schema().await.unwrap().tables.is_empty());
}

#[tokio::test]
async fn test_down_then_up_restores_equivalent_schema() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Latest).await.unwrap();
    let expected = runner.schema().await.unwrap();

    for version in (1..=12).rev() {
        runner.down_to(version - 1).await.unwrap();
        runner.up_to(Target::Latest).await.unwrap();
        assert_eq!(
            runner.schema().await.unwrap(),
            expected,
            "schema differs after reverting to v{}",
            version - 1
        );
    }
}

#[tokio::test]
async fn test_unknown_target_rejected() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);

    let err = runner.up_to(Target::Version(42)).await.unwrap_err();
    assert!(matches!(err, MigrationError::UnknownVersion(42)));
    assert_eq!(err.exit_code(), 1);

    let err = runner.down_to(-1).await.unwrap_err();
    assert!(matches!(err, MigrationError::UnknownVersion(-1)));
    assert!(ledger_versions(&backend).await.is_empty());
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_failure_in_third_unit_leaves_two_applied() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = MigrationRunner::new(Arc::new(backend.clone()), five_units_with_broken_third());

    let err = runner.up_to(Target::Latest).await.unwrap_err();
    match &err {
        MigrationError::Transformation { version, source, .. } => {
            assert_eq!(*version, 3);
            assert!(matches!(source, TransformationFailure::Exec(_)));
        }
        other => panic!("Expected transformation error, got {:?}", other),
    }
    assert_eq!(err.failing_version(), Some(3));
    assert_eq!(err.exit_code(), 1);

    assert_eq!(ledger_versions(&backend).await, vec![1, 2]);
    let status = runner.status().await.unwrap();
    assert_eq!(status.applied_versions(), vec![1, 2]);
    assert_eq!(status.pending_versions(), vec![3, 4, 5]);
    assert!(status.is_consistent());

    let schema = runner.schema().await.unwrap();
    assert!(schema.table("b").is_some());
    assert!(schema.table("d").is_none());
}

#[tokio::test]
async fn test_gap_in_ledger_is_fatal() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Version(3)).await.unwrap();

    sqlx::query("DELETE FROM _schema_migrations WHERE version = 2")
        .execute(backend.pool())
        .await
        .unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.gaps, vec![2]);
    assert!(!status.is_consistent());

    let err = runner.up_to(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::LedgerInconsistency { .. }));
    assert_eq!(err.exit_code(), 2);
    // Refused outright: nothing past v3 was attempted
    assert_eq!(ledger_versions(&backend).await, vec![1, 3]);
}

#[tokio::test]
async fn test_unknown_ledger_version_is_fatal() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Version(2)).await.unwrap();

    sqlx::query(
        "INSERT INTO _schema_migrations (version, name, checksum, applied_at, dirty) \
         VALUES (99, 'from_the_future', '', ?, 0)",
    )
    .bind(chrono::Utc::now())
    .execute(backend.pool())
    .await
    .unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.unknown, vec![99]);
    let err = runner.down_to(0).await.unwrap_err();
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_modified_unit_is_reported_not_fatal() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Version(4)).await.unwrap();

    sqlx::query("UPDATE _schema_migrations SET checksum = 'edited' WHERE version = 4")
        .execute(backend.pool())
        .await
        .unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.modified, vec![4]);
    assert!(status.is_consistent());
    runner.up_to(Target::Version(5)).await.unwrap();
}

#[tokio::test]
async fn test_dirty_row_blocks_until_resolved() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Version(3)).await.unwrap();

    backend.set_dirty(3, true).await.unwrap();

    let status = runner.status().await.unwrap();
    assert_eq!(status.dirty, vec![3]);
    assert_eq!(status.applied_versions(), vec![1, 2]);
    assert!(!status.pending_versions().contains(&3));

    let err = runner.up_to(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::LedgerInconsistency { .. }));

    runner.resolve(3, Resolution::Applied).await.unwrap();
    assert!(runner.status().await.unwrap().is_consistent());
    runner.up_to(Target::Version(4)).await.unwrap();
    assert_eq!(ledger_versions(&backend).await, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_resolve_reverted_and_unknown_version() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);
    runner.up_to(Target::Version(2)).await.unwrap();

    runner.resolve(2, Resolution::Reverted).await.unwrap();
    assert_eq!(ledger_versions(&backend).await, vec![1]);

    let err = runner.resolve(77, Resolution::Applied).await.unwrap_err();
    assert!(matches!(err, MigrationError::UnknownVersion(77)));
}

// ============================================================================
// Outside-transaction units
// ============================================================================

#[tokio::test]
async fn test_non_transactional_failure_before_any_statement_leaves_no_row() {
    let (_dir, _url, backend) = fresh_db().await;
    let registry = Registry::new(vec![
        Box::new(Scripted::new(1, "CREATE TABLE a (id INTEGER)", "DROP TABLE a")),
        Box::new(Scripted {
            version: 2,
            up: vec!["CREATE TABLE broken (", "CREATE TABLE z (id INTEGER)"],
            down: vec!["DROP TABLE z"],
            transactional: false,
        }),
    ])
    .unwrap();
    let runner = MigrationRunner::new(Arc::new(backend.clone()), registry);

    let err = runner.up_to(Target::Latest).await.unwrap_err();
    assert_eq!(err.failing_version(), Some(2));

    let status = runner.status().await.unwrap();
    assert!(status.dirty.is_empty());
    assert_eq!(status.pending_versions(), vec![2]);
}

#[tokio::test]
async fn test_non_transactional_partial_failure_leaves_dirty_row() {
    let (_dir, _url, backend) = fresh_db().await;
    let registry = Registry::new(vec![Box::new(Scripted {
        version: 1,
        up: vec!["CREATE TABLE half (id INTEGER)", "CREATE TABLE broken ("],
        down: vec!["DROP TABLE half"],
        transactional: false,
    }) as Box<dyn Migration>])
    .unwrap();
    let runner = MigrationRunner::new(Arc::new(backend.clone()), registry);

    runner.up_to(Target::Latest).await.unwrap_err();

    let status = runner.status().await.unwrap();
    assert_eq!(status.dirty, vec![1]);
    assert!(!status.is_consistent());
    assert!(runner.schema().await.unwrap().table("half").is_some());

    // Operator finishes by hand, then marks it applied
    runner.resolve(1, Resolution::Applied).await.unwrap();
    assert_eq!(ledger_versions(&backend).await, vec![1]);
}

#[tokio::test]
async fn test_non_transactional_unit_round_trip() {
    let (_dir, _url, backend) = fresh_db().await;
    let registry = Registry::new(vec![Box::new(Scripted {
        version: 1,
        up: vec!["CREATE TABLE t (id INTEGER)", "CREATE INDEX idx_t ON t (id)"],
        down: vec!["DROP INDEX idx_t", "DROP TABLE t"],
        transactional: false,
    }) as Box<dyn Migration>])
    .unwrap();
    let runner = MigrationRunner::new(Arc::new(backend.clone()), registry);

    runner.up_to(Target::Latest).await.unwrap();
    assert_eq!(ledger_versions(&backend).await, vec![1]);
    assert!(backend.ledger_entries().await.unwrap().iter().all(|e| !e.dirty));

    runner.down_to(0).await.unwrap();
    assert!(backend.ledger_entries().await.unwrap().is_empty());
}

// ============================================================================
// Locking
// ============================================================================

#[tokio::test]
async fn test_held_lock_causes_contention_error() {
    let (_dir, url, backend) = fresh_db().await;
    backend.ensure_ledger().await.unwrap();

    // Another runner, on its own connection pool, holds the lock
    let other = SqliteBackend::connect(&url, 1).await.unwrap();
    assert!(other.try_acquire_lock("other-runner").await.unwrap());

    let runner = game_runner(&backend).with_lock_policy(LockPolicy {
        attempts: 3,
        backoff: Duration::from_millis(5),
    });
    let err = runner.up_to(Target::Latest).await.unwrap_err();
    assert!(matches!(err, MigrationError::LockContention { attempts: 3 }));
    assert_eq!(err.exit_code(), 3);
    assert!(ledger_versions(&backend).await.is_empty());

    // Status never takes the lock
    assert_eq!(runner.status().await.unwrap().pending.len(), 12);

    other.release_lock("other-runner").await.unwrap();
    runner.up_to(Target::Version(1)).await.unwrap();
}

#[tokio::test]
async fn test_open_write_transaction_is_lock_contention() {
    let (_dir, url, backend) = fresh_db().await;

    // Another runner is partway through a transactional unit
    let other = SqliteBackend::connect(&url, 1).await.unwrap();
    let mut tx = other.pool().begin().await.unwrap();
    sqlx::query("CREATE TABLE slow_backfill (id INTEGER)")
        .execute(&mut *tx)
        .await
        .unwrap();

    let options = SqliteConnectOptions::from_str(&url)
        .unwrap()
        .busy_timeout(Duration::from_millis(20));
    let waiting = SqliteBackend::connect_with(options, 2).await.unwrap();
    let runner = game_runner(&waiting).with_lock_policy(LockPolicy {
        attempts: 4,
        backoff: Duration::from_millis(5),
    });

    let err = runner.up_to(Target::Latest).await.unwrap_err();
    assert!(
        matches!(err, MigrationError::LockContention { attempts: 4 }),
        "busy database must be retried as lock contention, got {:?}",
        err
    );
    assert_eq!(err.exit_code(), 3);

    tx.rollback().await.unwrap();
    let report = runner.up_to(Target::Latest).await.unwrap();
    assert_eq!(report.versions().len(), 12);
    assert_eq!(ledger_versions(&backend).await, (1..=12).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unlock_clears_stale_lock() {
    let (_dir, _url, backend) = fresh_db().await;
    backend.ensure_ledger().await.unwrap();
    assert!(backend.try_acquire_lock("killed-process").await.unwrap());

    let runner = game_runner(&backend).with_lock_policy(LockPolicy {
        attempts: 1,
        backoff: Duration::from_millis(1),
    });
    assert!(runner.up_to(Target::Latest).await.is_err());

    assert!(runner.unlock().await.unwrap());
    assert!(!runner.unlock().await.unwrap());
    runner.up_to(Target::Latest).await.unwrap();
}

#[tokio::test]
async fn test_lock_released_after_failed_run() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = MigrationRunner::new(Arc::new(backend.clone()), five_units_with_broken_third());

    runner.up_to(Target::Latest).await.unwrap_err();
    assert!(backend.try_acquire_lock("next").await.unwrap());
}

#[tokio::test]
async fn test_status_on_untouched_database() {
    let (_dir, _url, backend) = fresh_db().await;
    let runner = game_runner(&backend);

    let status = runner.status().await.unwrap();
    assert!(status.applied.is_empty());
    assert_eq!(status.pending.len(), 12);
    assert_eq!(status.current_version(), None);
    assert!(status.to_string().contains("0 applied, 12 pending"));

    // Read-only: neither the ledger nor the lock table was created
    let bookkeeping: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE '_schema_migrations%'",
    )
    .fetch_one(backend.pool())
    .await
    .unwrap();
    assert_eq!(bookkeeping, 0);
    assert!(backend.describe_schema().await.unwrap().tables.is_empty());
    let json = serde_json::to_value(&status).unwrap();
    assert_eq!(json["backend"], "sqlite");
}
