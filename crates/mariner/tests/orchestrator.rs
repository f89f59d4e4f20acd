use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use mariner::migrations::{MigrationState, MigrationStatus};
use mariner::store::Ledger;
use mariner::{
    ChecksumPolicy, CreateOptions, Direction, MemoryStore, MigrateConfig, MigrateError, Orchestrator,
};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    store: MemoryStore,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("migrations")).unwrap();
        Self {
            dir,
            store: MemoryStore::new("memory/test"),
        }
    }

    fn migrations_dir(&self) -> PathBuf {
        self.dir.path().join("migrations")
    }

    fn config(&self) -> MigrateConfig {
        MigrateConfig {
            directory: self.migrations_dir(),
            ..MigrateConfig::default()
        }
    }

    fn write(&self, file: &str, content: &str) {
        fs::write(self.migrations_dir().join(file), content).unwrap();
    }

    /// Reversible migration creating one table
    fn table(&self, id: &str, table: &str) {
        self.write(
            &format!("{}.yaml", id),
            &format!("up: CREATE TABLE {t}\ndown: DROP TABLE {t}\n", t = table),
        );
    }

    fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(self.config())
    }

    fn orchestrator_with(&self, config: MigrateConfig) -> Orchestrator {
        Orchestrator::init(config, Arc::new(self.store.clone())).unwrap()
    }

    fn applied(&self) -> Vec<String> {
        self.store
            .ledger_snapshot()
            .into_iter()
            .map(|e| e.id)
            .collect()
    }
}

#[tokio::test]
async fn test_up_applies_pending_in_order_as_one_batch() {
    let fx = Fixture::new();
    fx.table("20240103_c", "c");
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");

    let result = fx.orchestrator().run(Direction::Up, None).await.unwrap();

    assert_eq!(result.migrations, vec!["20240101_a", "20240102_b", "20240103_c"]);
    assert_eq!(result.batch, Some(1));
    assert!(!result.partial);
    assert!(result
        .items
        .iter()
        .all(|item| item.state == MigrationState::Applied));
    assert_eq!(
        fx.store.executed(),
        vec!["CREATE TABLE a", "CREATE TABLE b", "CREATE TABLE c"]
    );
    assert!(fx.store.ledger_snapshot().iter().all(|e| e.batch == 1));
    assert!(!fx.store.is_locked());
}

#[tokio::test]
async fn test_up_counts_accumulate() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    fx.table("20240103_c", "c");
    let orchestrator = fx.orchestrator();

    let first = orchestrator.run(Direction::Up, Some(1)).await.unwrap();
    assert_eq!(first.migrations, vec!["20240101_a"]);

    let second = orchestrator.run(Direction::Up, Some(2)).await.unwrap();
    assert_eq!(second.migrations, vec!["20240102_b", "20240103_c"]);
    assert_eq!(second.batch, Some(2));
    assert_eq!(fx.applied().len(), 3);

    let third = orchestrator.run(Direction::Up, None).await.unwrap();
    assert!(third.is_noop());
    assert_eq!(third.batch, None);
    assert_eq!(fx.store.executed().len(), 3);
}

#[tokio::test]
async fn test_zero_count_is_rejected() {
    let fx = Fixture::new();
    let err = fx.orchestrator().run(Direction::Up, Some(0)).await.unwrap_err();
    assert!(matches!(err, MigrateError::Configuration(_)));
}

#[tokio::test]
async fn test_down_reverts_whole_latest_batch() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    fx.table("20240103_c", "c");
    let orchestrator = fx.orchestrator();

    orchestrator.run(Direction::Up, Some(2)).await.unwrap();
    let result = orchestrator.run(Direction::Down, None).await.unwrap();

    assert_eq!(result.migrations, vec!["20240102_b", "20240101_a"]);
    assert!(result
        .items
        .iter()
        .all(|item| item.state == MigrationState::Reverted));
    assert!(fx.applied().is_empty());
    assert_eq!(
        fx.store.executed()[2..],
        ["DROP TABLE b".to_string(), "DROP TABLE a".to_string()]
    );

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.pending().count(), 3);
}

#[tokio::test]
async fn test_down_count_selects_batches() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    let orchestrator = fx.orchestrator();
    orchestrator.run(Direction::Up, None).await.unwrap();
    fx.table("20240102_b", "b");
    orchestrator.run(Direction::Up, None).await.unwrap();
    fx.table("20240103_c", "c");
    orchestrator.run(Direction::Up, None).await.unwrap();

    let result = orchestrator.run(Direction::Down, Some(2)).await.unwrap();
    assert_eq!(result.migrations, vec!["20240103_c", "20240102_b"]);
    assert_eq!(fx.applied(), vec!["20240101_a"]);

    let result = orchestrator.rollback_all().await.unwrap();
    assert_eq!(result.migrations, vec!["20240101_a"]);
    assert!(fx.applied().is_empty());

    let result = orchestrator.rollback_last_batch().await.unwrap();
    assert!(result.is_noop());
}

#[tokio::test]
async fn test_irreversible_candidate_blocks_the_whole_down_run() {
    let fx = Fixture::new();
    fx.write("20240101_seed.yaml", "up: INSERT INTO settings VALUES (1)\n");
    fx.table("20240102_b", "b");
    let orchestrator = fx.orchestrator();
    orchestrator.run(Direction::Up, None).await.unwrap();

    let err = orchestrator.run(Direction::Down, None).await.unwrap_err();

    assert!(matches!(&err, MigrateError::Irreversible { id } if id == "20240101_seed"));
    assert_eq!(fx.applied(), vec!["20240101_seed", "20240102_b"]);
    assert_eq!(fx.store.executed().len(), 2);
    assert!(!fx.store.is_locked());
}

#[tokio::test]
async fn test_invalid_candidate_fails_before_execution() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.write("20240102_b.yaml", "upp: CREATE TABLE b\n");

    let err = fx.orchestrator().run(Direction::Up, None).await.unwrap_err();

    assert!(matches!(&err, MigrateError::InvalidMigration { id, .. } if id == "20240102_b"));
    assert!(fx.applied().is_empty());
    assert!(fx.store.executed().is_empty());
}

#[tokio::test]
async fn test_concurrent_runs_are_serialized_by_the_lock() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    fx.store.set_delay(Duration::from_millis(50));

    let first = fx.orchestrator();
    let second = fx.orchestrator();
    let (a, b) = tokio::join!(first.run(Direction::Up, None), second.run(Direction::Up, None));

    let (ok, err) = match (a, b) {
        (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
        other => panic!("expected exactly one run to win the lock, got {:?}", other),
    };
    assert_eq!(ok.migrations.len(), 2);
    assert!(matches!(err, MigrateError::LockHeld { target } if target == "memory/test"));
    assert_eq!(fx.store.executed().len(), 2);
    assert!(!fx.store.is_locked());
}

#[tokio::test]
async fn test_waiting_run_proceeds_after_release() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.store.set_delay(Duration::from_millis(30));

    let mut config = fx.config();
    config.lock.wait = true;
    config.lock.timeout_secs = 5;
    config.lock.poll_interval_ms = 5;

    let first = fx.orchestrator_with(config.clone());
    let second = fx.orchestrator_with(config);
    let (a, b) = tokio::join!(first.run(Direction::Up, None), second.run(Direction::Up, None));

    let (a, b) = (a.unwrap(), b.unwrap());
    assert_eq!(a.migrations.len() + b.migrations.len(), 1);
    assert_eq!(fx.applied(), vec!["20240101_a"]);
}

#[tokio::test]
async fn test_cancelled_run_releases_lock_and_resumes() {
    let fx = Fixture::new();
    fx.table("1_c1", "c1");
    fx.table("2_c2", "c2");
    fx.table("3_c3", "c3");
    fx.store.set_delay(Duration::from_millis(100));
    let orchestrator = fx.orchestrator();

    let cancelled = tokio::time::timeout(
        Duration::from_millis(250),
        orchestrator.run(Direction::Up, None),
    )
    .await;
    assert!(cancelled.is_err());
    assert!(!fx.store.is_locked());
    assert_eq!(fx.applied(), vec!["1_c1", "2_c2"]);
    assert_eq!(fx.store.executed(), vec!["CREATE TABLE c1", "CREATE TABLE c2"]);

    fx.store.set_delay(Duration::ZERO);
    let resumed = orchestrator.run(Direction::Up, None).await.unwrap();
    assert_eq!(resumed.migrations, vec!["3_c3"]);
    assert_eq!(
        fx.store.executed(),
        vec!["CREATE TABLE c1", "CREATE TABLE c2", "CREATE TABLE c3"]
    );
}

#[tokio::test]
async fn test_two_directories_same_store_serialize() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    let other_dir = fx.dir.path().join("other");
    fs::create_dir(&other_dir).unwrap();
    fs::write(
        other_dir.join("20240201_b.yaml"),
        "up: CREATE TABLE b\ndown: DROP TABLE b\n",
    )
    .unwrap();
    fx.store.set_delay(Duration::from_millis(50));

    let first = fx.orchestrator();
    let second = fx.orchestrator_with(MigrateConfig {
        directory: other_dir,
        ..MigrateConfig::default()
    });
    let (a, b) = tokio::join!(first.run(Direction::Up, None), second.run(Direction::Up, None));

    let err = match (a, b) {
        (Ok(_), Err(err)) | (Err(err), Ok(_)) => err,
        other => panic!("expected exactly one run to win the lock, got {:?}", other),
    };
    assert!(matches!(err, MigrateError::LockHeld { target } if target == "memory/test"));
    assert_eq!(fx.applied().len(), 1);
    assert!(!fx.store.is_locked());

    first.run(Direction::Up, None).await.unwrap();
    second.run(Direction::Up, None).await.unwrap();
    assert_eq!(fx.applied(), vec!["20240101_a", "20240201_b"]);
    assert_eq!(fx.store.executed().len(), 2);
}

#[tokio::test]
async fn test_status_does_not_create_the_ledger() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");

    let status = fx.orchestrator().status().await.unwrap();
    assert_eq!(status.pending().count(), 1);
    assert!(status.missing.is_empty());
    assert!(!fx.store.exists().await.unwrap());
}

#[tokio::test]
async fn test_checksum_drift_is_reported() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    let orchestrator = fx.orchestrator();
    orchestrator.run(Direction::Up, None).await.unwrap();

    fx.write("20240101_a.yaml", "up: CREATE TABLE a2\ndown: DROP TABLE a2\n");
    fx.table("20240102_b", "b");

    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert_eq!(result.migrations, vec!["20240102_b"]);
    assert_eq!(result.checksum_mismatches.len(), 1);
    assert_eq!(result.checksum_mismatches[0].id, "20240101_a");

    let status = orchestrator.status().await.unwrap();
    let a = status.migrations.iter().find(|m| m.id == "20240101_a").unwrap();
    assert!(a.checksum_changed);
}

#[tokio::test]
async fn test_checksum_drift_fails_under_error_policy() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    let mut config = fx.config();
    config.checksum_policy = ChecksumPolicy::Error;
    let orchestrator = fx.orchestrator_with(config);
    orchestrator.run(Direction::Up, None).await.unwrap();

    fx.write("20240101_a.yaml", "up: CREATE TABLE a2\ndown: DROP TABLE a2\n");
    fx.table("20240102_b", "b");

    let err = orchestrator.run(Direction::Up, None).await.unwrap_err();
    assert!(matches!(&err, MigrateError::ChecksumMismatch { id, .. } if id == "20240101_a"));
    assert_eq!(fx.applied(), vec!["20240101_a"]);
}

#[tokio::test]
async fn test_warning_stops_the_run() {
    let fx = Fixture::new();
    fx.write(
        "20240101_flag.yaml",
        "up: UPDATE settings SET enabled = true WHERE name = 'x'\ndown: []\n",
    );
    fx.table("20240102_b", "b");
    let orchestrator = fx.orchestrator();

    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert!(result.partial);
    assert_eq!(result.migrations, vec!["20240101_flag"]);
    assert_eq!(result.warnings.len(), 1);
    assert!(result.warnings[0].message.contains("affected no rows"));
    assert_eq!(fx.applied(), vec!["20240101_flag"]);

    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert!(!result.partial);
    assert_eq!(result.migrations, vec!["20240102_b"]);
}

#[tokio::test]
async fn test_warnings_do_not_stop_when_disabled() {
    let fx = Fixture::new();
    fx.write(
        "20240101_flag.yaml",
        "up: DELETE FROM settings WHERE name = 'x'\ndown: []\n",
    );
    fx.table("20240102_b", "b");
    let mut config = fx.config();
    config.stop_on_warning = false;

    let result = fx.orchestrator_with(config).run(Direction::Up, None).await.unwrap();
    assert!(!result.partial);
    assert_eq!(result.migrations.len(), 2);
    assert_eq!(result.warnings.len(), 1);
}

#[tokio::test]
async fn test_failure_keeps_prior_progress_and_releases_lock() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    fx.table("20240103_c", "c");
    fx.store.fail_on("CREATE TABLE b");
    let orchestrator = fx.orchestrator();

    let err = orchestrator.run(Direction::Up, None).await.unwrap_err();
    match &err {
        MigrateError::StoreExecution { id, progress, .. } => {
            assert_eq!(id, "20240102_b");
            assert_eq!(progress.ids(), ["20240101_a".to_string()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fx.applied(), vec!["20240101_a"]);
    assert!(!fx.store.is_locked());

    fx.store.clear_failures();
    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert_eq!(result.migrations, vec!["20240102_b", "20240103_c"]);
    assert_eq!(result.batch, Some(2));
}

#[tokio::test]
async fn test_partial_non_transactional_failure_is_unverified() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.write(
        "20240102_b.yaml",
        "transaction: false\nup:\n  - CREATE TABLE b1\n  - CREATE TABLE b2\ndown: []\n",
    );
    fx.store.fail_on("CREATE TABLE b2");

    let err = fx.orchestrator().run(Direction::Up, None).await.unwrap_err();

    match &err {
        MigrateError::UnverifiedState { id, progress, .. } => {
            assert_eq!(id, "20240102_b");
            assert_eq!(progress.ids(), ["20240101_a".to_string()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.kind(), "UnverifiedStateError");
    assert!(fx.store.executed().contains(&"CREATE TABLE b1".to_string()));
    assert_eq!(fx.applied(), vec!["20240101_a"]);
}

#[tokio::test]
async fn test_missing_file_blocks_down_but_not_up() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    let orchestrator = fx.orchestrator();
    orchestrator.run(Direction::Up, None).await.unwrap();

    fs::remove_file(fx.migrations_dir().join("20240101_a.yaml")).unwrap();

    let err = orchestrator.run(Direction::Down, None).await.unwrap_err();
    assert!(matches!(&err, MigrateError::MissingMigration { ids } if ids == &["20240101_a".to_string()]));
    assert_eq!(fx.applied().len(), 2);

    fx.table("20240103_c", "c");
    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert_eq!(result.migrations, vec!["20240103_c"]);

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.missing.len(), 1);
    assert_eq!(status.missing[0].id, "20240101_a");
}

#[tokio::test]
async fn test_status_reports_applied_and_pending() {
    let fx = Fixture::new();
    fx.table("20240101_a", "a");
    fx.table("20240102_b", "b");
    let orchestrator = fx.orchestrator();
    orchestrator.run(Direction::Up, Some(1)).await.unwrap();

    let status = orchestrator.status().await.unwrap();
    assert_eq!(status.migrations.len(), 2);
    assert!(matches!(
        status.migrations[0].status,
        MigrationStatus::Applied { batch: 1, .. }
    ));
    assert_eq!(status.migrations[1].status, MigrationStatus::Pending);
    assert!(status.missing.is_empty());
}

#[tokio::test]
async fn test_created_migration_runs_as_noop_with_warning() {
    let fx = Fixture::new();
    let orchestrator = fx.orchestrator();

    let paths = orchestrator
        .create("add users", &CreateOptions::default())
        .unwrap();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].exists());

    let result = orchestrator.run(Direction::Up, None).await.unwrap();
    assert_eq!(result.migrations.len(), 1);
    assert!(!result.partial);
    assert_eq!(result.warnings[0].message, "up section is empty (no-op)");

    let err = orchestrator
        .create("add users", &CreateOptions::extension("js"))
        .unwrap_err();
    assert!(matches!(err, MigrateError::Configuration(_)));
}
