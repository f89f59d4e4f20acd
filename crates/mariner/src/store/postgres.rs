//! PostgreSQL store
//!
//! PostgreSQL runs DDL inside transactions, so a transactional procedure and
//! its ledger write commit or roll back together. The run lock is a session
//! advisory lock held on a dedicated pooled connection.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool, Postgres, Row};
use std::time::Duration;

use super::{
    classify_failure, ExecutionOutput, Ledger, LedgerWrite, LockGuard, LockHandle, LockManager,
    Procedure, StatementOutcome, StoreAdapter, StoreFailure,
};
use crate::config::is_valid_table_name;
use crate::error::{MigrateError, MigrateResult};
use crate::migrations::definitions::LedgerEntry;

pub struct PostgresStore {
    pool: PgPool,
    target: String,
    migrations_table: String,
    lock_key: i64,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, migrations_table: &str) -> MigrateResult<Self> {
        let target = Self::target_identity(database_url)?;

        // One connection holds the advisory lock while another executes
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to {}: {}", target, e);
                e
            })?;

        tracing::debug!("Connected to {}", target);
        Self::new(pool, target, migrations_table)
    }

    pub fn new(pool: PgPool, target: String, migrations_table: &str) -> MigrateResult<Self> {
        if !is_valid_table_name(migrations_table) {
            return Err(MigrateError::config(format!(
                "Invalid migrations table name '{}'",
                migrations_table
            )));
        }
        Ok(Self {
            pool,
            target,
            lock_key: Self::lock_key(migrations_table),
            migrations_table: migrations_table.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// `host:port/database` of a connection URL, without credentials
    pub fn target_identity(database_url: &str) -> MigrateResult<String> {
        let url = url::Url::parse(database_url)
            .map_err(|e| MigrateError::config(format!("Invalid database URL: {}", e)))?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(MigrateError::config(format!(
                "Unsupported database scheme '{}'",
                url.scheme()
            )));
        }

        let host = url.host_str().filter(|h| !h.is_empty()).unwrap_or("localhost");
        let port = url.port().unwrap_or(5432);
        let database = url.path().trim_start_matches('/');
        let database = if database.is_empty() {
            url.username()
        } else {
            database
        };
        Ok(format!("{}:{}/{}", host, port, database))
    }

    /// Advisory lock key; advisory locks are already scoped to the database
    pub fn lock_key(migrations_table: &str) -> i64 {
        let digest = Sha256::digest(format!("mariner:{}", migrations_table).as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        i64::from_be_bytes(bytes)
    }

    /// SQL to create the migrations tracking table
    pub fn create_migrations_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                id VARCHAR(255) PRIMARY KEY,\n    \
                checksum VARCHAR(64) NOT NULL,\n    \
                batch BIGINT NOT NULL,\n    \
                applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
            )",
            self.migrations_table
        )
    }

    /// SQL to check for the migrations tracking table
    pub fn ledger_exists_sql(&self) -> String {
        "SELECT to_regclass($1) IS NOT NULL".to_string()
    }

    /// SQL to record a migration as applied
    pub fn record_migration_sql(&self) -> String {
        format!(
            "INSERT INTO {} (id, checksum, batch, applied_at) VALUES ($1, $2, $3, CURRENT_TIMESTAMP)",
            self.migrations_table
        )
    }

    /// SQL to remove a migration record (for rollback)
    pub fn remove_migration_sql(&self) -> String {
        format!("DELETE FROM {} WHERE id = $1", self.migrations_table)
    }

    /// SQL to get applied migrations
    pub fn get_applied_migrations_sql(&self) -> String {
        format!(
            "SELECT id, checksum, batch, applied_at FROM {} ORDER BY id",
            self.migrations_table
        )
    }

    /// SQL to get the next batch number
    pub fn get_next_batch_sql(&self) -> String {
        format!(
            "SELECT COALESCE(MAX(batch), 0) + 1 FROM {}",
            self.migrations_table
        )
    }

    async fn write_ledger<'e, E>(&self, executor: E, write: &LedgerWrite) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Postgres>,
    {
        match write {
            LedgerWrite::Record { id, checksum, batch } => {
                sqlx::query(&self.record_migration_sql())
                    .bind(id)
                    .bind(checksum)
                    .bind(batch)
                    .execute(executor)
                    .await?;
            }
            LedgerWrite::Unrecord { id } => {
                sqlx::query(&self.remove_migration_sql())
                    .bind(id)
                    .execute(executor)
                    .await?;
            }
        }
        Ok(())
    }

    async fn execute_in_transaction(
        &self,
        procedure: &Procedure,
        write: &LedgerWrite,
    ) -> Result<ExecutionOutput, StoreFailure> {
        let mut transaction = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreFailure::Clean(format!("Failed to start transaction: {}", e)))?;

        let mut output = ExecutionOutput::default();
        for statement in &procedure.statements {
            // Dropping the transaction on error rolls it back
            let result = (&mut *transaction)
                .execute(statement.as_str())
                .await
                .map_err(|e| StoreFailure::Clean(e.to_string()))?;
            output.statements.push(StatementOutcome {
                statement: statement.clone(),
                rows_affected: result.rows_affected(),
            });
        }

        self.write_ledger(&mut *transaction, write)
            .await
            .map_err(|e| StoreFailure::Clean(format!("Failed to update ledger: {}", e)))?;

        transaction.commit().await.map_err(|e| {
            StoreFailure::Unverified(format!("Commit outcome unknown: {}", e))
        })?;

        Ok(output)
    }

    async fn execute_without_transaction(
        &self,
        procedure: &Procedure,
        write: &LedgerWrite,
    ) -> Result<ExecutionOutput, StoreFailure> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| StoreFailure::Clean(format!("Failed to acquire connection: {}", e)))?;

        let mut output = ExecutionOutput::default();
        for (index, statement) in procedure.statements.iter().enumerate() {
            let result = (&mut *conn)
                .execute(statement.as_str())
                .await
                .map_err(|e| classify_failure(false, index, e.to_string()))?;
            output.statements.push(StatementOutcome {
                statement: statement.clone(),
                rows_affected: result.rows_affected(),
            });
        }

        self.write_ledger(&mut *conn, write).await.map_err(|e| {
            classify_failure(
                false,
                output.statements.len(),
                format!("Statements ran but the ledger write failed: {}", e),
            )
        })?;

        Ok(output)
    }
}

#[async_trait]
impl StoreAdapter for PostgresStore {
    fn target(&self) -> &str {
        &self.target
    }

    fn is_transactional(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        procedure: &Procedure,
        write: &LedgerWrite,
    ) -> Result<ExecutionOutput, StoreFailure> {
        if procedure.transactional {
            self.execute_in_transaction(procedure, write).await
        } else {
            self.execute_without_transaction(procedure, write).await
        }
    }
}

#[async_trait]
impl Ledger for PostgresStore {
    async fn ensure(&self) -> MigrateResult<()> {
        sqlx::query(&self.create_migrations_table_sql())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self) -> MigrateResult<bool> {
        let row = sqlx::query(&self.ledger_exists_sql())
            .bind(&self.migrations_table)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn entries(&self) -> MigrateResult<Vec<LedgerEntry>> {
        let rows = sqlx::query(&self.get_applied_migrations_sql())
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(LedgerEntry {
                id: row.try_get("id")?,
                checksum: row.try_get("checksum")?,
                batch: row.try_get("batch")?,
                applied_at: row.try_get("applied_at")?,
            });
        }
        Ok(records)
    }

    async fn record(&self, id: &str, checksum: &str, batch: i64) -> MigrateResult<()> {
        let write = LedgerWrite::Record {
            id: id.to_string(),
            checksum: checksum.to_string(),
            batch,
        };
        self.write_ledger(&self.pool, &write).await?;
        Ok(())
    }

    async fn unrecord(&self, id: &str) -> MigrateResult<()> {
        let write = LedgerWrite::Unrecord { id: id.to_string() };
        self.write_ledger(&self.pool, &write).await?;
        Ok(())
    }

    async fn next_batch_number(&self) -> MigrateResult<i64> {
        let row = sqlx::query(&self.get_next_batch_sql())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get(0)?)
    }
}

struct AdvisoryLock {
    conn: Option<PoolConnection<Postgres>>,
    key: i64,
}

#[async_trait]
impl LockHandle for AdvisoryLock {
    async fn release(mut self: Box<Self>) -> MigrateResult<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };
        // On error or cancellation the connection stays in `self` and Drop closes it
        let released: bool = sqlx::query_scalar("SELECT pg_advisory_unlock($1)")
            .bind(self.key)
            .fetch_one(&mut **conn)
            .await?;
        if !released {
            tracing::warn!("Advisory lock {} was not held at release", self.key);
        }
        // Unlocked; the connection can go back to the pool
        drop(self.conn.take());
        Ok(())
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        // Closing the session frees the advisory lock without a round-trip
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

#[async_trait]
impl LockManager for PostgresStore {
    fn lock_scope(&self) -> String {
        self.target.clone()
    }

    async fn try_acquire(&self) -> MigrateResult<Option<LockGuard>> {
        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(self.lock_key)
            .fetch_one(&mut *conn)
            .await?;

        if !acquired {
            return Ok(None);
        }

        Ok(Some(LockGuard::new(
            self.target.clone(),
            Box::new(AdvisoryLock {
                conn: Some(conn),
                key: self.lock_key,
            }),
        )))
    }
}
