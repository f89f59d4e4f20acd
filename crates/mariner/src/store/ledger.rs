//! Applied-state ledger
//!
//! The ledger lives inside the target store and records which migrations
//! are applied, in which batch and with which content checksum.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::MigrateResult;
use crate::migrations::definitions::LedgerEntry;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create the ledger structure if it does not exist yet. Never destructive.
    async fn ensure(&self) -> MigrateResult<()>;

    /// Whether the ledger structure exists. Never creates it.
    async fn exists(&self) -> MigrateResult<bool>;

    /// All ledger entries, ordered by id
    async fn entries(&self) -> MigrateResult<Vec<LedgerEntry>>;

    async fn record(&self, id: &str, checksum: &str, batch: i64) -> MigrateResult<()>;

    async fn unrecord(&self, id: &str) -> MigrateResult<()>;

    async fn applied_ids(&self) -> MigrateResult<BTreeSet<String>> {
        Ok(self.entries().await?.into_iter().map(|e| e.id).collect())
    }

    async fn next_batch_number(&self) -> MigrateResult<i64> {
        let latest = self
            .entries()
            .await?
            .iter()
            .map(|e| e.batch)
            .max()
            .unwrap_or(0);
        Ok(latest + 1)
    }
}
