//! Migration Rollback - Selects and reverts applied batches
//!
//! Reverting works on whole batches: a `down` run without a count reverts
//! the latest batch, with a count it reverts that many of the latest
//! batches. Within the selection migrations run newest first.

use std::collections::{BTreeSet, HashMap};

use super::definitions::{Direction, LedgerEntry, RunRequest, RunResult};
use super::manager::Migration;
use super::runner::Orchestrator;
use crate::error::MigrateResult;

/// Migrations to revert for a `down` run, in descending id order.
///
/// Entries without a file are skipped here; the runner refuses to revert
/// while any exist.
pub(crate) fn plan_rollback<'a>(
    entries: &[LedgerEntry],
    by_id: &HashMap<&str, &'a Migration>,
    count: Option<u32>,
) -> Vec<&'a Migration> {
    let batches: BTreeSet<i64> = entries.iter().map(|e| e.batch).collect();
    let take = count.unwrap_or(1) as usize;
    let selected: BTreeSet<i64> = batches.into_iter().rev().take(take).collect();

    let mut ids: Vec<&str> = entries
        .iter()
        .filter(|e| selected.contains(&e.batch))
        .map(|e| e.id.as_str())
        .collect();
    ids.sort_unstable_by(|a, b| b.cmp(a));

    ids.into_iter()
        .filter_map(|id| by_id.get(id).copied())
        .collect()
}

impl Orchestrator {
    /// Revert the most recent batch
    pub async fn rollback_last_batch(&self) -> MigrateResult<RunResult> {
        self.run_request(RunRequest::down()).await
    }

    /// Revert every applied migration, newest first
    pub async fn rollback_all(&self) -> MigrateResult<RunResult> {
        self.run_request(RunRequest::new(Direction::Down, Some(u32::MAX))?)
            .await
    }
}
