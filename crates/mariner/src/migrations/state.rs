//! Per-migration lifecycle within a run
//!
//! Up:   Pending -> Applying -> Applied | Failed
//! Down: Applied -> Reverting -> Reverted | Failed
//!
//! `Failed` is terminal and stops the run.

use serde::Serialize;
use std::fmt;

use super::definitions::Direction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationState {
    Pending,
    Applying,
    Applied,
    Reverting,
    Reverted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Start(Direction),
    Succeed,
    Fail,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Illegal lifecycle transition for {id}: {from} on {event:?}")]
pub struct IllegalTransition {
    pub id: String,
    pub from: MigrationState,
    pub event: LifecycleEvent,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Pending => "pending",
            MigrationState::Applying => "applying",
            MigrationState::Applied => "applied",
            MigrationState::Reverting => "reverting",
            MigrationState::Reverted => "reverted",
            MigrationState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl MigrationState {
    /// Starting state of a candidate for the given direction
    pub fn initial(direction: Direction) -> Self {
        match direction {
            Direction::Up => MigrationState::Pending,
            Direction::Down => MigrationState::Applied,
        }
    }

    pub fn next(self, event: LifecycleEvent) -> Option<Self> {
        use LifecycleEvent::*;
        use MigrationState::*;

        match (self, event) {
            (Pending, Start(Direction::Up)) => Some(Applying),
            (Applied, Start(Direction::Down)) => Some(Reverting),
            (Applying, Succeed) => Some(Applied),
            (Reverting, Succeed) => Some(Reverted),
            (Applying | Reverting, Fail) => Some(Failed),
            _ => None,
        }
    }

    pub fn is_in_flight(self) -> bool {
        matches!(self, MigrationState::Applying | MigrationState::Reverting)
    }
}

/// Lifecycle tracker for one candidate
#[derive(Debug, Clone)]
pub struct Lifecycle {
    id: String,
    state: MigrationState,
}

impl Lifecycle {
    pub fn new(id: impl Into<String>, direction: Direction) -> Self {
        Self {
            id: id.into(),
            state: MigrationState::initial(direction),
        }
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn advance(&mut self, event: LifecycleEvent) -> Result<MigrationState, IllegalTransition> {
        let next = self.state.next(event).ok_or_else(|| IllegalTransition {
            id: self.id.clone(),
            from: self.state,
            event,
        })?;
        tracing::trace!("{}: {} -> {}", self.id, self.state, next);
        self.state = next;
        Ok(next)
    }
}
