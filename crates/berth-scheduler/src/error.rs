//! Orchestrator error types.

use thiserror::Error;

use berth_agent::AgentError;
use berth_lock::LockError;
use berth_placement::PlacementError;
use berth_state::StateError;

/// Errors that can occur during deploy / teardown / move / copy.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Scope lock refused; the message names the blocking owner.
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Host selection failed (no zones, no hosts, capacity shortfall).
    #[error(transparent)]
    Placement(#[from] PlacementError),

    /// The per-zone failure budget ran out. Nothing from the operation remains.
    #[error("placement failed in zone {zone}: deployed {deployed} of {requested} instances")]
    PlacementFailed {
        zone: String,
        deployed: u32,
        requested: u32,
    },

    #[error("host {host} rejected {operation}")]
    RemoteStatus { host: String, operation: &'static str },

    #[error("routing pool update failed: {0}")]
    PoolUpdate(String),

    #[error("state inconsistency: {0}")]
    StateInconsistency(String),

    #[error("environment {0} is in use")]
    EnvironmentInUse(String),

    #[error("environment not found: {0}")]
    EnvironmentNotFound(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("host agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

impl SchedulerError {
    /// True if the operation was refused by a conflicting scope lock.
    pub fn is_lock_conflict(&self) -> bool {
        matches!(self, SchedulerError::Lock(LockError::Conflict { .. }))
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
