//! Capacity scheduling errors.

use thiserror::Error;

use berth_state::StateError;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("no zones requested for {app}")]
    NoZones { app: String },

    #[error("cannot place {app}: no eligible hosts in zone {zone}")]
    NoHostsInZone { app: String, zone: String },

    /// Capacity shortfall; never retried.
    #[error("cannot place {app}: zone {zone} has room for {available} instances, {requested} requested")]
    InsufficientCapacity {
        app: String,
        zone: String,
        requested: u64,
        available: u64,
    },

    #[error("host inventory error: {0}")]
    State(#[from] StateError),
}

impl PlacementError {
    /// Zone the error is about, if any.
    pub fn zone(&self) -> Option<&str> {
        match self {
            PlacementError::NoHostsInZone { zone, .. }
            | PlacementError::InsufficientCapacity { zone, .. } => Some(zone),
            _ => None,
        }
    }
}
