//! berth-placement: capacity- and density-aware host selection.
//!
//! Answers "which hosts, in which zones, can take N more instances of this
//! release?" It does NOT start anything (that's `berth-scheduler`); it
//! probes, weighs, and partitions hosts and produces a [`HostSelection`]
//! the orchestrator walks.
//!
//! # Components
//!
//! - **`weight`**: per-host free slots and weight (pure)
//! - **`zones`**: zone grouping and per-zone capacity checks (pure)
//! - **`chooser`**: live probing of the fleet ([`CapacityScheduler`])

pub mod chooser;
pub mod error;
pub mod request;
pub mod weight;
pub mod zones;

pub use chooser::CapacityScheduler;
pub use error::{PlacementError, PlacementResult};
pub use request::PlacementRequest;
pub use weight::{HostSnapshot, HostWeight, Rejection, free_slots, rank, weigh};
pub use zones::{HostSelection, ZonePlan, check, partition};
