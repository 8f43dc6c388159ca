//! berth-scheduler: deploy, teardown, move and copy orchestration.
//!
//! Turns requests into running instances on worker hosts:
//!
//! - Takes the scope lock for the request (`berth-lock`)
//! - Chooses hosts per zone (`berth-placement`)
//! - Starts containers through the host agent, retrying round-robin
//! - Rolls back the whole operation when any zone falls short
//! - Keeps instance records, host relations, the routing pool and the
//!   environment usage guard in step
//!
//! # Architecture
//!
//! ```text
//! Executor (Deploy / Teardown / Move / Copy)
//!   ├── Authorizer
//!   ├── ScopeLock (owner = task id)
//!   └── Orchestrator
//!       ├── CapacityScheduler (host selection)
//!       ├── HostAgent (deploy / teardown calls)
//!       ├── StateStore (instances, host relations, manifests)
//!       ├── RoutingPool (endpoint membership)
//!       └── EnvUsage (env → app/sha → count)
//! ```

pub mod cleanup;
pub mod control;
pub mod env_usage;
pub mod environments;
pub mod error;
pub mod executor;
pub mod hosts;
pub mod orchestrator;
pub mod pool;
pub mod task;

pub use cleanup::{CleanupFailure, CleanupReport, CleanupStep};
pub use control::ControlPlane;
pub use env_usage::EnvUsage;
pub use environments::Environments;
pub use error::{SchedulerError, SchedulerResult};
pub use executor::{
    Action, AllowAll, AppAllowList, Authorizer, CopyExecutor, CopyRequest, DeployExecutor,
    DeployReply, DeployRequest, Executor, MoveExecutor, MoveRequest, TeardownExecutor,
    TeardownReply, TeardownRequest, run,
};
pub use hosts::HostRegistry;
pub use orchestrator::{MoveOutcome, Orchestrator, TeardownTarget, new_instance_id};
pub use pool::{RoutingPool, StorePool};
pub use task::{TaskContext, TaskLog};
