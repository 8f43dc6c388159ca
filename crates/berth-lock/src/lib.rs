//! berth-lock: mutual exclusion over hierarchical release scopes.
//!
//! A deploy locks the leaf `/app/sha/env`; a teardown locks whatever level
//! it targets, down to the wildcard `/`. Two locks conflict when one path is
//! a segment-wise prefix of the other. Locks are advisory entries in a single
//! table document in the [`berth_state::StateStore`]. Every read-modify-write
//! of that table runs under the store's in-process mutex, so tasks sharing
//! one store handle observe each other's locks; the redb file itself is
//! opened by a single process.

pub mod error;
pub mod lock;
pub mod path;

pub use error::{LockError, LockResult};
pub use lock::{LockGuard, LockKind, LockTable, ScopeLock, lock_table};
pub use path::LockPath;
