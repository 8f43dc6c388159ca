//! berth-state: coordination store for the Berth control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides a hierarchical key-path
//! namespace (get / set / children / recursive delete) plus a path-scoped
//! mutex for read-modify-write sequences such as the scope-lock table.
//!
//! # Layout
//!
//! ```text
//! /instances/{app}/{sha}/{env}/{id}   Instance (scope index)
//! /instance_ids/{id}                  Instance (id index)
//! /hosts/{host}                       HostRecord
//! /hosts/{host}/containers/{id}       port
//! /manifests/{app}/{sha}              Manifest
//! /environments/{name}                Environment
//! /pools/{app}/{sha}/{env}/{id}       "host:port"
//! /lock/table                         lock path → owner
//! ```
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod paths;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
