//! redb table definitions for the coordination store.
//!
//! The store is a single key-path namespace: every document lives in
//! [`NODES`] under its full `/`-joined path, so a prefix range scan yields
//! a subtree.

use redb::TableDefinition;

/// Documents keyed by absolute path (`/hosts/{host}/containers/{id}`).
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");
