//! Key-path layout of the coordination store.

use crate::error::{StateError, StateResult};

pub const INSTANCES: &str = "/instances";
pub const INSTANCE_IDS: &str = "/instance_ids";
pub const HOSTS: &str = "/hosts";
pub const MANIFESTS: &str = "/manifests";
pub const ENVIRONMENTS: &str = "/environments";
pub const POOLS: &str = "/pools";
pub const LOCK_TABLE: &str = "/lock/table";
pub const LOCK_MUTEX: &str = "/lock/mutex";

/// Reject segments that would break the path hierarchy.
pub fn validate_segment(segment: &str) -> StateResult<()> {
    if segment.is_empty() || segment.contains('/') || segment == "." || segment == ".." {
        return Err(StateError::InvalidSegment(segment.to_string()));
    }
    Ok(())
}

/// Join a root with child segments: `join("/hosts", ["h1"])` → `/hosts/h1`.
pub fn join<S: AsRef<str>>(root: &str, segments: &[S]) -> String {
    let mut path = root.trim_end_matches('/').to_string();
    for segment in segments {
        path.push('/');
        path.push_str(segment.as_ref());
    }
    if path.is_empty() {
        path.push('/');
    }
    path
}

/// Prefix matching every descendant of `path` (never the path itself).
pub fn subtree_prefix(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{trimmed}/")
}

pub fn instance(app: &str, sha: &str, env: &str, id: &str) -> String {
    join(INSTANCES, &[app, sha, env, id])
}

pub fn instance_id(id: &str) -> String {
    join(INSTANCE_IDS, &[id])
}

pub fn host(host: &str) -> String {
    join(HOSTS, &[host])
}

pub fn host_containers(host: &str) -> String {
    join(HOSTS, &[host, "containers"])
}

pub fn host_container(host: &str, id: &str) -> String {
    join(HOSTS, &[host, "containers", id])
}

pub fn manifest(app: &str, sha: &str) -> String {
    join(MANIFESTS, &[app, sha])
}

pub fn environment(name: &str) -> String {
    join(ENVIRONMENTS, &[name])
}

pub fn pool(app: &str, sha: &str, env: &str) -> String {
    join(POOLS, &[app, sha, env])
}
