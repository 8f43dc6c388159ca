//! Domain types persisted in the coordination store.
//!
//! All types are JSON-serialized into the `nodes` table under the paths
//! built by [`crate::paths`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier of a placed instance (`{app}-{sha}-{env}-{suffix}`).
pub type InstanceId = String;

/// Container id → port on one host.
pub type PortMap = BTreeMap<InstanceId, u16>;

// ── Instance ──────────────────────────────────────────────────────

/// One running copy of an application release in an environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instance {
    pub id: InstanceId,
    pub app: String,
    pub sha: String,
    pub env: String,
    pub host: String,
    /// Zero while the id is reserved and the remote deploy is in flight.
    pub port: u16,
    pub internal: bool,
}

impl Instance {
    /// `host:port` endpoint for the routing pool.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ── Scope ─────────────────────────────────────────────────────────

/// An app, optionally narrowed by sha, optionally narrowed by env.
///
/// The empty scope covers everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub app: Option<String>,
    pub sha: Option<String>,
    pub env: Option<String>,
}

impl Scope {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn app(app: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            ..Self::default()
        }
    }

    pub fn app_sha(app: &str, sha: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            sha: Some(sha.to_string()),
            env: None,
        }
    }

    pub fn release(app: &str, sha: &str, env: &str) -> Self {
        Self {
            app: Some(app.to_string()),
            sha: Some(sha.to_string()),
            env: Some(env.to_string()),
        }
    }

    /// Present segments in order, stopping at the first missing level.
    pub fn segments(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(3);
        for part in [&self.app, &self.sha, &self.env] {
            match part {
                Some(value) => out.push(value.as_str()),
                None => break,
            }
        }
        out
    }

    pub fn contains(&self, instance: &Instance) -> bool {
        self.app.as_ref().is_none_or(|a| *a == instance.app)
            && self.sha.as_ref().is_none_or(|s| *s == instance.sha)
            && self.env.as_ref().is_none_or(|e| *e == instance.env)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let segments = self.segments();
        if segments.is_empty() {
            f.write_str("/")
        } else {
            write!(f, "/{}", segments.join("/"))
        }
    }
}

// ── Host ──────────────────────────────────────────────────────────

/// A worker host known to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRecord {
    pub name: String,
    /// Zone given at registration; `None` for hosts only touched by a placement.
    pub zone: Option<String>,
}

// ── Manifest ──────────────────────────────────────────────────────

/// Build-time resource descriptor for one app+sha.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    /// Instances requested per zone.
    pub instances: u32,
    pub cpu_shares: u32,
    /// Memory limit in MB.
    pub memory_limit: u32,
    #[serde(default)]
    pub internal: bool,
}

// ── Environment ───────────────────────────────────────────────────

/// A named environment definition instances are deployed into.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Environment {
    pub name: String,
    pub parent: Option<String>,
    /// Dependency name → value made available to instances in this env.
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
}
