//! What a caller asks the capacity scheduler for.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use berth_state::Manifest;

/// One placement question: room for `instances` copies of app/sha in env,
/// in every zone of `zones`, avoiding `exclude`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub app: String,
    pub sha: String,
    pub env: String,
    /// Instances needed per zone.
    pub instances: u32,
    /// CPU shares per instance.
    pub cpu_shares: u32,
    /// Memory per instance in MB.
    pub memory_mb: u32,
    /// Zones to satisfy, in processing order.
    pub zones: Vec<String>,
    /// Hosts never to select.
    #[serde(default)]
    pub exclude: BTreeSet<String>,
}

impl PlacementRequest {
    /// Request sized by a release manifest.
    pub fn for_manifest(app: &str, sha: &str, env: &str, manifest: &Manifest, zones: Vec<String>) -> Self {
        Self {
            app: app.to_string(),
            sha: sha.to_string(),
            env: env.to_string(),
            instances: manifest.instances,
            cpu_shares: manifest.cpu_shares,
            memory_mb: manifest.memory_limit,
            zones,
            exclude: BTreeSet::new(),
        }
    }

    pub fn with_instances(mut self, instances: u32) -> Self {
        self.instances = instances;
        self
    }

    pub fn excluding(mut self, host: impl Into<String>) -> Self {
        self.exclude.insert(host.into());
        self
    }
}
