//! Request and response bodies exchanged with host agents.

use serde::{Deserialize, Serialize};

use berth_state::{InstanceId, Manifest};

/// Outcome reported by an agent. Anything but `"OK"` is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AgentStatus {
    Ok,
    #[serde(other)]
    Error,
}

impl AgentStatus {
    pub fn is_ok(self) -> bool {
        self == AgentStatus::Ok
    }
}

/// Total / free / used figures for one resource on a host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub total: u64,
    pub free: u64,
    pub used: u64,
}

/// Health and capacity snapshot returned by `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHealth {
    pub status: AgentStatus,
    pub zone: String,
    /// Container slots.
    pub containers: Capacity,
    /// Memory in MB.
    pub memory: Capacity,
    /// CPU shares.
    pub cpu: Capacity,
}

/// Body of `POST /deploy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployCall {
    pub app: String,
    pub sha: String,
    pub env: String,
    pub container_id: InstanceId,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployResponse {
    pub status: AgentStatus,
    #[serde(default)]
    pub port: u16,
}

/// Body of `POST /teardown`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownCall {
    pub container_ids: Vec<InstanceId>,
    /// Remove every container on the host, not just `container_ids`.
    pub all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownResponse {
    pub status: AgentStatus,
    /// Containers actually removed.
    #[serde(default)]
    pub container_ids: Vec<InstanceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_status_decodes_as_error() {
        let resp: DeployResponse = serde_json::from_str(r#"{"status":"BUSY"}"#).unwrap();
        assert_eq!(resp.status, AgentStatus::Error);
        assert_eq!(resp.port, 0);

        let ok: DeployResponse = serde_json::from_str(r#"{"status":"OK","port":61001}"#).unwrap();
        assert!(ok.status.is_ok());
    }
}
