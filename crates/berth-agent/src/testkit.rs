//! In-process host agent for tests.
//!
//! `FakeAgent` keeps per-host health snapshots and a container list, records
//! every deploy attempt and teardown call, and can be told to fail deploys
//! on specific hosts or for the next N calls.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use berth_state::InstanceId;

use crate::HostAgent;
use crate::error::{AgentError, AgentResult};
use crate::types::*;

/// Build a healthy snapshot with the given free figures (totals are 2× free).
pub fn healthy(zone: &str, containers_free: u64, memory_free: u64, cpu_free: u64) -> HostHealth {
    HostHealth {
        status: AgentStatus::Ok,
        zone: zone.to_string(),
        containers: Capacity {
            total: containers_free * 2,
            free: containers_free,
            used: containers_free,
        },
        memory: Capacity {
            total: memory_free * 2,
            free: memory_free,
            used: memory_free,
        },
        cpu: Capacity {
            total: cpu_free * 2,
            free: cpu_free,
            used: cpu_free,
        },
    }
}

#[derive(Default)]
struct FakeState {
    health: BTreeMap<String, HostHealth>,
    containers: BTreeMap<String, Vec<InstanceId>>,
    failing_hosts: HashSet<String>,
    unreachable_hosts: HashSet<String>,
    failing_teardowns: HashSet<String>,
    /// Outcome override for upcoming deploy calls, front first.
    scripted: VecDeque<bool>,
    next_port: u16,
    deploy_attempts: Vec<String>,
    teardown_calls: Vec<(String, Vec<InstanceId>, bool)>,
}

/// Scriptable in-memory [`HostAgent`].
#[derive(Default)]
pub struct FakeAgent {
    state: Mutex<FakeState>,
}

impl FakeAgent {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a host and the health snapshot it reports.
    pub fn add_host(&self, host: &str, health: HostHealth) {
        self.state().health.insert(host.to_string(), health);
    }

    /// Every deploy on `host` answers with a non-OK status.
    pub fn fail_deploys_on(&self, host: &str) {
        self.state().failing_hosts.insert(host.to_string());
    }

    /// Every call to `host` fails at the transport level.
    pub fn make_unreachable(&self, host: &str) {
        self.state().unreachable_hosts.insert(host.to_string());
    }

    /// Teardown calls to `host` answer with a non-OK status.
    pub fn fail_teardowns_on(&self, host: &str) {
        self.state().failing_teardowns.insert(host.to_string());
    }

    /// The next `n` deploy calls fail regardless of host.
    pub fn fail_next_deploys(&self, n: usize) {
        self.state().scripted.extend(std::iter::repeat_n(false, n));
    }

    /// Hosts that received a deploy call, in call order.
    pub fn deploy_attempts(&self) -> Vec<String> {
        self.state().deploy_attempts.clone()
    }

    /// `(host, ids, all)` for every teardown call, in call order.
    pub fn teardown_calls(&self) -> Vec<(String, Vec<InstanceId>, bool)> {
        self.state().teardown_calls.clone()
    }

    /// Containers the fake believes are running on `host`.
    pub fn containers_on(&self, host: &str) -> Vec<InstanceId> {
        self.state().containers.get(host).cloned().unwrap_or_default()
    }

    /// Total running containers across all hosts.
    pub fn running(&self) -> usize {
        self.state().containers.values().map(Vec::len).sum()
    }
}

fn unreachable(host: &str) -> AgentError {
    AgentError::Connect {
        host: host.to_string(),
        reason: "connection refused".to_string(),
    }
}

#[async_trait]
impl HostAgent for FakeAgent {
    async fn health_check(&self, host: &str) -> AgentResult<HostHealth> {
        let state = self.state();
        if state.unreachable_hosts.contains(host) {
            return Err(unreachable(host));
        }
        state.health.get(host).cloned().ok_or_else(|| unreachable(host))
    }

    async fn deploy(&self, host: &str, call: &DeployCall) -> AgentResult<DeployResponse> {
        let mut state = self.state();
        state.deploy_attempts.push(host.to_string());
        if state.unreachable_hosts.contains(host) {
            return Err(unreachable(host));
        }
        let scripted = state.scripted.pop_front();
        if scripted == Some(false) || state.failing_hosts.contains(host) {
            return Ok(DeployResponse {
                status: AgentStatus::Error,
                port: 0,
            });
        }

        if state.next_port == 0 {
            state.next_port = 61000;
        }
        let port = state.next_port;
        state.next_port += 1;
        state
            .containers
            .entry(host.to_string())
            .or_default()
            .push(call.container_id.clone());
        Ok(DeployResponse {
            status: AgentStatus::Ok,
            port,
        })
    }

    async fn teardown(
        &self,
        host: &str,
        ids: &[InstanceId],
        all: bool,
    ) -> AgentResult<TeardownResponse> {
        let mut state = self.state();
        state
            .teardown_calls
            .push((host.to_string(), ids.to_vec(), all));
        if state.unreachable_hosts.contains(host) {
            return Err(unreachable(host));
        }
        if state.failing_teardowns.contains(host) {
            return Ok(TeardownResponse {
                status: AgentStatus::Error,
                container_ids: Vec::new(),
            });
        }

        let running = state.containers.entry(host.to_string()).or_default();
        let mut removed: Vec<InstanceId> = ids.to_vec();
        if all {
            for id in running.iter() {
                if !removed.contains(id) {
                    removed.push(id.clone());
                }
            }
            running.clear();
        } else {
            running.retain(|id| !ids.contains(id));
        }
        Ok(TeardownResponse {
            status: AgentStatus::Ok,
            container_ids: removed,
        })
    }
}
