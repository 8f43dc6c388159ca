//! berth-agent: the control plane's view of worker-host agents.
//!
//! Every worker runs an agent that reports health and capacity, starts
//! containers, and tears them down. The control plane only talks to it
//! through the [`HostAgent`] trait; [`HttpAgent`] is the JSON-over-HTTP/1
//! implementation and `testkit::FakeAgent` (feature `testkit`) an
//! in-process stand-in for tests.
//!
//! Every call made by [`HttpAgent`] is bounded by its configured timeout;
//! callers never add their own.

pub mod client;
pub mod error;
pub mod types;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

use async_trait::async_trait;

use berth_state::InstanceId;

pub use client::HttpAgent;
pub use error::{AgentError, AgentResult};
pub use types::*;

/// Remote operations on a single worker host.
#[async_trait]
pub trait HostAgent: Send + Sync {
    /// Probe the host's health, zone, and free capacity.
    async fn health_check(&self, host: &str) -> AgentResult<HostHealth>;

    /// Start one container. A non-OK status in the response is a failed deploy.
    async fn deploy(&self, host: &str, call: &DeployCall) -> AgentResult<DeployResponse>;

    /// Remove `ids` (or everything, if `all`) from the host.
    async fn teardown(
        &self,
        host: &str,
        ids: &[InstanceId],
        all: bool,
    ) -> AgentResult<TeardownResponse>;
}
