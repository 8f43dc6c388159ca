//! Wiring of the orchestrator and registries over one store.

use std::sync::Arc;

use tracing::info;

use berth_agent::HostAgent;
use berth_state::StateStore;

use crate::env_usage::EnvUsage;
use crate::environments::Environments;
use crate::error::SchedulerResult;
use crate::hosts::HostRegistry;
use crate::orchestrator::Orchestrator;
use crate::pool::{RoutingPool, StorePool};

/// Everything a control-plane process needs, sharing one usage guard.
#[derive(Clone)]
pub struct ControlPlane {
    pub orchestrator: Arc<Orchestrator>,
    pub environments: Environments,
    pub hosts: HostRegistry,
}

impl ControlPlane {
    /// Rebuild environment usage from `store` and wire a store-backed pool.
    pub fn open(store: StateStore, agent: Arc<dyn HostAgent>) -> SchedulerResult<Self> {
        let pool = Arc::new(StorePool::new(store.clone()));
        Self::with_pool(store, agent, pool)
    }

    pub fn with_pool(
        store: StateStore,
        agent: Arc<dyn HostAgent>,
        pool: Arc<dyn RoutingPool>,
    ) -> SchedulerResult<Self> {
        let usage = Arc::new(EnvUsage::rebuild(&store)?);
        let environments = Environments::new(store.clone(), Arc::clone(&usage));
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), agent, pool, usage));
        let hosts = HostRegistry::new(store, Arc::clone(&orchestrator));
        info!("control plane ready");
        Ok(Self {
            orchestrator,
            environments,
            hosts,
        })
    }
}
