//! Host inventory.

use std::sync::Arc;

use tracing::{error, info};

use berth_lock::ScopeLock;
use berth_state::{HostRecord, PortMap, Scope, StateStore, paths};

use crate::cleanup::CleanupReport;
use crate::error::SchedulerResult;
use crate::orchestrator::Orchestrator;
use crate::task::TaskContext;

#[derive(Clone)]
pub struct HostRegistry {
    store: StateStore,
    orchestrator: Arc<Orchestrator>,
}

impl HostRegistry {
    pub fn new(store: StateStore, orchestrator: Arc<Orchestrator>) -> Self {
        Self { store, orchestrator }
    }

    pub fn register(&self, host: &str, zone: &str) -> SchedulerResult<()> {
        paths::validate_segment(zone)?;
        self.store.register_host(host, zone)?;
        info!(%host, %zone, "host registered");
        Ok(())
    }

    /// Retire a host: clean up the instances recorded on it and drop its
    /// container relations. Runs under the wildcard teardown lock so no
    /// placement can pick the host meanwhile.
    pub async fn unregister(&self, ctx: &dyn TaskContext, host: &str) -> SchedulerResult<CleanupReport> {
        let guard = ScopeLock::teardown(self.store.clone(), ctx.id(), &Scope::all())?
            .acquire()
            .await?;
        let result = self.orchestrator.retire_host(ctx, host).await;
        if let Err(e) = guard.release().await {
            error!(%host, error = %e, "failed to release scope lock");
        }
        result
    }

    pub fn list(&self) -> SchedulerResult<Vec<HostRecord>> {
        Ok(self.store.list_hosts()?)
    }

    pub fn port_map(&self, host: &str) -> SchedulerResult<PortMap> {
        Ok(self.store.port_map(host)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_agent::testkit::FakeAgent;
    use berth_lock::lock_table;

    use crate::control::ControlPlane;
    use crate::error::SchedulerError;
    use crate::task::TaskLog;

    fn plane() -> ControlPlane {
        let store = StateStore::open_in_memory().unwrap();
        ControlPlane::open(store, Arc::new(FakeAgent::new())).unwrap()
    }

    #[test]
    fn register_rejects_bad_zone() {
        let plane = plane();
        assert!(plane.hosts.register("h1", "").is_err());
        assert!(plane.hosts.register("h1", "zone/a").is_err());
    }

    #[tokio::test]
    async fn unregister_unknown_host_is_not_found() {
        let plane = plane();
        let task = TaskLog::new("retire-1");
        let err = plane.hosts.unregister(&task, "h9").await.unwrap_err();
        assert!(matches!(err, SchedulerError::NotFound(_)));
        assert!(lock_table(plane.orchestrator.store()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_idle_host_drops_it() {
        let plane = plane();
        plane.hosts.register("h1", "zone-a").unwrap();
        let task = TaskLog::new("retire-2");

        let report = plane.hosts.unregister(&task, "h1").await.unwrap();

        assert!(report.is_clean());
        assert!(report.cleaned.is_empty());
        assert!(plane.hosts.list().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unregister_refuses_while_a_scope_is_locked() {
        let plane = plane();
        plane.hosts.register("h1", "zone-a").unwrap();
        let store = plane.orchestrator.store().clone();
        let mut held = ScopeLock::deploy(store, "deploy-7", "web", "abc", "prod").unwrap();
        held.lock().await.unwrap();

        let err = plane.hosts.unregister(&TaskLog::new("retire-3"), "h1").await.unwrap_err();

        assert!(err.is_lock_conflict());
        assert_eq!(plane.hosts.list().unwrap().len(), 1);
    }
}
