//! Live host selection.
//!
//! `CapacityScheduler::choose_hosts` re-reads the host inventory and probes
//! every eligible host on each call; nothing is cached between calls, so
//! concurrent placements each observe the capacity left by the other.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use berth_agent::HostAgent;
use berth_state::{InstanceId, Scope, StateStore};

use crate::error::PlacementResult;
use crate::request::PlacementRequest;
use crate::weight::{HostSnapshot, rank, weigh};
use crate::zones::{HostSelection, check, partition};

#[derive(Clone)]
pub struct CapacityScheduler {
    store: StateStore,
    agent: Arc<dyn HostAgent>,
}

impl CapacityScheduler {
    pub fn new(store: StateStore, agent: Arc<dyn HostAgent>) -> Self {
        Self { store, agent }
    }

    /// Rank the fleet for `req` and return per-zone host lists that can
    /// hold `req.instances` in every requested zone, or fail on the first
    /// zone that cannot.
    pub async fn choose_hosts(&self, req: &PlacementRequest) -> PlacementResult<HostSelection> {
        let release: BTreeSet<InstanceId> = self
            .store
            .list_instances(&Scope::release(&req.app, &req.sha, &req.env))?
            .into_iter()
            .map(|instance| instance.id)
            .collect();

        let mut probes = JoinSet::new();
        for record in self.store.list_hosts()? {
            if req.exclude.contains(&record.name) {
                debug!(host = %record.name, "host excluded");
                continue;
            }
            let port_map = match self.store.port_map(&record.name) {
                Ok(map) => map,
                Err(e) => {
                    warn!(host = %record.name, error = %e, "no port map, skipping host");
                    continue;
                }
            };
            let existing = port_map.keys().filter(|id| release.contains(*id)).count() as u32;

            let agent = Arc::clone(&self.agent);
            let host = record.name;
            probes.spawn(async move {
                let health = agent.health_check(&host).await;
                (host, existing, health)
            });
        }

        let mut candidates = Vec::new();
        while let Some(joined) = probes.join_next().await {
            let (host, existing, health) = match joined {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(error = %e, "health probe task failed");
                    continue;
                }
            };
            let health = match health {
                Ok(health) => health,
                Err(e) => {
                    warn!(%host, error = %e, "host unreachable, skipping");
                    continue;
                }
            };
            let snapshot = HostSnapshot {
                host,
                existing,
                health,
            };
            match weigh(&snapshot, req) {
                Ok(weight) => {
                    debug!(host = %weight.host, zone = %weight.zone, free = weight.free, weight = weight.weight, "host weighed");
                    candidates.push(weight);
                }
                Err(reason) => debug!(host = %snapshot.host, ?reason, "host rejected"),
            }
        }

        let selection = check(req, partition(rank(candidates)))?;
        info!(
            app = %req.app,
            sha = %req.sha,
            env = %req.env,
            instances = req.instances,
            zones = selection.zones.len(),
            "hosts chosen"
        );
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_agent::testkit::{FakeAgent, healthy};
    use berth_state::Instance;

    use crate::error::PlacementError;

    fn request(instances: u32, zones: &[&str]) -> PlacementRequest {
        PlacementRequest {
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            instances,
            cpu_shares: 10,
            memory_mb: 100,
            zones: zones.iter().map(|z| z.to_string()).collect(),
            exclude: Default::default(),
        }
    }

    fn fleet(hosts: &[(&str, &str, u64)]) -> (StateStore, Arc<FakeAgent>) {
        let store = StateStore::open_in_memory().unwrap();
        let agent = Arc::new(FakeAgent::new());
        for (host, zone, slots) in hosts {
            store.register_host(host, zone).unwrap();
            agent.add_host(host, healthy(zone, *slots, 10_000, 1_000));
        }
        (store, agent)
    }

    fn scheduler(store: &StateStore, agent: &Arc<FakeAgent>) -> CapacityScheduler {
        CapacityScheduler::new(store.clone(), agent.clone())
    }

    #[tokio::test]
    async fn same_snapshot_same_order() {
        let (store, agent) = fleet(&[
            ("h4", "zone-a", 4),
            ("h2", "zone-a", 4),
            ("h3", "zone-b", 4),
            ("h1", "zone-a", 4),
        ]);
        let chooser = scheduler(&store, &agent);
        let req = request(2, &["zone-a", "zone-b"]);

        let first = chooser.choose_hosts(&req).await.unwrap();
        for _ in 0..5 {
            assert_eq!(chooser.choose_hosts(&req).await.unwrap(), first);
        }
        assert_eq!(first.zones[0].host_names(), vec!["h1", "h2", "h4"]);
        assert_eq!(first.zones[1].host_names(), vec!["h3"]);
    }

    #[tokio::test]
    async fn shortfall_names_zone() {
        let (store, agent) = fleet(&[("h1", "zone-a", 1), ("h2", "zone-a", 1), ("h3", "zone-a", 1)]);

        let err = scheduler(&store, &agent)
            .choose_hosts(&request(5, &["zone-a"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PlacementError::InsufficientCapacity { ref zone, requested: 5, available: 3, .. } if zone == "zone-a"
        ));
    }

    #[tokio::test]
    async fn unreachable_and_excluded_hosts_are_skipped() {
        let (store, agent) = fleet(&[("h1", "zone-a", 2), ("h2", "zone-a", 2), ("h3", "zone-a", 2)]);
        agent.make_unreachable("h2");

        let selection = scheduler(&store, &agent)
            .choose_hosts(&request(1, &["zone-a"]).excluding("h1"))
            .await
            .unwrap();
        assert_eq!(selection.zones[0].host_names(), vec!["h3"]);
        assert_eq!(selection.zones[0].free, 2);
    }

    #[tokio::test]
    async fn hosts_already_running_the_release_sort_last() {
        let (store, agent) = fleet(&[("h1", "zone-a", 4), ("h2", "zone-a", 4)]);
        let existing = Instance {
            id: "web-abc-prod-00000001".to_string(),
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            host: "h1".to_string(),
            port: 61000,
            internal: false,
        };
        store.put_instance(&existing).unwrap();
        store.add_container("h1", &existing.id, existing.port).unwrap();
        // Another release on h2 does not count towards density.
        store.add_container("h2", "api-abc-prod-00000002", 61001).unwrap();

        let selection = scheduler(&store, &agent)
            .choose_hosts(&request(1, &["zone-a"]))
            .await
            .unwrap();
        assert_eq!(selection.zones[0].host_names(), vec!["h2", "h1"]);
    }

    #[tokio::test]
    async fn zone_with_no_reachable_host_fails() {
        let (store, agent) = fleet(&[("h1", "zone-a", 2), ("h2", "zone-b", 2)]);
        agent.make_unreachable("h2");

        let err = scheduler(&store, &agent)
            .choose_hosts(&request(1, &["zone-a", "zone-b"]))
            .await
            .unwrap_err();
        assert_eq!(err.zone(), Some("zone-b"));
    }
}
