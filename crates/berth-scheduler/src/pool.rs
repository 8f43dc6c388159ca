//! Routing pool membership.
//!
//! The router layer reads live backends per app/sha/env. The orchestrator
//! only adds and removes endpoints; how the router applies them is not its
//! concern.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use berth_state::{Instance, InstanceId, StateStore, paths};

use crate::error::{SchedulerError, SchedulerResult};

#[async_trait]
pub trait RoutingPool: Send + Sync {
    async fn add_endpoints(&self, instances: &[Instance]) -> SchedulerResult<()>;
    async fn remove_endpoints(&self, instances: &[Instance]) -> SchedulerResult<()>;
}

/// Pool membership stored at `/pools/{app}/{sha}/{env}/{id}` → `host:port`.
#[derive(Clone)]
pub struct StorePool {
    store: StateStore,
}

fn member_path(instance: &Instance) -> String {
    paths::join(&paths::pool(&instance.app, &instance.sha, &instance.env), &[&instance.id])
}

impl StorePool {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Current members of one pool: instance id → endpoint.
    pub fn members(&self, app: &str, sha: &str, env: &str) -> SchedulerResult<BTreeMap<InstanceId, String>> {
        let prefix = paths::subtree_prefix(&paths::pool(app, sha, env));
        let mut members = BTreeMap::new();
        for (key, value) in self.store.scan_prefix(&prefix)? {
            let endpoint: String = serde_json::from_slice(&value)
                .map_err(|e| SchedulerError::PoolUpdate(format!("{key}: {e}")))?;
            members.insert(key[prefix.len()..].to_string(), endpoint);
        }
        Ok(members)
    }
}

#[async_trait]
impl RoutingPool for StorePool {
    async fn add_endpoints(&self, instances: &[Instance]) -> SchedulerResult<()> {
        let mut entries = Vec::with_capacity(instances.len());
        for instance in instances {
            if instance.port == 0 {
                return Err(SchedulerError::PoolUpdate(format!(
                    "{} has no port yet",
                    instance.id
                )));
            }
            let endpoint = serde_json::to_vec(&instance.endpoint())
                .map_err(|e| SchedulerError::PoolUpdate(e.to_string()))?;
            entries.push((member_path(instance), endpoint));
        }
        self.store.set_many(&entries)?;
        debug!(count = instances.len(), "pool endpoints added");
        Ok(())
    }

    async fn remove_endpoints(&self, instances: &[Instance]) -> SchedulerResult<()> {
        let keys: Vec<String> = instances.iter().map(member_path).collect();
        let removed = self.store.delete_many(&keys)?;
        debug!(requested = keys.len(), removed, "pool endpoints removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(id: &str, port: u16) -> Instance {
        Instance {
            id: id.to_string(),
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            host: "h1".to_string(),
            port,
            internal: false,
        }
    }

    #[tokio::test]
    async fn add_and_remove_members() {
        let pool = StorePool::new(StateStore::open_in_memory().unwrap());
        pool.add_endpoints(&[instance("w1", 61000), instance("w2", 61001)])
            .await
            .unwrap();

        let members = pool.members("web", "abc", "prod").unwrap();
        assert_eq!(members.get("w2").map(String::as_str), Some("h1:61001"));
        assert!(pool.members("web", "abc", "staging").unwrap().is_empty());

        pool.remove_endpoints(&[instance("w1", 61000)]).await.unwrap();
        let remaining: Vec<String> = pool.members("web", "abc", "prod").unwrap().into_keys().collect();
        assert_eq!(remaining, vec!["w2"]);
    }

    #[tokio::test]
    async fn unported_instance_is_rejected_without_writes() {
        let pool = StorePool::new(StateStore::open_in_memory().unwrap());
        let err = pool
            .add_endpoints(&[instance("w1", 61000), instance("w2", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::PoolUpdate(_)));
        assert!(pool.members("web", "abc", "prod").unwrap().is_empty());
    }
}
