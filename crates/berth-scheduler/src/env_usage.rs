//! Environment usage guard.
//!
//! Counts live instances per `env → (app, sha)`. An environment with any
//! non-zero count cannot be deleted or have its definition changed. The
//! counts are process-local: rebuilt from persisted instances at start and
//! kept current by every instance create/delete.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, warn};

use berth_state::{Scope, StateResult, StateStore};

type Counts = BTreeMap<String, BTreeMap<(String, String), u32>>;

#[derive(Debug, Default)]
pub struct EnvUsage {
    counts: RwLock<Counts>,
}

impl EnvUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from every instance persisted in `store`.
    pub fn rebuild(store: &StateStore) -> StateResult<Self> {
        let usage = Self::new();
        let instances = store.list_instances(&Scope::all())?;
        for instance in &instances {
            usage.add(&instance.app, &instance.sha, &instance.env);
        }
        debug!(instances = instances.len(), "environment usage rebuilt");
        Ok(usage)
    }

    pub fn add(&self, app: &str, sha: &str, env: &str) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        *counts
            .entry(env.to_string())
            .or_default()
            .entry((app.to_string(), sha.to_string()))
            .or_insert(0) += 1;
    }

    /// Decrement; entries that reach zero are dropped.
    pub fn remove(&self, app: &str, sha: &str, env: &str) {
        let mut counts = self.counts.write().unwrap_or_else(PoisonError::into_inner);
        let Some(apps) = counts.get_mut(env) else {
            warn!(app, sha, env, "usage decrement for unused environment");
            return;
        };
        let key = (app.to_string(), sha.to_string());
        match apps.get_mut(&key) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                apps.remove(&key);
            }
            None => warn!(app, sha, env, "usage decrement for unknown release"),
        }
        if apps.is_empty() {
            counts.remove(env);
        }
    }

    pub fn is_in_use(&self, env: &str) -> bool {
        let counts = self.counts.read().unwrap_or_else(PoisonError::into_inner);
        counts.get(env).is_some_and(|apps| !apps.is_empty())
    }

    /// `(app, sha, count)` entries for `env`.
    pub fn usage(&self, env: &str) -> Vec<(String, String, u32)> {
        let counts = self.counts.read().unwrap_or_else(PoisonError::into_inner);
        counts
            .get(env)
            .map(|apps| {
                apps.iter()
                    .map(|((app, sha), count)| (app.clone(), sha.clone(), *count))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use berth_state::Instance;

    #[test]
    fn counts_drop_out_at_zero() {
        let usage = EnvUsage::new();
        usage.add("app", "sha", "env1");
        usage.add("app", "sha", "env1");
        assert!(usage.is_in_use("env1"));
        assert!(!usage.is_in_use("env2"));

        usage.remove("app", "sha", "env1");
        assert_eq!(usage.usage("env1"), vec![("app".to_string(), "sha".to_string(), 1)]);

        usage.remove("app", "sha", "env1");
        assert!(!usage.is_in_use("env1"));
        assert!(usage.usage("env1").is_empty());
    }

    #[test]
    fn removing_unknown_entry_is_harmless() {
        let usage = EnvUsage::new();
        usage.add("app", "sha", "env1");
        usage.remove("other", "sha", "env1");
        usage.remove("app", "sha", "env9");
        assert!(usage.is_in_use("env1"));
    }

    #[test]
    fn rebuild_counts_persisted_instances() {
        let store = StateStore::open_in_memory().unwrap();
        for (id, env) in [("a-1", "prod"), ("a-2", "prod"), ("a-3", "staging")] {
            store
                .put_instance(&Instance {
                    id: id.to_string(),
                    app: "a".to_string(),
                    sha: "s".to_string(),
                    env: env.to_string(),
                    host: "h1".to_string(),
                    port: 61000,
                    internal: false,
                })
                .unwrap();
        }

        let usage = EnvUsage::rebuild(&store).unwrap();
        assert_eq!(usage.usage("prod"), vec![("a".to_string(), "s".to_string(), 2)]);
        assert!(usage.is_in_use("staging"));
    }
}
