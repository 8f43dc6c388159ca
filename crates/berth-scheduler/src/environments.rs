//! Environment registry.
//!
//! Definitions live in the store; every mutation of an existing environment
//! is refused while [`EnvUsage`] reports instances depending on it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::info;

use berth_state::{Environment, StateError, StateStore, paths};

use crate::env_usage::EnvUsage;
use crate::error::{SchedulerError, SchedulerResult};

#[derive(Clone)]
pub struct Environments {
    store: StateStore,
    usage: Arc<EnvUsage>,
}

impl Environments {
    pub fn new(store: StateStore, usage: Arc<EnvUsage>) -> Self {
        Self { store, usage }
    }

    pub fn create(&self, name: &str, parent: Option<&str>) -> SchedulerResult<Environment> {
        paths::validate_segment(name)?;
        if let Some(parent) = parent {
            self.get(parent)?;
        }
        let env = Environment {
            name: name.to_string(),
            parent: parent.map(str::to_string),
            dependencies: BTreeMap::new(),
        };
        self.store.create_environment(&env).map_err(|e| match e {
            StateError::AlreadyExists(_) => {
                SchedulerError::StateInconsistency(format!("environment {name} already exists"))
            }
            other => other.into(),
        })?;
        info!(env = name, parent, "environment created");
        Ok(env)
    }

    pub fn get(&self, name: &str) -> SchedulerResult<Environment> {
        self.store
            .get_environment(name)?
            .ok_or_else(|| SchedulerError::EnvironmentNotFound(name.to_string()))
    }

    pub fn list(&self) -> SchedulerResult<Vec<Environment>> {
        Ok(self.store.list_environments()?)
    }

    fn guard(&self, name: &str) -> SchedulerResult<()> {
        if self.usage.is_in_use(name) {
            return Err(SchedulerError::EnvironmentInUse(name.to_string()));
        }
        Ok(())
    }

    pub fn set_dependency(&self, name: &str, key: &str, value: &str) -> SchedulerResult<Environment> {
        self.guard(name)?;
        let mut env = self.get(name)?;
        env.dependencies.insert(key.to_string(), value.to_string());
        self.store.put_environment(&env)?;
        info!(env = name, key, "environment dependency set");
        Ok(env)
    }

    /// Re-parent `name`. Refuses cycles.
    pub fn set_parent(&self, name: &str, parent: Option<&str>) -> SchedulerResult<Environment> {
        self.guard(name)?;
        let mut env = self.get(name)?;
        if let Some(parent) = parent {
            if self.ancestry(parent)?.iter().any(|e| e.name == name) {
                return Err(SchedulerError::StateInconsistency(format!(
                    "{parent} descends from {name}"
                )));
            }
        }
        env.parent = parent.map(str::to_string);
        self.store.put_environment(&env)?;
        info!(env = name, parent, "environment re-parented");
        Ok(env)
    }

    pub fn delete(&self, name: &str) -> SchedulerResult<()> {
        self.guard(name)?;
        if !self.store.delete_environment(name)? {
            return Err(SchedulerError::EnvironmentNotFound(name.to_string()));
        }
        info!(env = name, "environment deleted");
        Ok(())
    }

    /// `name` followed by its parents, nearest first.
    pub fn ancestry(&self, name: &str) -> SchedulerResult<Vec<Environment>> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut next = Some(name.to_string());
        while let Some(current) = next {
            if !seen.insert(current.clone()) {
                return Err(SchedulerError::StateInconsistency(format!(
                    "environment cycle through {current}"
                )));
            }
            let env = self.get(&current)?;
            next = env.parent.clone();
            chain.push(env);
        }
        Ok(chain)
    }

    /// Dependencies visible in `name`; a child's value overrides its parent's.
    pub fn resolved_dependencies(&self, name: &str) -> SchedulerResult<BTreeMap<String, String>> {
        let mut resolved = BTreeMap::new();
        for env in self.ancestry(name)?.into_iter().rev() {
            resolved.extend(env.dependencies);
        }
        Ok(resolved)
    }
}
