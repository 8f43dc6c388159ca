//! StateStore: redb-backed coordination store.
//!
//! Exposes the key-path primitives the control plane is built on
//! (`get`, `set`, `delete`, `children`, prefix scans, and a path-scoped
//! mutex for read-modify-write sequences), plus typed accessors for the
//! instance, host, manifest, and environment documents. Values are JSON.
//! Both on-disk and in-memory backends are supported (the latter for tests).

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::paths;
use crate::tables::NODES;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

type MutexMap = HashMap<String, Arc<tokio::sync::Mutex<()>>>;

/// Thread-safe coordination store backed by redb.
///
/// Cloning is cheap; clones share the database and the mutex registry.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    mutexes: Arc<Mutex<MutexMap>>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db);
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> Self {
        Self {
            db: Arc::new(db),
            mutexes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Key-path primitives ────────────────────────────────────────

    /// Read the raw document at `path`.
    pub fn get(&self, path: &str) -> StateResult<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        Ok(table
            .get(path)
            .map_err(map_err!(Read))?
            .map(|guard| guard.value().to_vec()))
    }

    /// Write the raw document at `path`, replacing any previous value.
    pub fn set(&self, path: &str, value: &[u8]) -> StateResult<()> {
        self.set_many(&[(path.to_string(), value.to_vec())])
    }

    /// Write several documents in one transaction.
    pub fn set_many(&self, entries: &[(String, Vec<u8>)]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for (path, value) in entries {
                table
                    .insert(path.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Delete the document at `path`. Returns true if it existed.
    pub fn delete(&self, path: &str) -> StateResult<bool> {
        Ok(self.delete_many(&[path.to_string()])? > 0)
    }

    /// Delete several documents in one transaction. Returns number deleted.
    pub fn delete_many(&self, keys: &[String]) -> StateResult<u32> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut count = 0;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            for key in keys {
                if table.remove(key.as_str()).map_err(map_err!(Write))?.is_some() {
                    count += 1;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(count)
    }

    /// Delete `path` and every document below it. Returns number deleted.
    pub fn delete_recursive(&self, path: &str) -> StateResult<u32> {
        let prefix = paths::subtree_prefix(path);
        let mut keys: Vec<String> = self
            .scan_prefix(&prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.push(path.to_string());
        let count = self.delete_many(&keys)?;
        debug!(%path, count, "subtree deleted");
        Ok(count)
    }

    /// All `(path, value)` pairs whose path starts with `prefix`, in key order.
    pub fn scan_prefix(&self, prefix: &str) -> StateResult<Vec<(String, Vec<u8>)>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            results.push((key.to_string(), value.value().to_vec()));
        }
        Ok(results)
    }

    /// Names of the direct children of `path`, sorted.
    pub fn children(&self, path: &str) -> StateResult<Vec<String>> {
        let prefix = paths::subtree_prefix(path);
        let names: BTreeSet<String> = self
            .scan_prefix(&prefix)?
            .into_iter()
            .filter_map(|(key, _)| {
                key[prefix.len()..]
                    .split('/')
                    .next()
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
            })
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Read and decode the JSON document at `path`.
    pub fn get_json<T: DeserializeOwned>(&self, path: &str) -> StateResult<Option<T>> {
        match self.get(path)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(map_err!(Deserialize)),
            None => Ok(None),
        }
    }

    /// Encode `value` as JSON and write it at `path`.
    pub fn put_json<T: Serialize>(&self, path: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        self.set(path, &bytes)
    }

    /// Run `f` while holding the mutex named by `path`.
    ///
    /// All clones of this store share the same mutex per path, so a
    /// read-modify-write performed inside `f` cannot interleave with another
    /// one on the same path.
    pub async fn with_mutex<T, E>(
        &self,
        path: &str,
        f: impl FnOnce(&StateStore) -> Result<T, E>,
    ) -> Result<T, E> {
        let mutex = {
            let mut mutexes = self.mutexes.lock().unwrap_or_else(PoisonError::into_inner);
            mutexes.entry(path.to_string()).or_default().clone()
        };
        let _guard = mutex.lock().await;
        f(self)
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Record a new instance id. Fails if the id is already taken.
    pub fn reserve_instance(&self, instance: &Instance) -> StateResult<()> {
        let id_path = paths::instance_id(&instance.id);
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            if table.get(id_path.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(instance.id.clone()));
            }
            let scoped = instance_path(instance);
            table
                .insert(scoped.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            table
                .insert(id_path.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(id = %instance.id, host = %instance.host, "instance reserved");
        Ok(())
    }

    /// Insert or update an instance under both of its paths.
    pub fn put_instance(&self, instance: &Instance) -> StateResult<()> {
        let value = serde_json::to_vec(instance).map_err(map_err!(Serialize))?;
        self.set_many(&[
            (instance_path(instance), value.clone()),
            (paths::instance_id(&instance.id), value),
        ])
    }

    /// Look an instance up by id.
    pub fn get_instance(&self, id: &str) -> StateResult<Option<Instance>> {
        self.get_json(&paths::instance_id(id))
    }

    /// Delete an instance from both of its paths. Returns true if it existed.
    pub fn delete_instance(&self, instance: &Instance) -> StateResult<bool> {
        let deleted =
            self.delete_many(&[instance_path(instance), paths::instance_id(&instance.id)])?;
        debug!(id = %instance.id, deleted, "instance deleted");
        Ok(deleted > 0)
    }

    /// List every instance inside `scope`.
    pub fn list_instances(&self, scope: &Scope) -> StateResult<Vec<Instance>> {
        let prefix = paths::subtree_prefix(&paths::join(paths::INSTANCES, &scope.segments()));
        self.scan_prefix(&prefix)?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(map_err!(Deserialize)))
            .collect()
    }

    // ── Hosts ──────────────────────────────────────────────────────

    /// Register (or re-zone) a worker host.
    pub fn register_host(&self, name: &str, zone: &str) -> StateResult<()> {
        paths::validate_segment(name)?;
        let record = HostRecord {
            name: name.to_string(),
            zone: Some(zone.to_string()),
        };
        self.put_json(&paths::host(name), &record)?;
        debug!(host = name, zone, "host registered");
        Ok(())
    }

    /// Create a zone-less host record if none exists yet.
    pub fn touch_host(&self, name: &str) -> StateResult<()> {
        if self.get_host(name)?.is_none() {
            let record = HostRecord {
                name: name.to_string(),
                zone: None,
            };
            self.put_json(&paths::host(name), &record)?;
        }
        Ok(())
    }

    pub fn get_host(&self, name: &str) -> StateResult<Option<HostRecord>> {
        self.get_json(&paths::host(name))
    }

    /// All host records, sorted by name.
    pub fn list_hosts(&self) -> StateResult<Vec<HostRecord>> {
        let mut hosts = Vec::new();
        for name in self.children(paths::HOSTS)? {
            if let Some(record) = self.get_host(&name)? {
                hosts.push(record);
            }
        }
        Ok(hosts)
    }

    /// Remove a host and all of its container relations.
    pub fn unregister_host(&self, name: &str) -> StateResult<u32> {
        let deleted = self.delete_recursive(&paths::host(name))?;
        debug!(host = name, deleted, "host unregistered");
        Ok(deleted)
    }

    /// Record that container `id` listens on `port` on `host`.
    pub fn add_container(&self, host: &str, id: &str, port: u16) -> StateResult<()> {
        self.touch_host(host)?;
        self.put_json(&paths::host_container(host, id), &port)
    }

    pub fn remove_container(&self, host: &str, id: &str) -> StateResult<bool> {
        self.delete(&paths::host_container(host, id))
    }

    /// Container → port map of a registered host.
    pub fn port_map(&self, host: &str) -> StateResult<PortMap> {
        if self.get_host(host)?.is_none() {
            return Err(StateError::NotFound(format!("host {host}")));
        }
        let prefix = paths::subtree_prefix(&paths::host_containers(host));
        let mut map = PortMap::new();
        for (key, value) in self.scan_prefix(&prefix)? {
            let port: u16 = serde_json::from_slice(&value).map_err(map_err!(Deserialize))?;
            map.insert(key[prefix.len()..].to_string(), port);
        }
        Ok(map)
    }

    // ── Manifests ──────────────────────────────────────────────────

    pub fn put_manifest(&self, app: &str, sha: &str, manifest: &Manifest) -> StateResult<()> {
        self.put_json(&paths::manifest(app, sha), manifest)
    }

    pub fn get_manifest(&self, app: &str, sha: &str) -> StateResult<Option<Manifest>> {
        self.get_json(&paths::manifest(app, sha))
    }

    // ── Environments ───────────────────────────────────────────────

    /// Insert a new environment. Fails if the name is taken.
    pub fn create_environment(&self, env: &Environment) -> StateResult<()> {
        paths::validate_segment(&env.name)?;
        if self.get_environment(&env.name)?.is_some() {
            return Err(StateError::AlreadyExists(format!("environment {}", env.name)));
        }
        self.put_environment(env)
    }

    pub fn put_environment(&self, env: &Environment) -> StateResult<()> {
        self.put_json(&paths::environment(&env.name), env)
    }

    pub fn get_environment(&self, name: &str) -> StateResult<Option<Environment>> {
        self.get_json(&paths::environment(name))
    }

    pub fn list_environments(&self) -> StateResult<Vec<Environment>> {
        let mut envs = Vec::new();
        for name in self.children(paths::ENVIRONMENTS)? {
            if let Some(env) = self.get_environment(&name)? {
                envs.push(env);
            }
        }
        Ok(envs)
    }

    pub fn delete_environment(&self, name: &str) -> StateResult<bool> {
        self.delete(&paths::environment(name))
    }
}

fn instance_path(instance: &Instance) -> String {
    paths::instance(&instance.app, &instance.sha, &instance.env, &instance.id)
}
