//! Scope lock: serializes deploy/teardown work on overlapping scopes.
//!
//! All held locks live in one lock-table document (`lock path → owner`).
//! Every change to it is a full read-modify-write performed under the
//! store mutex, so two requesters can never both see "free".

use std::collections::BTreeMap;

use tracing::{debug, error, info, warn};

use berth_state::{Scope, StateStore, paths};

use crate::error::{LockError, LockResult};
use crate::path::LockPath;

/// Lock path → owner id.
pub type LockTable = BTreeMap<String, String>;

/// Which operation the lock protects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Always leaf level: `/app/sha/env`.
    Deploy,
    /// Any level, down to the wildcard `/`.
    Teardown,
}

/// Read the current lock table.
pub fn lock_table(store: &StateStore) -> LockResult<LockTable> {
    Ok(store.get_json(paths::LOCK_TABLE)?.unwrap_or_default())
}

fn save_table(store: &StateStore, table: &LockTable) -> LockResult<()> {
    store.put_json(paths::LOCK_TABLE, table)?;
    Ok(())
}

/// A lock over one scope, owned by one operation.
pub struct ScopeLock {
    store: StateStore,
    kind: LockKind,
    path: LockPath,
    owner: String,
    held: bool,
}

impl ScopeLock {
    /// Lock for deploying `app`/`sha` into `env`.
    pub fn deploy(
        store: StateStore,
        owner: impl Into<String>,
        app: &str,
        sha: &str,
        env: &str,
    ) -> LockResult<Self> {
        Self::new(store, LockKind::Deploy, owner.into(), &[app, sha, env])
    }

    /// Lock for tearing down everything inside `scope`.
    pub fn teardown(store: StateStore, owner: impl Into<String>, scope: &Scope) -> LockResult<Self> {
        Self::new(store, LockKind::Teardown, owner.into(), &scope.segments())
    }

    fn new(store: StateStore, kind: LockKind, owner: String, segments: &[&str]) -> LockResult<Self> {
        for segment in segments {
            paths::validate_segment(segment)
                .map_err(|_| LockError::InvalidScope(format!("{segment:?}")))?;
        }
        if owner.is_empty() {
            return Err(LockError::InvalidScope("empty owner".to_string()));
        }
        Ok(Self {
            store,
            kind,
            path: LockPath::new(segments),
            owner,
            held: false,
        })
    }

    pub fn path(&self) -> &LockPath {
        &self.path
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn kind(&self) -> LockKind {
        self.kind
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Whether the held entry at `held` blocks this lock.
    ///
    /// Overlap is checked in both directions regardless of kind, so no two
    /// entries in the table are ever in a prefix relation. The wildcard `/`
    /// is a prefix of every path.
    fn blocked_by(&self, held: &LockPath) -> bool {
        self.path.overlaps(held)
    }

    /// Register this lock in the table, or fail naming the conflicting owner.
    pub async fn lock(&mut self) -> LockResult<()> {
        if self.held {
            return Ok(());
        }
        let requested = self.path.to_string();
        self.store
            .with_mutex(paths::LOCK_MUTEX, |store| {
                let mut table = lock_table(store)?;

                for (held, owner) in &table {
                    if owner.is_empty() {
                        continue;
                    }
                    if self.blocked_by(&LockPath::parse(held)) {
                        return Err(LockError::Conflict {
                            requested: requested.clone(),
                            held: held.clone(),
                            owner: owner.clone(),
                        });
                    }
                }

                table.insert(requested.clone(), self.owner.clone());
                save_table(store, &table)
            })
            .await
            .inspect_err(|e| debug!(path = %requested, error = %e, "scope lock refused"))?;

        self.held = true;
        info!(path = %requested, owner = %self.owner, kind = ?self.kind, "scope lock acquired");
        Ok(())
    }

    /// Remove this lock from the table. No-op unless currently held.
    pub async fn unlock(&mut self) -> LockResult<()> {
        if !self.held {
            return Ok(());
        }
        let path = self.path.to_string();
        self.store
            .with_mutex(paths::LOCK_MUTEX, |store| {
                let mut table = lock_table(store)?;
                if table.get(&path) == Some(&self.owner) {
                    table.remove(&path);
                    save_table(store, &table)
                } else {
                    warn!(%path, owner = %self.owner, "lock entry missing or reassigned");
                    Ok(())
                }
            })
            .await?;

        self.held = false;
        info!(%path, owner = %self.owner, "scope lock released");
        Ok(())
    }

    /// Lock and wrap in a guard that releases on every exit path.
    pub async fn acquire(mut self) -> LockResult<LockGuard> {
        self.lock().await?;
        Ok(LockGuard { lock: Some(self) })
    }
}

/// A held scope lock.
///
/// Call [`LockGuard::release`] when the work is done. A guard dropped while
/// still held (early return, panic) schedules the unlock on the current
/// tokio runtime.
pub struct LockGuard {
    lock: Option<ScopeLock>,
}

impl LockGuard {
    pub fn path(&self) -> Option<&LockPath> {
        self.lock.as_ref().map(ScopeLock::path)
    }

    pub async fn release(mut self) -> LockResult<()> {
        match self.lock.take() {
            Some(mut lock) => lock.unlock().await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(mut lock) = self.lock.take() else {
            return;
        };
        if !lock.is_held() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(path = %lock.path, owner = %lock.owner, "scope lock dropped while held, releasing");
                handle.spawn(async move {
                    if let Err(e) = lock.unlock().await {
                        error!(path = %lock.path, error = %e, "deferred unlock failed");
                    }
                });
            }
            Err(_) => {
                error!(path = %lock.path, owner = %lock.owner, "scope lock dropped outside a runtime; entry left in table");
            }
        }
    }
}
