//! Placement orchestrator: turns a host selection into running instances.
//!
//! Every placement is all-or-nothing across its zones: if any zone runs out
//! of failure budget, or the routing pool refuses the new endpoints, every
//! instance created by the operation is rolled back.
//!
//! # Retry
//!
//! Inside a zone, hosts are tried round-robin in selection order. Each
//! attempt (success or failure) advances the cursor; the zone gives up after
//! as many failures as it has hosts.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::slice;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use berth_agent::{DeployCall, HostAgent};
use berth_placement::{CapacityScheduler, PlacementRequest, ZonePlan};
use berth_state::{Instance, InstanceId, Manifest, Scope, StateError, StateStore, paths};

use crate::cleanup::{CleanupReport, CleanupStep};
use crate::env_usage::EnvUsage;
use crate::error::{SchedulerError, SchedulerResult};
use crate::pool::RoutingPool;
use crate::task::TaskContext;

/// `{app}-{sha}-{env}-{8 hex}`.
pub fn new_instance_id(app: &str, sha: &str, env: &str) -> InstanceId {
    format!("{app}-{sha}-{env}-{:08x}", rand::random::<u32>())
}

/// What a teardown removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownTarget {
    Container(InstanceId),
    Scope(Scope),
    /// Every container on every registered host, recorded or not.
    AllHosts,
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownTarget::Container(id) => write!(f, "container {id}"),
            TeardownTarget::Scope(scope) => write!(f, "scope {scope}"),
            TeardownTarget::AllHosts => f.write_str("all hosts"),
        }
    }
}

/// Result of moving one instance.
#[derive(Debug, Clone)]
pub struct MoveOutcome {
    pub instance: Instance,
    /// Cleanup of the original instance.
    pub cleanup: CleanupReport,
}

pub struct Orchestrator {
    store: StateStore,
    agent: Arc<dyn HostAgent>,
    chooser: CapacityScheduler,
    pool: Arc<dyn RoutingPool>,
    usage: Arc<EnvUsage>,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        agent: Arc<dyn HostAgent>,
        pool: Arc<dyn RoutingPool>,
        usage: Arc<EnvUsage>,
    ) -> Self {
        let chooser = CapacityScheduler::new(store.clone(), Arc::clone(&agent));
        Self {
            store,
            agent,
            chooser,
            pool,
            usage,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn usage(&self) -> &Arc<EnvUsage> {
        &self.usage
    }

    // ── Deploy ─────────────────────────────────────────────────────

    /// Deploy `manifest.instances` instances of app/sha into env, in every
    /// zone of `zones`. The caller holds the deploy lock.
    pub async fn deploy(
        &self,
        ctx: &dyn TaskContext,
        app: &str,
        sha: &str,
        env: &str,
        manifest: &Manifest,
        zones: &[String],
    ) -> SchedulerResult<Vec<Instance>> {
        for segment in [app, sha, env] {
            paths::validate_segment(segment)?;
        }
        require_instances(manifest.instances)?;
        if self.store.get_environment(env)?.is_none() {
            return Err(SchedulerError::EnvironmentNotFound(env.to_string()));
        }
        ctx.log_status(&format!(
            "deploying {app}/{sha} to {env}: {} instances in each of {} zones",
            manifest.instances,
            zones.len()
        ));
        self.store.put_manifest(app, sha, manifest)?;

        let req = PlacementRequest::for_manifest(app, sha, env, manifest, zones.to_vec());
        self.place(ctx, &req, manifest).await
    }

    /// Choose hosts for `req` and create its instances, or leave nothing behind.
    pub async fn place(
        &self,
        ctx: &dyn TaskContext,
        req: &PlacementRequest,
        manifest: &Manifest,
    ) -> SchedulerResult<Vec<Instance>> {
        require_instances(req.instances)?;
        ctx.log_status("choosing hosts");
        let selection = self.chooser.choose_hosts(req).await?;

        let mut deployed = Vec::new();
        for plan in &selection.zones {
            let placed = self.fill_zone(ctx, req, manifest, plan, &mut deployed).await;
            if placed < req.instances {
                ctx.log_status(&format!(
                    "zone {}: only {placed} of {} deployed, rolling back",
                    plan.zone, req.instances
                ));
                let report = self.rollback(ctx, &deployed).await;
                warn!(app = %req.app, zone = %plan.zone, placed, requested = req.instances, %report, "placement failed");
                return Err(SchedulerError::PlacementFailed {
                    zone: plan.zone.clone(),
                    deployed: placed,
                    requested: req.instances,
                });
            }
        }

        if let Err(e) = self.pool.add_endpoints(&deployed).await {
            ctx.log_status(&format!("routing pool update failed, rolling back: {e}"));
            let report = self.rollback(ctx, &deployed).await;
            warn!(app = %req.app, error = %e, %report, "pool update failed");
            return Err(match e {
                SchedulerError::PoolUpdate(_) => e,
                other => SchedulerError::PoolUpdate(other.to_string()),
            });
        }

        ctx.log_status(&format!("completed with {} instances", deployed.len()));
        info!(app = %req.app, sha = %req.sha, env = %req.env, instances = deployed.len(), "placement complete");
        Ok(deployed)
    }

    /// Deploy up to `req.instances` into one zone. Returns how many landed.
    async fn fill_zone(
        &self,
        ctx: &dyn TaskContext,
        req: &PlacementRequest,
        manifest: &Manifest,
        plan: &ZonePlan,
        deployed: &mut Vec<Instance>,
    ) -> u32 {
        let hosts = plan.host_names();
        if hosts.is_empty() {
            return 0;
        }
        let max_failures = hosts.len();
        let mut failures = 0;
        let mut cursor = 0;
        let mut placed = 0;

        while placed < req.instances && failures < max_failures {
            let host = hosts[cursor];
            cursor = (cursor + 1) % hosts.len();

            match self.deploy_one(req, manifest, host).await {
                Ok(instance) => {
                    placed += 1;
                    ctx.log_status(&format!(
                        "zone {}: {} running on {} ({placed}/{})",
                        plan.zone,
                        instance.id,
                        instance.endpoint(),
                        req.instances
                    ));
                    deployed.push(instance);
                }
                Err(e) => {
                    failures += 1;
                    warn!(%host, zone = %plan.zone, failures, max_failures, error = %e, "deploy attempt failed");
                    ctx.log_status(&format!("zone {}: deploy on {host} failed: {e}", plan.zone));
                }
            }
        }
        placed
    }

    /// Reserve an id on `host`, start the container, and record it.
    async fn deploy_one(
        &self,
        req: &PlacementRequest,
        manifest: &Manifest,
        host: &str,
    ) -> SchedulerResult<Instance> {
        let mut instance = Instance {
            id: new_instance_id(&req.app, &req.sha, &req.env),
            app: req.app.clone(),
            sha: req.sha.clone(),
            env: req.env.clone(),
            host: host.to_string(),
            port: 0,
            internal: manifest.internal,
        };
        self.store.reserve_instance(&instance).map_err(|e| match e {
            StateError::AlreadyExists(id) => {
                SchedulerError::StateInconsistency(format!("instance id {id} already taken"))
            }
            other => other.into(),
        })?;

        let call = DeployCall {
            app: req.app.clone(),
            sha: req.sha.clone(),
            env: req.env.clone(),
            container_id: instance.id.clone(),
            manifest: manifest.clone(),
        };
        let port = match self.agent.deploy(host, &call).await {
            Ok(resp) if resp.status.is_ok() => resp.port,
            Ok(_) => {
                self.release_reservation(&instance);
                return Err(SchedulerError::RemoteStatus {
                    host: host.to_string(),
                    operation: "deploy",
                });
            }
            Err(e) => {
                self.release_reservation(&instance);
                return Err(e.into());
            }
        };

        instance.port = port;
        let recorded = if port == 0 {
            Err(SchedulerError::StateInconsistency(format!(
                "{host} started {} without a port",
                instance.id
            )))
        } else {
            self.record(&instance)
        };
        if let Err(e) = recorded {
            // The container is running but unusable; take it back down.
            let mut report = CleanupReport::default();
            self.remote_teardown(&instance, &mut report).await;
            self.release_reservation(&instance);
            if let Err(e) = self.store.remove_container(host, &instance.id) {
                error!(id = %instance.id, %host, error = %e, "failed to remove host relation");
            }
            return Err(e);
        }

        debug!(id = %instance.id, %host, port, "instance deployed");
        Ok(instance)
    }

    fn record(&self, instance: &Instance) -> SchedulerResult<()> {
        self.store.put_instance(instance)?;
        self.store
            .add_container(&instance.host, &instance.id, instance.port)?;
        self.usage.add(&instance.app, &instance.sha, &instance.env);
        Ok(())
    }

    fn release_reservation(&self, instance: &Instance) {
        if let Err(e) = self.store.delete_instance(instance) {
            error!(id = %instance.id, error = %e, "failed to release reserved instance id");
        }
    }

    // ── Cleanup ────────────────────────────────────────────────────

    /// Undo instances created by a failed placement. They were never added
    /// to the routing pool.
    pub async fn rollback(&self, ctx: &dyn TaskContext, instances: &[Instance]) -> CleanupReport {
        let report = self.cleanup_instances(instances, false).await;
        ctx.log_status(&format!("rollback: {report}"));
        report
    }

    /// Tear down live instances and drop them from the routing pool.
    pub async fn cleanup(&self, ctx: &dyn TaskContext, instances: &[Instance]) -> CleanupReport {
        let report = self.cleanup_instances(instances, true).await;
        ctx.log_status(&format!("cleanup: {report}"));
        report
    }

    async fn cleanup_instances(&self, instances: &[Instance], from_pool: bool) -> CleanupReport {
        let mut report = CleanupReport::default();
        for instance in instances {
            self.remote_teardown(instance, &mut report).await;
            self.forget(instance, from_pool, &mut report).await;
        }
        report
    }

    async fn remote_teardown(&self, instance: &Instance, report: &mut CleanupReport) {
        let failure = match self
            .agent
            .teardown(&instance.host, slice::from_ref(&instance.id), false)
            .await
        {
            Ok(resp) if resp.status.is_ok() => return,
            Ok(_) => format!("host {} rejected teardown", instance.host),
            Err(e) => e.to_string(),
        };
        note(report, instance, CleanupStep::RemoteTeardown, failure);
    }

    /// Drop every local trace of `instance`. Each step runs regardless of
    /// the others.
    async fn forget(&self, instance: &Instance, from_pool: bool, report: &mut CleanupReport) {
        match self.store.delete_instance(instance) {
            Ok(_) => report.cleaned.push(instance.id.clone()),
            Err(e) => note(report, instance, CleanupStep::DeleteRecord, e),
        }
        self.usage.remove(&instance.app, &instance.sha, &instance.env);
        if let Err(e) = self.store.remove_container(&instance.host, &instance.id) {
            note(report, instance, CleanupStep::RemoveHostRelation, e);
        }
        if from_pool {
            if let Err(e) = self.pool.remove_endpoints(slice::from_ref(instance)).await {
                note(report, instance, CleanupStep::RemoveFromPool, e);
            }
        }
    }

    // ── Teardown ───────────────────────────────────────────────────

    /// Scope whose teardown lock covers `target`.
    pub fn lock_scope(&self, target: &TeardownTarget) -> SchedulerResult<Scope> {
        match target {
            TeardownTarget::Container(id) => {
                let instance = self.instance(id)?;
                Ok(Scope::release(&instance.app, &instance.sha, &instance.env))
            }
            TeardownTarget::Scope(scope) => Ok(scope.clone()),
            TeardownTarget::AllHosts => Ok(Scope::all()),
        }
    }

    /// Remove everything `target` names: one bulk call per host, then
    /// cleanup for each container the host confirms. The caller holds the
    /// teardown lock.
    pub async fn teardown(
        &self,
        ctx: &dyn TaskContext,
        target: &TeardownTarget,
    ) -> SchedulerResult<CleanupReport> {
        let (by_host, all) = self.resolve(target)?;
        ctx.log_status(&format!("tearing down {target} on {} hosts", by_host.len()));

        let mut report = CleanupReport::default();
        for (host, instances) in &by_host {
            let ids: Vec<InstanceId> = instances.iter().map(|i| i.id.clone()).collect();
            let removed_ids = match self.agent.teardown(host, &ids, all).await {
                Ok(resp) if resp.status.is_ok() => resp.container_ids,
                outcome => {
                    let failure = match outcome {
                        Err(e) => e.to_string(),
                        Ok(_) => format!("host {host} rejected teardown"),
                    };
                    for instance in instances {
                        note(&mut report, instance, CleanupStep::RemoteTeardown, &failure);
                    }
                    ctx.log_status(&format!("{host}: teardown failed: {failure}"));
                    continue;
                }
            };

            let removed: BTreeSet<&str> = removed_ids.iter().map(String::as_str).collect();
            for instance in instances {
                if removed.contains(instance.id.as_str()) {
                    self.forget(instance, true, &mut report).await;
                } else {
                    note(&mut report, instance, CleanupStep::RemoteTeardown, "not reported as removed");
                }
            }
            if all {
                let known: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
                for id in removed.difference(&known) {
                    if let Err(e) = self.store.remove_container(host, id) {
                        warn!(%host, %id, error = %e, "failed to drop untracked container");
                    }
                }
            }
            ctx.log_status(&format!("{host}: removed {} containers", removed.len()));
        }

        info!(%target, cleaned = report.cleaned.len(), failures = report.failures.len(), "teardown finished");
        Ok(report)
    }

    /// Host → instances to tear down, and whether hosts should drop everything.
    fn resolve(&self, target: &TeardownTarget) -> SchedulerResult<(BTreeMap<String, Vec<Instance>>, bool)> {
        match target {
            TeardownTarget::Container(id) => {
                let instance = self.instance(id)?;
                Ok((BTreeMap::from([(instance.host.clone(), vec![instance])]), false))
            }
            TeardownTarget::Scope(scope) => Ok((by_host(self.store.list_instances(scope)?), false)),
            TeardownTarget::AllHosts => {
                let mut hosts = by_host(self.store.list_instances(&Scope::all())?);
                for record in self.store.list_hosts()? {
                    hosts.entry(record.name).or_default();
                }
                Ok((hosts, true))
            }
        }
    }

    // ── Host retirement ────────────────────────────────────────────

    /// Clean up every instance recorded on `host`, then forget the host and
    /// its container relations. Remote teardown is best effort, so a dead
    /// host can still be retired. The caller holds the wildcard teardown lock.
    pub async fn retire_host(&self, ctx: &dyn TaskContext, host: &str) -> SchedulerResult<CleanupReport> {
        if self.store.get_host(host)?.is_none() {
            return Err(SchedulerError::NotFound(format!("host {host}")));
        }
        let instances: Vec<Instance> = self
            .store
            .list_instances(&Scope::all())?
            .into_iter()
            .filter(|instance| instance.host == host)
            .collect();
        ctx.log_status(&format!("retiring {host} with {} instances", instances.len()));

        let report = self.cleanup(ctx, &instances).await;
        let relations = self.store.unregister_host(host)?;
        info!(%host, cleaned = report.cleaned.len(), failures = report.failures.len(), relations, "host retired");
        Ok(report)
    }

    // ── Move / Copy ────────────────────────────────────────────────

    /// Re-place one instance elsewhere in its zone, then remove the original.
    pub async fn move_instance(&self, ctx: &dyn TaskContext, id: &str) -> SchedulerResult<MoveOutcome> {
        let source = self.instance(id)?;
        let manifest = self.manifest_for(&source)?;
        let zone = self.zone_of(&source.host).await?;
        ctx.log_status(&format!("moving {id} off {} within {zone}", source.host));

        let req = PlacementRequest::for_manifest(&source.app, &source.sha, &source.env, &manifest, vec![zone])
            .with_instances(1)
            .excluding(source.host.clone());
        let mut placed = self.place(ctx, &req, &manifest).await?;
        let instance = placed
            .pop()
            .ok_or_else(|| SchedulerError::StateInconsistency(format!("move of {id} placed nothing")))?;

        let cleanup = self.cleanup(ctx, slice::from_ref(&source)).await;
        info!(from = %source.id, to = %instance.id, host = %instance.host, "instance moved");
        Ok(MoveOutcome { instance, cleanup })
    }

    /// Place `instances` more copies of an instance's release in its zone.
    pub async fn copy_instance(
        &self,
        ctx: &dyn TaskContext,
        id: &str,
        instances: u32,
    ) -> SchedulerResult<Vec<Instance>> {
        require_instances(instances)?;
        let source = self.instance(id)?;
        let manifest = self.manifest_for(&source)?;
        let zone = self.zone_of(&source.host).await?;
        ctx.log_status(&format!("copying {id} {instances} times within {zone}"));

        let req = PlacementRequest::for_manifest(&source.app, &source.sha, &source.env, &manifest, vec![zone])
            .with_instances(instances);
        self.place(ctx, &req, &manifest).await
    }

    // ── Lookups ────────────────────────────────────────────────────

    pub fn instance(&self, id: &str) -> SchedulerResult<Instance> {
        self.store
            .get_instance(id)?
            .ok_or_else(|| SchedulerError::NotFound(format!("instance {id}")))
    }

    fn manifest_for(&self, instance: &Instance) -> SchedulerResult<Manifest> {
        self.store
            .get_manifest(&instance.app, &instance.sha)?
            .ok_or_else(|| SchedulerError::NotFound(format!("manifest for {}/{}", instance.app, instance.sha)))
    }

    /// Zone the agent on `host` reports, which is what placement groups by.
    /// The registered zone stands in only while the agent is unreachable.
    async fn zone_of(&self, host: &str) -> SchedulerResult<String> {
        let err = match self.agent.health_check(host).await {
            Ok(health) => return Ok(health.zone),
            Err(e) => e,
        };
        match self.store.get_host(host)?.and_then(|record| record.zone) {
            Some(zone) => {
                warn!(%host, %zone, error = %err, "agent unreachable, using registered zone");
                Ok(zone)
            }
            None => Err(err.into()),
        }
    }
}

fn by_host(instances: Vec<Instance>) -> BTreeMap<String, Vec<Instance>> {
    let mut hosts: BTreeMap<String, Vec<Instance>> = BTreeMap::new();
    for instance in instances {
        hosts.entry(instance.host.clone()).or_default().push(instance);
    }
    hosts
}

fn require_instances(instances: u32) -> SchedulerResult<()> {
    if instances == 0 {
        return Err(SchedulerError::InvalidRequest(
            "instance count must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn note(report: &mut CleanupReport, instance: &Instance, step: CleanupStep, error: impl fmt::Display) {
    warn!(id = %instance.id, host = %instance.host, %step, error = %error, "cleanup step failed");
    report.fail(&instance.id, step, error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_prefixed_and_random() {
        let a = new_instance_id("web", "abc", "prod");
        let b = new_instance_id("web", "abc", "prod");
        assert!(a.starts_with("web-abc-prod-"));
        assert_eq!(a.len(), "web-abc-prod-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn group_by_host_keeps_host_order() {
        let make = |id: &str, host: &str| Instance {
            id: id.to_string(),
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            host: host.to_string(),
            port: 61000,
            internal: false,
        };
        let grouped = by_host(vec![make("w1", "h2"), make("w2", "h1"), make("w3", "h2")]);
        let hosts: Vec<&str> = grouped.keys().map(String::as_str).collect();
        assert_eq!(hosts, vec!["h1", "h2"]);
        assert_eq!(grouped["h2"].len(), 2);
    }
}
