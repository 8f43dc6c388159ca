//! Executors: one per operation kind.
//!
//! An executor owns its request, can describe itself, checks authorization,
//! and runs under the scope lock for its request. The lock is owned by the
//! task id and released on every exit path.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{error, info};

use berth_lock::{LockGuard, ScopeLock};
use berth_state::{Instance, InstanceId, Manifest, Scope};

use crate::cleanup::CleanupReport;
use crate::error::{SchedulerError, SchedulerResult};
use crate::orchestrator::{MoveOutcome, Orchestrator, TeardownTarget};
use crate::task::TaskContext;

// ── Authorization ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Deploy,
    Teardown,
    Move,
    Copy,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Deploy => "deploy",
            Action::Teardown => "teardown",
            Action::Move => "move",
            Action::Copy => "copy",
        })
    }
}

/// Decides whether the caller may perform `action` on `scope`.
pub trait Authorizer: Send + Sync {
    fn authorize(&self, action: Action, scope: &Scope) -> SchedulerResult<()>;
}

pub struct AllowAll;

impl Authorizer for AllowAll {
    fn authorize(&self, _action: Action, _scope: &Scope) -> SchedulerResult<()> {
        Ok(())
    }
}

/// Allows only scopes naming one of `apps`; wildcard scopes are refused.
pub struct AppAllowList {
    apps: BTreeSet<String>,
}

impl AppAllowList {
    pub fn new<I, S>(apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            apps: apps.into_iter().map(Into::into).collect(),
        }
    }
}

impl Authorizer for AppAllowList {
    fn authorize(&self, action: Action, scope: &Scope) -> SchedulerResult<()> {
        match &scope.app {
            Some(app) if self.apps.contains(app) => Ok(()),
            _ => Err(SchedulerError::Unauthorized(format!("{action} on {scope}"))),
        }
    }
}

// ── Executor ──────────────────────────────────────────────────────

#[async_trait]
pub trait Executor: Send + Sync {
    type Request: Serialize + Send + Sync;
    type Reply: fmt::Display + Send;

    fn request(&self) -> &Self::Request;

    fn description(&self) -> String;

    fn authorize(&self, authorizer: &dyn Authorizer) -> SchedulerResult<()>;

    async fn execute(&self, ctx: &dyn TaskContext) -> SchedulerResult<Self::Reply>;
}

/// Authorize, then execute.
pub async fn run<E: Executor>(
    executor: &E,
    authorizer: &dyn Authorizer,
    ctx: &dyn TaskContext,
) -> SchedulerResult<E::Reply> {
    executor.authorize(authorizer)?;
    info!(task = ctx.id(), operation = %executor.description(), "executing");
    executor.execute(ctx).await
}

async fn release(guard: LockGuard) {
    if let Err(e) = guard.release().await {
        error!(error = %e, "failed to release scope lock");
    }
}

// ── Deploy ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployRequest {
    pub app: String,
    pub sha: String,
    pub env: String,
    pub manifest: Manifest,
    pub zones: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DeployReply {
    pub instances: Vec<Instance>,
}

impl fmt::Display for DeployReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "completed with {} instances", self.instances.len())?;
        for instance in &self.instances {
            write!(f, "\n  {} {}", instance.id, instance.endpoint())?;
        }
        Ok(())
    }
}

pub struct DeployExecutor {
    orchestrator: Arc<Orchestrator>,
    request: DeployRequest,
}

impl DeployExecutor {
    pub fn new(orchestrator: Arc<Orchestrator>, request: DeployRequest) -> Self {
        Self {
            orchestrator,
            request,
        }
    }
}

#[async_trait]
impl Executor for DeployExecutor {
    type Request = DeployRequest;
    type Reply = DeployReply;

    fn request(&self) -> &DeployRequest {
        &self.request
    }

    fn description(&self) -> String {
        let r = &self.request;
        format!("deploy {}/{} to {} in [{}]", r.app, r.sha, r.env, r.zones.join(", "))
    }

    fn authorize(&self, authorizer: &dyn Authorizer) -> SchedulerResult<()> {
        let r = &self.request;
        authorizer.authorize(Action::Deploy, &Scope::release(&r.app, &r.sha, &r.env))
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> SchedulerResult<DeployReply> {
        let r = &self.request;
        let store = self.orchestrator.store().clone();
        let guard = ScopeLock::deploy(store, ctx.id(), &r.app, &r.sha, &r.env)?
            .acquire()
            .await?;

        let result = self
            .orchestrator
            .deploy(ctx, &r.app, &r.sha, &r.env, &r.manifest, &r.zones)
            .await;
        release(guard).await;
        Ok(DeployReply { instances: result? })
    }
}

// ── Teardown ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum TeardownRequest {
    Container { id: InstanceId },
    Scope { scope: Scope },
    AllHosts,
}

impl TeardownRequest {
    pub fn target(&self) -> TeardownTarget {
        match self {
            TeardownRequest::Container { id } => TeardownTarget::Container(id.clone()),
            TeardownRequest::Scope { scope } => TeardownTarget::Scope(scope.clone()),
            TeardownRequest::AllHosts => TeardownTarget::AllHosts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TeardownReply {
    pub report: CleanupReport,
}

impl fmt::Display for TeardownReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "teardown {}", self.report)?;
        for failure in &self.report.failures {
            write!(f, "\n  {}: {} failed: {}", failure.instance, failure.step, failure.error)?;
        }
        Ok(())
    }
}

pub struct TeardownExecutor {
    orchestrator: Arc<Orchestrator>,
    request: TeardownRequest,
}

impl TeardownExecutor {
    pub fn new(orchestrator: Arc<Orchestrator>, request: TeardownRequest) -> Self {
        Self {
            orchestrator,
            request,
        }
    }
}

#[async_trait]
impl Executor for TeardownExecutor {
    type Request = TeardownRequest;
    type Reply = TeardownReply;

    fn request(&self) -> &TeardownRequest {
        &self.request
    }

    fn description(&self) -> String {
        format!("teardown {}", self.request.target())
    }

    fn authorize(&self, authorizer: &dyn Authorizer) -> SchedulerResult<()> {
        let scope = self.orchestrator.lock_scope(&self.request.target())?;
        authorizer.authorize(Action::Teardown, &scope)
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> SchedulerResult<TeardownReply> {
        let target = self.request.target();
        let scope = self.orchestrator.lock_scope(&target)?;
        let store = self.orchestrator.store().clone();
        let guard = ScopeLock::teardown(store, ctx.id(), &scope)?.acquire().await?;

        let result = self.orchestrator.teardown(ctx, &target).await;
        release(guard).await;
        Ok(TeardownReply { report: result? })
    }
}

// ── Move ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRequest {
    pub container_id: InstanceId,
}

impl fmt::Display for MoveOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "moved to {} {}\n  original: {}",
            self.instance.id,
            self.instance.endpoint(),
            self.cleanup
        )
    }
}

pub struct MoveExecutor {
    orchestrator: Arc<Orchestrator>,
    request: MoveRequest,
}

impl MoveExecutor {
    pub fn new(orchestrator: Arc<Orchestrator>, request: MoveRequest) -> Self {
        Self {
            orchestrator,
            request,
        }
    }
}

/// Deploy lock over the release `id` belongs to.
async fn lock_release_of(
    orchestrator: &Orchestrator,
    ctx: &dyn TaskContext,
    id: &str,
) -> SchedulerResult<LockGuard> {
    let source = orchestrator.instance(id)?;
    let guard = ScopeLock::deploy(orchestrator.store().clone(), ctx.id(), &source.app, &source.sha, &source.env)?
        .acquire()
        .await?;
    Ok(guard)
}

fn release_scope(orchestrator: &Orchestrator, id: &str) -> SchedulerResult<Scope> {
    let source = orchestrator.instance(id)?;
    Ok(Scope::release(&source.app, &source.sha, &source.env))
}

#[async_trait]
impl Executor for MoveExecutor {
    type Request = MoveRequest;
    type Reply = MoveOutcome;

    fn request(&self) -> &MoveRequest {
        &self.request
    }

    fn description(&self) -> String {
        format!("move {}", self.request.container_id)
    }

    fn authorize(&self, authorizer: &dyn Authorizer) -> SchedulerResult<()> {
        let scope = release_scope(&self.orchestrator, &self.request.container_id)?;
        authorizer.authorize(Action::Move, &scope)
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> SchedulerResult<MoveOutcome> {
        let id = &self.request.container_id;
        let guard = lock_release_of(&self.orchestrator, ctx, id).await?;
        let result = self.orchestrator.move_instance(ctx, id).await;
        release(guard).await;
        result
    }
}

// ── Copy ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopyRequest {
    pub container_id: InstanceId,
    pub instances: u32,
}

pub struct CopyExecutor {
    orchestrator: Arc<Orchestrator>,
    request: CopyRequest,
}

impl CopyExecutor {
    pub fn new(orchestrator: Arc<Orchestrator>, request: CopyRequest) -> Self {
        Self {
            orchestrator,
            request,
        }
    }
}

#[async_trait]
impl Executor for CopyExecutor {
    type Request = CopyRequest;
    type Reply = DeployReply;

    fn request(&self) -> &CopyRequest {
        &self.request
    }

    fn description(&self) -> String {
        format!("copy {} x{}", self.request.container_id, self.request.instances)
    }

    fn authorize(&self, authorizer: &dyn Authorizer) -> SchedulerResult<()> {
        let scope = release_scope(&self.orchestrator, &self.request.container_id)?;
        authorizer.authorize(Action::Copy, &scope)
    }

    async fn execute(&self, ctx: &dyn TaskContext) -> SchedulerResult<DeployReply> {
        let id = &self.request.container_id;
        let guard = lock_release_of(&self.orchestrator, ctx, id).await?;
        let result = self
            .orchestrator
            .copy_instance(ctx, id, self.request.instances)
            .await;
        release(guard).await;
        Ok(DeployReply { instances: result? })
    }
}
