//! berthd: the Berth control-plane binary.
//!
//! Opens the coordination store and drives the orchestrator for one
//! command at a time:
//! - Host inventory and environment definitions
//! - Deploy / teardown / move / copy through their executors
//! - Inspection of instances and held scope locks
//!
//! # Usage
//!
//! ```text
//! berthd --config /etc/berth/berth.toml hosts register worker-1 --zone zone-a
//! berthd env create prod
//! berthd deploy web 3f2a9c1 prod --manifest web.toml --zone zone-a --zone zone-b
//! berthd teardown scope web/3f2a9c1
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use berth_agent::HttpAgent;
use berth_scheduler::{
    AllowAll, ControlPlane, CopyExecutor, CopyRequest, DeployExecutor, DeployRequest, Executor,
    MoveExecutor, MoveRequest, TaskContext, TaskLog, TeardownExecutor, TeardownRequest, run,
};
use berth_state::{Manifest, Scope, StateStore};

use crate::config::BerthConfig;

#[derive(Parser)]
#[command(name = "berthd", about = "Berth control plane")]
struct Cli {
    /// Path to berth.toml.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Overrides `data_dir` from the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Worker host inventory.
    Hosts {
        #[command(subcommand)]
        command: HostsCommand,
    },
    /// Environment definitions.
    Env {
        #[command(subcommand)]
        command: EnvCommand,
    },
    /// Show held scope locks.
    Locks,
    /// List instances, optionally narrowed to app[/sha[/env]].
    Status { scope: Option<String> },
    /// Deploy app/sha into env in every zone.
    Deploy {
        app: String,
        sha: String,
        env: String,
        /// Manifest file (.toml or .json).
        #[arg(long)]
        manifest: PathBuf,
        /// Zone to deploy into; repeatable. Defaults to `[placement] zones`.
        #[arg(long = "zone")]
        zones: Vec<String>,
    },
    /// Remove instances.
    Teardown {
        #[command(subcommand)]
        target: TeardownCommand,
    },
    /// Re-place an instance on another host in its zone.
    Move { container_id: String },
    /// Add instances of an instance's release in its zone.
    Copy {
        container_id: String,
        #[arg(long, default_value = "1")]
        instances: u32,
    },
}

#[derive(Subcommand)]
enum HostsCommand {
    Register {
        name: String,
        #[arg(long)]
        zone: String,
    },
    Unregister { name: String },
    List,
}

#[derive(Subcommand)]
enum EnvCommand {
    Create {
        name: String,
        #[arg(long)]
        parent: Option<String>,
    },
    List,
    Delete { name: String },
    /// Set one dependency value on an environment.
    SetDep { name: String, key: String, value: String },
}

#[derive(Subcommand)]
enum TeardownCommand {
    /// One instance.
    Container { id: String },
    /// Everything under app[/sha[/env]].
    Scope { scope: String },
    /// Every container on every registered host.
    All,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,berth=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = BerthConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("create data dir {}", config.data_dir.display()))?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    debug!(path = ?db_path, "state store opened");

    let agent = Arc::new(HttpAgent::new(config.agent.port, config.agent_timeout()?));
    let plane = ControlPlane::open(store.clone(), agent)?;

    match cli.command {
        Command::Hosts { command } => hosts(&plane, command).await,
        Command::Env { command } => environments(&plane, command),
        Command::Locks => {
            for (path, owner) in berth_lock::lock_table(&store)? {
                println!("{path}\t{owner}");
            }
            Ok(())
        }
        Command::Status { scope } => {
            let scope = scope.as_deref().map(parse_scope).transpose()?.unwrap_or_default();
            for instance in store.list_instances(&scope)? {
                println!(
                    "{}\t{}/{}/{}\t{}",
                    instance.id,
                    instance.app,
                    instance.sha,
                    instance.env,
                    instance.endpoint()
                );
            }
            Ok(())
        }
        Command::Deploy {
            app,
            sha,
            env,
            manifest,
            zones,
        } => {
            let zones = if zones.is_empty() {
                config.placement.zones.clone()
            } else {
                zones
            };
            if zones.is_empty() {
                bail!("no zones given and none configured under [placement]");
            }
            let request = DeployRequest {
                manifest: read_manifest(&manifest)?,
                app,
                sha,
                env,
                zones,
            };
            execute(DeployExecutor::new(plane.orchestrator.clone(), request), "deploy").await
        }
        Command::Teardown { target } => {
            let request = match target {
                TeardownCommand::Container { id } => TeardownRequest::Container { id },
                TeardownCommand::Scope { scope } => TeardownRequest::Scope {
                    scope: parse_scope(&scope)?,
                },
                TeardownCommand::All => TeardownRequest::AllHosts,
            };
            execute(TeardownExecutor::new(plane.orchestrator.clone(), request), "teardown").await
        }
        Command::Move { container_id } => {
            let request = MoveRequest { container_id };
            execute(MoveExecutor::new(plane.orchestrator.clone(), request), "move").await
        }
        Command::Copy {
            container_id,
            instances,
        } => {
            let request = CopyRequest {
                container_id,
                instances,
            };
            execute(CopyExecutor::new(plane.orchestrator.clone(), request), "copy").await
        }
    }
}

/// Run one executor under a fresh task and print its reply.
async fn execute<E: Executor>(executor: E, kind: &str) -> anyhow::Result<()> {
    let task = TaskLog::generate(kind);
    info!(
        task = task.id(),
        request = %serde_json::to_string(executor.request())?,
        "submitting"
    );
    let reply = run(&executor, &AllowAll, &task).await?;
    println!("{reply}");
    Ok(())
}

async fn hosts(plane: &ControlPlane, command: HostsCommand) -> anyhow::Result<()> {
    match command {
        HostsCommand::Register { name, zone } => plane.hosts.register(&name, &zone)?,
        HostsCommand::Unregister { name } => {
            let task = TaskLog::generate("unregister");
            let report = plane.hosts.unregister(&task, &name).await?;
            println!("{name} unregistered: {report}");
        }
        HostsCommand::List => {
            for host in plane.hosts.list()? {
                let containers = plane.hosts.port_map(&host.name)?.len();
                println!(
                    "{}\t{}\t{containers} containers",
                    host.name,
                    host.zone.as_deref().unwrap_or("-")
                );
            }
        }
    }
    Ok(())
}

fn environments(plane: &ControlPlane, command: EnvCommand) -> anyhow::Result<()> {
    match command {
        EnvCommand::Create { name, parent } => {
            plane.environments.create(&name, parent.as_deref())?;
        }
        EnvCommand::List => {
            for env in plane.environments.list()? {
                let in_use = plane.orchestrator.usage().is_in_use(&env.name);
                println!(
                    "{}\tparent={}\tin_use={in_use}",
                    env.name,
                    env.parent.as_deref().unwrap_or("-")
                );
            }
        }
        EnvCommand::Delete { name } => plane.environments.delete(&name)?,
        EnvCommand::SetDep { name, key, value } => {
            plane.environments.set_dependency(&name, &key, &value)?;
        }
    }
    Ok(())
}

/// `app`, `app/sha` or `app/sha/env`; `/` alone is every scope.
fn parse_scope(s: &str) -> anyhow::Result<Scope> {
    let parts: Vec<&str> = s.trim_matches('/').split('/').filter(|p| !p.is_empty()).collect();
    Ok(match parts.as_slice() {
        [] => Scope::all(),
        [app] => Scope::app(app),
        [app, sha] => Scope::app_sha(app, sha),
        [app, sha, env] => Scope::release(app, sha, env),
        _ => bail!("scope {s:?} has more than three segments"),
    })
}

fn read_manifest(path: &Path) -> anyhow::Result<Manifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("read manifest {}", path.display()))?;
    let manifest = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&content)?,
        _ => toml::from_str(&content)?,
    };
    Ok(manifest)
}
