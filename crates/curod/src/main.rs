//! curod — the Curo daemon.
//!
//! Single binary that assembles the health-policy subsystems:
//! - State store (redb node registry + recovery audit log)
//! - Detector (strategy chosen by the attached policy)
//! - Recovery orchestrator (HTTP action runner against node agents)
//! - Policy engine (verdict → recovery wiring, cooldowns)
//! - Lifecycle event intake (LIFECYCLE_EVENTS policies only)
//!
//! # Usage
//!
//! ```text
//! curod run --policy health.yaml --cluster web --data-dir /var/lib/curo
//! curod validate --policy health.yaml
//! curod node add --cluster web --id n1 --address 10.0.0.11:7700
//! ```

mod agent;
mod events_api;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;

use curo_detect::HttpStatusProbe;
use curo_engine::{EngineConfig, PolicyEngine};
use curo_policy::{DetectionType, HealthPolicy};
use curo_recover::RecoveryOrchestrator;
use curo_state::{HealthState, NodeRecord, NodeStatus, StateStore};

use crate::agent::HttpActionRunner;

#[derive(Parser)]
#[command(name = "curod", about = "Curo health policy daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a health policy against a cluster.
    Run {
        /// Path to the policy YAML document.
        #[arg(long)]
        policy: PathBuf,

        /// Cluster to attach the policy to.
        #[arg(long)]
        cluster: String,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/curo")]
        data_dir: PathBuf,

        /// Path probed on each node agent.
        #[arg(long, default_value = "/healthz")]
        probe_path: String,

        /// Probe timeout in seconds.
        #[arg(long, default_value = "2")]
        probe_timeout: u64,

        /// Action request timeout in seconds.
        #[arg(long, default_value = "30")]
        action_timeout: u64,

        /// Consecutive unhealthy probes before recovery kicks in.
        #[arg(long, default_value = "3")]
        unhealthy_threshold: u32,

        /// Per-node recovery cooldown in seconds (0 disables).
        #[arg(long, default_value = "0")]
        cooldown: u64,

        /// Listen port for lifecycle event intake (LIFECYCLE_EVENTS only).
        #[arg(long, default_value = "7171")]
        events_port: u16,
    },

    /// Validate a policy document and exit.
    Validate {
        /// Path to the policy YAML document.
        #[arg(long)]
        policy: PathBuf,
    },

    /// Manage the node registry.
    Node {
        #[command(subcommand)]
        command: NodeCommand,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/curo")]
        data_dir: PathBuf,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// Register a node.
    Add {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        id: String,
        /// Node agent address (ip:port).
        #[arg(long)]
        address: String,
    },
    /// Remove a node from the registry.
    Remove {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        id: String,
    },
    /// List registered nodes in a cluster.
    List {
        #[arg(long)]
        cluster: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,curod=debug,curo=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            policy,
            cluster,
            data_dir,
            probe_path,
            probe_timeout,
            action_timeout,
            unhealthy_threshold,
            cooldown,
            events_port,
        } => {
            run(RunArgs {
                policy,
                cluster,
                data_dir,
                probe_path,
                probe_timeout,
                action_timeout,
                unhealthy_threshold,
                cooldown,
                events_port,
            })
            .await
        }
        Command::Validate { policy } => validate(&policy),
        Command::Node { command, data_dir } => node_command(command, &data_dir),
    }
}

struct RunArgs {
    policy: PathBuf,
    cluster: String,
    data_dir: PathBuf,
    probe_path: String,
    probe_timeout: u64,
    action_timeout: u64,
    unhealthy_threshold: u32,
    cooldown: u64,
    events_port: u16,
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let policy = HealthPolicy::load(&args.policy)
        .with_context(|| format!("invalid policy document {}", args.policy.display()))?;
    info!(
        policy_type = %policy.type_name,
        version = %policy.version,
        strategy = %policy.detection.strategy,
        actions = policy.recovery.actions.len(),
        "policy loaded"
    );

    if policy.detection.strategy == DetectionType::LbStatusPolling {
        bail!("LB_STATUS_POLLING requires a load-balancer integration; none is configured");
    }

    std::fs::create_dir_all(&args.data_dir)?;
    let db_path = args.data_dir.join("curo.redb");
    let state = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let runner = Arc::new(HttpActionRunner::new(Duration::from_secs(args.action_timeout)));
    let orchestrator = Arc::new(RecoveryOrchestrator::new(state.clone(), runner));

    // A previous process may have died mid-recovery; detection skips
    // recovering nodes, so stale records must be reset before attach.
    orchestrator.reconcile_cluster(&args.cluster).await?;

    let config = EngineConfig {
        unhealthy_threshold: args.unhealthy_threshold,
        recovery_cooldown: Duration::from_secs(args.cooldown),
        ..EngineConfig::default()
    };
    let probe = HttpStatusProbe::new(args.probe_path, Duration::from_secs(args.probe_timeout));
    let engine = PolicyEngine::new(policy, state, orchestrator, config)
        .with_probe(Arc::new(probe));

    engine.attach(&args.cluster).await?;

    // Event intake, only for event-driven policies.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    if let Some(events_tx) = engine.event_sender(&args.cluster).await {
        let listener =
            tokio::net::TcpListener::bind(("0.0.0.0", args.events_port)).await?;
        tokio::spawn(async move {
            if let Err(e) = events_api::serve_events(listener, events_tx, shutdown_rx).await {
                tracing::error!(error = %e, "event intake failed");
            }
        });
    }

    info!(cluster = %args.cluster, "curod running, ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    let _ = shutdown_tx.send(true);
    engine.shutdown().await;
    Ok(())
}

fn validate(path: &PathBuf) -> anyhow::Result<()> {
    let policy = HealthPolicy::load(path)
        .with_context(|| format!("invalid policy document {}", path.display()))?;
    println!(
        "{} v{}: detection={} interval={}s actions={}",
        policy.type_name,
        policy.version,
        policy.detection.strategy,
        policy.detection.options.interval,
        policy
            .recovery
            .action_names()
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(",")
    );
    Ok(())
}

fn node_command(command: NodeCommand, data_dir: &PathBuf) -> anyhow::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let state = StateStore::open(&data_dir.join("curo.redb"))?;

    match command {
        NodeCommand::Add {
            cluster,
            id,
            address,
        } => {
            if !valid_id(&cluster) || !valid_id(&id) {
                bail!("cluster and node ids must be non-empty and must not contain `:`");
            }
            let now = epoch_secs();
            let node = NodeRecord {
                id: id.clone(),
                cluster_id: cluster.clone(),
                address,
                status: NodeStatus::Active,
                health: HealthState::Unknown,
                recovery_count: 0,
                last_checked_at: 0,
                updated_at: now,
            };
            state.put_node(&node)?;
            println!("node {cluster}:{id} registered");
        }
        NodeCommand::Remove { cluster, id } => {
            if state.delete_node(&cluster, &id)? {
                println!("node {cluster}:{id} removed");
            } else {
                bail!("node {cluster}:{id} is not registered");
            }
        }
        NodeCommand::List { cluster } => {
            for node in state.list_nodes_for_cluster(&cluster)? {
                println!(
                    "{}\t{}\t{:?}\t{:?}\trecoveries={}",
                    node.id, node.address, node.status, node.health, node.recovery_count
                );
            }
        }
    }
    Ok(())
}

/// Ids become components of composite store keys; `:` is the separator.
fn valid_id(s: &str) -> bool {
    !s.is_empty() && !s.contains(':')
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_run_command() {
        let cli = Cli::try_parse_from([
            "curod",
            "run",
            "--policy",
            "health.yaml",
            "--cluster",
            "web",
            "--cooldown",
            "600",
        ])
        .unwrap();

        match cli.command {
            Command::Run {
                cluster, cooldown, ..
            } => {
                assert_eq!(cluster, "web");
                assert_eq!(cooldown, 600);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn ids_with_separator_rejected() {
        assert!(valid_id("web"));
        assert!(valid_id("n1"));
        assert!(!valid_id("web:east"));
        assert!(!valid_id(""));
    }

    #[test]
    fn cli_parses_node_add() {
        let cli = Cli::try_parse_from([
            "curod", "node", "add", "--cluster", "web", "--id", "n1", "--address",
            "10.0.0.11:7700",
        ])
        .unwrap();

        match cli.command {
            Command::Node {
                command: NodeCommand::Add { cluster, id, .. },
                ..
            } => {
                assert_eq!(cluster, "web");
                assert_eq!(id, "n1");
            }
            _ => panic!("expected node add command"),
        }
    }
}
