//! RecoveryOrchestrator — ordered action execution with per-node
//! mutual exclusion.
//!
//! One background task per recovering node. The task walks the policy's
//! action list in order, retrying individual actions on `Retry` with
//! exponential backoff, and records every action tried in the recovery
//! audit log. Cancellation (policy detach, cluster delete) is graceful:
//! the task observes a watch signal, records the abandoned action as
//! `Cancelled`, and hands the node back as `Active`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use curo_policy::ActionName;
use curo_state::{
    ClusterId, HealthState, NodeId, NodeRecord, NodeStatus, RecoveryOutcome, RecoveryRecord,
    StateStore,
};

use crate::error::RecoverResult;
use crate::runner::{ActionOutcome, ActionRunner};

/// Retry and timeout knobs for action execution.
///
/// The policy document does not carry these; they are engine-level
/// configuration.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts per action before it counts as failed (`Retry` outcomes
    /// only; `Error` and `Timeout` fail the action immediately).
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub base_backoff: Duration,
    /// Backoff cap.
    pub max_backoff: Duration,
    /// Wall-clock limit per execution attempt.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-node recovery task state.
struct RecoverySlot {
    cluster_id: ClusterId,
    handle: JoinHandle<()>,
    cancel_tx: watch::Sender<bool>,
}

/// Executes recovery sequences, one in flight per node at most.
pub struct RecoveryOrchestrator {
    state: StateStore,
    runner: Arc<dyn ActionRunner>,
    retry: RetryPolicy,
    /// In-flight recoveries: node_id → slot.
    in_flight: Arc<RwLock<HashMap<NodeId, RecoverySlot>>>,
}

impl RecoveryOrchestrator {
    /// Create a new orchestrator.
    pub fn new(state: StateStore, runner: Arc<dyn ActionRunner>) -> Self {
        Self {
            state,
            runner,
            retry: RetryPolicy::default(),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Override the default retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Start recovering a node. Returns false (and does nothing) if a
    /// recovery for this node is already in flight.
    pub async fn recover(&self, node: NodeRecord, actions: Vec<ActionName>) -> bool {
        let mut in_flight = self.in_flight.write().await;
        if in_flight.contains_key(&node.id) {
            debug!(node_id = %node.id, "recovery already in flight, verdict dropped");
            return false;
        }

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let node_id = node.id.clone();
        let cluster_id = node.cluster_id.clone();

        let state = self.state.clone();
        let runner = self.runner.clone();
        let retry = self.retry.clone();
        let slots = self.in_flight.clone();
        let task_node_id = node_id.clone();

        let handle = tokio::spawn(async move {
            run_recovery(state, runner, retry, node, actions, cancel_rx).await;
            let mut slots = slots.write().await;
            slots.remove(&task_node_id);
        });

        in_flight.insert(
            node_id,
            RecoverySlot {
                cluster_id,
                handle,
                cancel_tx,
            },
        );
        true
    }

    /// Whether a recovery is in flight for the given node.
    pub async fn is_recovering(&self, node_id: &str) -> bool {
        let in_flight = self.in_flight.read().await;
        in_flight.contains_key(node_id)
    }

    /// Number of in-flight recoveries.
    pub async fn active_count(&self) -> usize {
        let in_flight = self.in_flight.read().await;
        in_flight.len()
    }

    /// Cancel all in-flight recoveries (engine shutdown).
    pub async fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut in_flight = self.in_flight.write().await;
            in_flight.drain().collect()
        };
        for (node_id, slot) in drained {
            cancel_slot(&node_id, slot).await;
        }
        info!("all recoveries cancelled");
    }

    /// Reset nodes a previous process left in `Recovering`. Detection
    /// skips recovering nodes, so a stale record would never be probed
    /// or recovered again. Returns the number of nodes reset.
    pub async fn reconcile_cluster(&self, cluster_id: &str) -> RecoverResult<usize> {
        let in_flight = self.in_flight.read().await;
        let mut reset = 0;
        for node in self.state.list_nodes_for_cluster(cluster_id)? {
            if node.status == NodeStatus::Recovering && !in_flight.contains_key(&node.id) {
                warn!(node_id = %node.id, "resetting stale recovering node");
                restore_node(
                    &self.state,
                    node,
                    NodeStatus::Active,
                    HealthState::Unknown,
                    false,
                );
                reset += 1;
            }
        }
        if reset > 0 {
            info!(%cluster_id, reset, "stale recoveries reconciled");
        }
        Ok(reset)
    }

    /// Cancel in-flight recoveries for one cluster (policy detach).
    pub async fn cancel_for_cluster(&self, cluster_id: &str) {
        let drained: Vec<_> = {
            let mut in_flight = self.in_flight.write().await;
            let node_ids: Vec<NodeId> = in_flight
                .iter()
                .filter(|(_, slot)| slot.cluster_id == cluster_id)
                .map(|(id, _)| id.clone())
                .collect();
            node_ids
                .into_iter()
                .filter_map(|id| in_flight.remove(&id).map(|slot| (id, slot)))
                .collect()
        };
        for (node_id, slot) in drained {
            cancel_slot(&node_id, slot).await;
        }
    }
}

/// Signal a recovery task to stop and wait briefly for its cleanup.
async fn cancel_slot(node_id: &str, slot: RecoverySlot) {
    let _ = slot.cancel_tx.send(true);
    let abort = slot.handle.abort_handle();
    if tokio::time::timeout(Duration::from_secs(5), slot.handle)
        .await
        .is_err()
    {
        warn!(%node_id, "recovery task did not stop in time, aborting");
        abort.abort();
    }
    info!(%node_id, "recovery cancelled");
}

/// The recovery sequence for a single node.
async fn run_recovery(
    state: StateStore,
    runner: Arc<dyn ActionRunner>,
    retry: RetryPolicy,
    mut node: NodeRecord,
    actions: Vec<ActionName>,
    mut cancel: watch::Receiver<bool>,
) {
    info!(
        node_id = %node.id,
        cluster_id = %node.cluster_id,
        actions = actions.len(),
        "recovery starting"
    );

    node.status = NodeStatus::Recovering;
    node.updated_at = epoch_secs();
    if let Err(e) = state.put_node(&node) {
        error!(node_id = %node.id, error = %e, "failed to mark node recovering");
    }

    let mut recovered = false;
    for action in actions {
        let started_at = epoch_secs();

        let (outcome, attempts) = tokio::select! {
            result = run_action(runner.as_ref(), &retry, &node, action) => result,
            _ = cancel.changed() => {
                record_action(&state, &node, action, RecoveryOutcome::Cancelled, 0, started_at);
                restore_node(&state, node.clone(), NodeStatus::Active, HealthState::Unknown, false);
                return;
            }
        };

        let succeeded = outcome == ActionOutcome::Ok;
        record_action(
            &state,
            &node,
            action,
            if succeeded {
                RecoveryOutcome::Succeeded
            } else {
                RecoveryOutcome::Failed
            },
            attempts,
            started_at,
        );

        if succeeded {
            info!(node_id = %node.id, %action, attempts, "recovery action succeeded");
            recovered = true;
            break;
        }
        warn!(
            node_id = %node.id,
            %action,
            attempts,
            outcome = ?outcome,
            "recovery action failed, trying next"
        );
    }

    if recovered {
        // The detector re-verifies health on its next cycle.
        restore_node(&state, node, NodeStatus::Active, HealthState::Unknown, true);
    } else {
        error!(
            node_id = %node.id,
            "all recovery actions exhausted, node needs operator attention"
        );
        restore_node(&state, node, NodeStatus::Error, HealthState::Unhealthy, false);
    }
}

/// Run one action with bounded retries and per-attempt timeouts.
async fn run_action(
    runner: &dyn ActionRunner,
    retry: &RetryPolicy,
    node: &NodeRecord,
    action: ActionName,
) -> (ActionOutcome, u32) {
    let mut backoff = retry.base_backoff;
    let mut attempts = 0;

    loop {
        attempts += 1;
        let outcome = match tokio::time::timeout(retry.attempt_timeout, runner.execute(node, action))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => ActionOutcome::Timeout,
        };

        match outcome {
            ActionOutcome::Retry(reason) if attempts < retry.max_attempts => {
                debug!(
                    node_id = %node.id,
                    %action,
                    attempts,
                    %reason,
                    backoff_ms = backoff.as_millis() as u64,
                    "action asked for retry"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(retry.max_backoff);
            }
            outcome => return (outcome, attempts),
        }
    }
}

fn record_action(
    state: &StateStore,
    node: &NodeRecord,
    action: ActionName,
    outcome: RecoveryOutcome,
    attempts: u32,
    started_at: u64,
) {
    let record = RecoveryRecord {
        node_id: node.id.clone(),
        cluster_id: node.cluster_id.clone(),
        action: action.to_string(),
        outcome,
        attempts,
        started_at,
        finished_at: epoch_secs(),
    };
    if let Err(e) = state.put_recovery(&record) {
        error!(node_id = %node.id, error = %e, "failed to record recovery action");
    }
}

fn restore_node(
    state: &StateStore,
    mut node: NodeRecord,
    status: NodeStatus,
    health: HealthState,
    count_recovery: bool,
) {
    node.status = status;
    node.health = health;
    if count_recovery {
        node.recovery_count += 1;
    }
    node.updated_at = epoch_secs();
    if let Err(e) = state.put_node(&node) {
        error!(node_id = %node.id, error = %e, "failed to update node after recovery");
    }
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
