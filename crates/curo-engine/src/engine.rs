//! PolicyEngine — attach/detach lifecycle and verdict handling.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use curo_detect::{Detector, LbStatusSource, LifecycleEvent, StatusProbe, VerdictCallback};
use curo_policy::{ActionName, DetectionType, HealthPolicy};
use curo_recover::RecoveryOrchestrator;
use curo_state::{HealthState, NodeStatus, StateStore};

/// Engine-level tuning that the policy document does not carry.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consecutive unhealthy probes before a poll verdict flips.
    pub unhealthy_threshold: u32,
    /// Minimum gap between recoveries of the same node. Zero disables
    /// the cooldown.
    pub recovery_cooldown: Duration,
    /// Lifecycle event channel capacity.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            recovery_cooldown: Duration::ZERO,
            event_buffer: 64,
        }
    }
}

/// Errors raised by engine lifecycle operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("detection type {0} requires a node status probe; none configured")]
    MissingProbe(DetectionType),

    #[error("detection type {0} requires a load-balancer status source; none configured")]
    MissingLbSource(DetectionType),
}

/// Runs one health policy against attached clusters.
pub struct PolicyEngine {
    policy: HealthPolicy,
    detector: Detector,
    orchestrator: Arc<RecoveryOrchestrator>,
    config: EngineConfig,
    probe: Option<Arc<dyn StatusProbe>>,
    lb_source: Option<Arc<dyn LbStatusSource>>,
}

impl PolicyEngine {
    /// Create an engine for a validated policy.
    pub fn new(
        policy: HealthPolicy,
        state: StateStore,
        orchestrator: Arc<RecoveryOrchestrator>,
        config: EngineConfig,
    ) -> Self {
        let actions = policy.recovery.action_names();
        let cooldown = config.recovery_cooldown;
        let cb_state = state.clone();
        let cb_orch = orchestrator.clone();

        let callback: VerdictCallback = Arc::new(move |cluster_id, node_id, health| {
            let state = cb_state.clone();
            let orch = cb_orch.clone();
            let actions = actions.clone();
            Box::pin(async move {
                handle_verdict(&state, &orch, &actions, cooldown, &cluster_id, &node_id, health)
                    .await;
            })
        });

        let detector = Detector::new(state).with_callback(callback);

        Self {
            policy,
            detector,
            orchestrator,
            config,
            probe: None,
            lb_source: None,
        }
    }

    /// Provide the node status probe (required for NODE_STATUS_POLLING).
    pub fn with_probe(mut self, probe: Arc<dyn StatusProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Provide the LB status source (required for LB_STATUS_POLLING).
    pub fn with_lb_source(mut self, source: Arc<dyn LbStatusSource>) -> Self {
        self.lb_source = Some(source);
        self
    }

    /// The attached policy.
    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Attach the policy to a cluster: start its detection strategy.
    pub async fn attach(&self, cluster_id: &str) -> Result<(), EngineError> {
        let strategy = self.policy.detection.strategy;
        match strategy {
            DetectionType::NodeStatusPolling => {
                let probe = self
                    .probe
                    .clone()
                    .ok_or(EngineError::MissingProbe(strategy))?;
                self.detector
                    .start_polling(
                        cluster_id,
                        &self.policy.detection.options,
                        self.config.unhealthy_threshold,
                        probe,
                    )
                    .await;
            }
            DetectionType::LbStatusPolling => {
                let source = self
                    .lb_source
                    .clone()
                    .ok_or(EngineError::MissingLbSource(strategy))?;
                self.detector
                    .start_lb_polling(
                        cluster_id,
                        &self.policy.detection.options,
                        self.config.unhealthy_threshold,
                        source,
                    )
                    .await;
            }
            DetectionType::LifecycleEvents => {
                self.detector
                    .start_events(cluster_id, self.config.event_buffer)
                    .await;
            }
        }

        info!(%cluster_id, %strategy, "health policy attached");
        Ok(())
    }

    /// Detach the policy from a cluster: stop detection and cancel any
    /// in-flight recoveries for its nodes.
    pub async fn detach(&self, cluster_id: &str) {
        self.detector.stop(cluster_id).await;
        self.orchestrator.cancel_for_cluster(cluster_id).await;
        info!(%cluster_id, "health policy detached");
    }

    /// Whether the policy is attached to a cluster.
    pub async fn is_attached(&self, cluster_id: &str) -> bool {
        self.detector.is_active(cluster_id).await
    }

    /// The lifecycle event intake for a cluster (LIFECYCLE_EVENTS only).
    pub async fn event_sender(&self, cluster_id: &str) -> Option<mpsc::Sender<LifecycleEvent>> {
        self.detector.event_sender(cluster_id).await
    }

    /// Stop everything (daemon shutdown).
    pub async fn shutdown(&self) {
        self.detector.stop_all().await;
        self.orchestrator.cancel_all().await;
    }
}

/// React to one verdict transition from the detector.
async fn handle_verdict(
    state: &StateStore,
    orchestrator: &RecoveryOrchestrator,
    actions: &[ActionName],
    cooldown: Duration,
    cluster_id: &str,
    node_id: &str,
    health: HealthState,
) {
    if health != HealthState::Unhealthy {
        debug!(%node_id, ?health, "verdict transition, no recovery needed");
        return;
    }

    if orchestrator.is_recovering(node_id).await {
        debug!(%node_id, "recovery already in flight");
        return;
    }

    if cooldown > Duration::ZERO {
        match state.last_recovery_finished_at(node_id) {
            Ok(Some(finished_at)) => {
                let elapsed = epoch_secs().saturating_sub(finished_at);
                if elapsed < cooldown.as_secs() {
                    info!(
                        %node_id,
                        elapsed_secs = elapsed,
                        cooldown_secs = cooldown.as_secs(),
                        "recovery suppressed by cooldown"
                    );
                    return;
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A broken audit read shouldn't block recovery.
                error!(%node_id, error = %e, "failed to read recovery history");
            }
        }
    }

    let node = match state.get_node_required(cluster_id, node_id) {
        Ok(node) => node,
        Err(e) => {
            error!(%cluster_id, %node_id, error = %e, "cannot recover unknown node");
            return;
        }
    };

    if node.status == NodeStatus::Error {
        // Parked after exhausting all actions; operator must reset it.
        warn!(%node_id, "node is in error state, not retrying recovery");
        return;
    }

    orchestrator.recover(node, actions.to_vec()).await;
}

fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
