//! Detector — background detection tasks per cluster.
//!
//! The `Detector` spawns one background task per attached cluster:
//! a poll loop for the polling strategies, or an event loop for
//! `LIFECYCLE_EVENTS`. Verdict transitions are reported through an
//! optional callback; the current verdict and `last_checked_at` are
//! persisted to the node record either way.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use curo_policy::DetectionOptions;
use curo_state::{ClusterId, HealthState, NodeId, NodeRecord, NodeStatus, StateStore};

use crate::events::LifecycleEvent;
use crate::probe::{LbStatusSource, ProbeStatus, StatusProbe};
use crate::verdict::VerdictTracker;

/// Callback invoked when a node's health verdict changes.
///
/// The policy engine uses this to trigger recovery.
pub type VerdictCallback =
    Arc<dyn Fn(ClusterId, NodeId, HealthState) -> BoxFuture + Send + Sync>;

type BoxFuture = std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>;

/// Where poll verdicts come from.
#[derive(Clone)]
enum PollSource {
    Node(Arc<dyn StatusProbe>),
    Lb(Arc<dyn LbStatusSource>),
}

impl PollSource {
    async fn check(&self, node: &NodeRecord) -> ProbeStatus {
        match self {
            Self::Node(probe) => probe.check(node).await,
            Self::Lb(source) => source.member_health(node).await,
        }
    }
}

/// Per-cluster detection state.
struct DetectorSlot {
    /// Handle to the background task.
    handle: JoinHandle<()>,
    /// Shutdown signal for this task.
    shutdown_tx: watch::Sender<bool>,
    /// Event intake, only for LIFECYCLE_EVENTS clusters.
    events_tx: Option<mpsc::Sender<LifecycleEvent>>,
}

/// Manages detection tasks for all attached clusters.
pub struct Detector {
    state: StateStore,
    /// Active detection tasks: cluster_id → slot.
    slots: Arc<RwLock<HashMap<ClusterId, DetectorSlot>>>,
    /// Optional callback for verdict transitions.
    on_verdict: Option<VerdictCallback>,
}

impl Detector {
    /// Create a new detector.
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            slots: Arc::new(RwLock::new(HashMap::new())),
            on_verdict: None,
        }
    }

    /// Set a callback for verdict transitions.
    pub fn with_callback(mut self, callback: VerdictCallback) -> Self {
        self.on_verdict = Some(callback);
        self
    }

    /// Start node-status polling for a cluster.
    pub async fn start_polling(
        &self,
        cluster_id: &str,
        options: &DetectionOptions,
        unhealthy_threshold: u32,
        probe: Arc<dyn StatusProbe>,
    ) {
        self.start_poll_task(cluster_id, options, unhealthy_threshold, PollSource::Node(probe))
            .await;
    }

    /// Start load-balancer status polling for a cluster.
    pub async fn start_lb_polling(
        &self,
        cluster_id: &str,
        options: &DetectionOptions,
        unhealthy_threshold: u32,
        source: Arc<dyn LbStatusSource>,
    ) {
        self.start_poll_task(cluster_id, options, unhealthy_threshold, PollSource::Lb(source))
            .await;
    }

    async fn start_poll_task(
        &self,
        cluster_id: &str,
        options: &DetectionOptions,
        unhealthy_threshold: u32,
        source: PollSource,
    ) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            %cluster_id,
            interval_secs = options.interval,
            "poll detection started"
        );

        let cluster = cluster_id.to_string();
        let options = options.clone();
        let state = self.state.clone();
        let callback = self.on_verdict.clone();

        let handle = tokio::spawn(async move {
            run_poll_loop(
                &cluster,
                &options,
                unhealthy_threshold,
                source,
                state,
                callback,
                shutdown_rx,
            )
            .await;
        });

        self.insert_slot(cluster_id, handle, shutdown_tx, None).await;
    }

    /// Start lifecycle-event detection for a cluster, returning the
    /// sender that event producers feed.
    pub async fn start_events(&self, cluster_id: &str, buffer: usize) -> mpsc::Sender<LifecycleEvent> {
        let (events_tx, events_rx) = mpsc::channel(buffer);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let cluster = cluster_id.to_string();
        let state = self.state.clone();
        let callback = self.on_verdict.clone();

        let handle = tokio::spawn(async move {
            run_event_loop(&cluster, events_rx, state, callback, shutdown_rx).await;
        });

        self.insert_slot(cluster_id, handle, shutdown_tx, Some(events_tx.clone()))
            .await;
        info!(%cluster_id, "lifecycle-event detection started");
        events_tx
    }

    async fn insert_slot(
        &self,
        cluster_id: &str,
        handle: JoinHandle<()>,
        shutdown_tx: watch::Sender<bool>,
        events_tx: Option<mpsc::Sender<LifecycleEvent>>,
    ) {
        let mut slots = self.slots.write().await;
        if let Some(old) = slots.insert(
            cluster_id.to_string(),
            DetectorSlot {
                handle,
                shutdown_tx,
                events_tx,
            },
        ) {
            // Stop the old task if one was running.
            let _ = old.shutdown_tx.send(true);
            old.handle.abort();
        }
    }

    /// Stop detection for a cluster.
    pub async fn stop(&self, cluster_id: &str) {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.remove(cluster_id) {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            info!(%cluster_id, "detection stopped");
        }
    }

    /// Stop all detection tasks (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut slots = self.slots.write().await;
        for (id, slot) in slots.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(cluster_id = %id, "detection stopped");
        }
        info!("all detection stopped");
    }

    /// The lifecycle event sender for a cluster, if it runs event
    /// detection.
    pub async fn event_sender(&self, cluster_id: &str) -> Option<mpsc::Sender<LifecycleEvent>> {
        let slots = self.slots.read().await;
        slots.get(cluster_id).and_then(|s| s.events_tx.clone())
    }

    /// Check if a cluster has an active detection task.
    pub async fn is_active(&self, cluster_id: &str) -> bool {
        let slots = self.slots.read().await;
        slots.contains_key(cluster_id)
    }
}

/// The poll loop for a single cluster.
async fn run_poll_loop(
    cluster_id: &str,
    options: &DetectionOptions,
    unhealthy_threshold: u32,
    source: PollSource,
    state: StateStore,
    callback: Option<VerdictCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = options.interval();
    let mut trackers: HashMap<NodeId, VerdictTracker> = HashMap::new();
    let mut due: HashMap<NodeId, Instant> = HashMap::new();

    debug!(%cluster_id, interval_secs = options.interval, "poll loop starting");

    // First pass right away; attach must not wait a full interval for
    // the initial verdicts.
    poll_cluster(
        cluster_id,
        options,
        unhealthy_threshold,
        &source,
        &state,
        &callback,
        &mut trackers,
        &mut due,
    )
    .await;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                poll_cluster(
                    cluster_id,
                    options,
                    unhealthy_threshold,
                    &source,
                    &state,
                    &callback,
                    &mut trackers,
                    &mut due,
                )
                .await;
            }
            _ = shutdown.changed() => {
                debug!(%cluster_id, "poll loop shutting down");
                break;
            }
        }
    }
}

/// One poll pass over the cluster's registered nodes.
#[allow(clippy::too_many_arguments)]
async fn poll_cluster(
    cluster_id: &str,
    options: &DetectionOptions,
    unhealthy_threshold: u32,
    source: &PollSource,
    state: &StateStore,
    callback: &Option<VerdictCallback>,
    trackers: &mut HashMap<NodeId, VerdictTracker>,
    due: &mut HashMap<NodeId, Instant>,
) {
    let nodes = match state.list_nodes_for_cluster(cluster_id) {
        Ok(nodes) => nodes,
        Err(e) => {
            error!(%cluster_id, error = %e, "failed to list nodes, retrying next cycle");
            return;
        }
    };

    let now = Instant::now();
    for node in nodes {
        // The orchestrator owns the record while recovering.
        if node.status == NodeStatus::Recovering {
            continue;
        }
        if let Some(next) = due.get(&node.id) && *next > now {
            continue;
        }

        let tracker = trackers.entry(node.id.clone()).or_insert_with(|| {
            VerdictTracker::new(
                unhealthy_threshold,
                options.interval(),
                options.node_update_timeout(),
            )
        });

        let status = source.check(&node).await;
        let verdict = tracker.record(status);
        due.insert(node.id.clone(), now + tracker.next_interval());

        report_verdict(state, callback, &node, verdict).await;
    }
}

/// The event loop for a single cluster.
async fn run_event_loop(
    cluster_id: &str,
    mut events: mpsc::Receiver<LifecycleEvent>,
    state: StateStore,
    callback: Option<VerdictCallback>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(%cluster_id, "event loop starting");

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    debug!(%cluster_id, "event channel closed");
                    break;
                };

                let node = match state.get_node(cluster_id, &event.node_id) {
                    Ok(Some(node)) => node,
                    Ok(None) => {
                        debug!(%cluster_id, node_id = %event.node_id, "event for unknown node ignored");
                        continue;
                    }
                    Err(e) => {
                        error!(%cluster_id, node_id = %event.node_id, error = %e, "failed to load node for event");
                        continue;
                    }
                };
                if node.status == NodeStatus::Recovering {
                    debug!(node_id = %node.id, "event during recovery ignored");
                    continue;
                }

                info!(node_id = %node.id, kind = ?event.kind, "lifecycle event received");
                report_verdict(&state, &callback, &node, HealthState::Unhealthy).await;
            }
            _ = shutdown.changed() => {
                debug!(%cluster_id, "event loop shutting down");
                break;
            }
        }
    }
}

/// Persist the verdict on the node record and notify on transitions.
async fn report_verdict(
    state: &StateStore,
    callback: &Option<VerdictCallback>,
    node: &NodeRecord,
    verdict: HealthState,
) {
    // Transitions are judged against the persisted record so that a
    // recovery (which resets health to Unknown) re-arms notification.
    let prev = node.health;

    let mut record = node.clone();
    record.health = verdict;
    record.last_checked_at = epoch_secs();
    record.updated_at = record.last_checked_at;
    if let Err(e) = state.put_node(&record) {
        error!(node_id = %node.id, error = %e, "failed to persist health verdict");
    }

    if verdict != prev && let Some(cb) = callback {
        cb(node.cluster_id.clone(), node.id.clone(), verdict).await;
    }
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
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    struct FixedProbe(ProbeStatus);

    #[async_trait]
    impl StatusProbe for FixedProbe {
        async fn check(&self, _node: &NodeRecord) -> ProbeStatus {
            self.0
        }
    }

    fn test_node(cluster_id: &str, node_id: &str) -> NodeRecord {
        NodeRecord {
            id: node_id.to_string(),
            cluster_id: cluster_id.to_string(),
            address: "127.0.0.1:1".to_string(),
            status: NodeStatus::Active,
            health: HealthState::Unknown,
            recovery_count: 0,
            last_checked_at: 0,
            updated_at: 0,
        }
    }

    fn options(interval: u64) -> DetectionOptions {
        DetectionOptions {
            interval,
            node_update_timeout: 300,
        }
    }

    fn recording_callback() -> (VerdictCallback, Arc<Mutex<Vec<(NodeId, HealthState)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let inner = seen.clone();
        let cb: VerdictCallback = Arc::new(move |_cluster, node_id, health| {
            let inner = inner.clone();
            Box::pin(async move {
                inner.lock().unwrap().push((node_id, health));
            })
        });
        (cb, seen)
    }

    #[tokio::test]
    async fn detector_starts_and_stops() {
        let state = StateStore::open_in_memory().unwrap();
        let detector = Detector::new(state);

        detector
            .start_polling(
                "c1",
                &options(60),
                3,
                Arc::new(FixedProbe(ProbeStatus::Healthy)),
            )
            .await;
        assert!(detector.is_active("c1").await);
        assert!(detector.event_sender("c1").await.is_none());

        detector.stop("c1").await;
        assert!(!detector.is_active("c1").await);
    }

    #[tokio::test]
    async fn detector_stop_all() {
        let state = StateStore::open_in_memory().unwrap();
        let detector = Detector::new(state);

        detector
            .start_polling(
                "c1",
                &options(60),
                3,
                Arc::new(FixedProbe(ProbeStatus::Healthy)),
            )
            .await;
        detector.start_events("c2", 16).await;

        detector.stop_all().await;
        assert!(!detector.is_active("c1").await);
        assert!(!detector.is_active("c2").await);
    }

    #[tokio::test]
    async fn restart_replaces_existing_task() {
        let state = StateStore::open_in_memory().unwrap();
        let detector = Detector::new(state);

        detector
            .start_polling(
                "c1",
                &options(60),
                3,
                Arc::new(FixedProbe(ProbeStatus::Healthy)),
            )
            .await;
        detector.start_events("c1", 16).await;

        // The replacement slot runs event detection.
        assert!(detector.event_sender("c1").await.is_some());
        detector.stop_all().await;
    }

    #[tokio::test]
    async fn poll_loop_reports_unhealthy_transition() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_node(&test_node("c1", "n1")).unwrap();

        let (cb, seen) = recording_callback();
        let detector = Detector::new(state.clone()).with_callback(cb);

        // Threshold 1: the first unhealthy probe flips the verdict.
        detector
            .start_polling(
                "c1",
                &options(1),
                1,
                Arc::new(FixedProbe(ProbeStatus::Unhealthy)),
            )
            .await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        detector.stop_all().await;

        let node = state.get_node("c1", "n1").unwrap().unwrap();
        assert_eq!(node.health, HealthState::Unhealthy);
        assert!(node.last_checked_at > 0);

        // Transition reported exactly once despite repeated probes.
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[("n1".to_string(), HealthState::Unhealthy)]
        );
    }

    #[tokio::test]
    async fn first_poll_runs_immediately() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_node(&test_node("c1", "n1")).unwrap();

        let detector = Detector::new(state.clone());
        detector
            .start_polling(
                "c1",
                &options(600),
                3,
                Arc::new(FixedProbe(ProbeStatus::Healthy)),
            )
            .await;

        // Well under the 600s interval; the first pass must not wait.
        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.stop_all().await;

        let node = state.get_node("c1", "n1").unwrap().unwrap();
        assert!(node.last_checked_at > 0);
        assert_eq!(node.health, HealthState::Healthy);
    }

    #[tokio::test]
    async fn event_loop_reports_unhealthy() {
        let state = StateStore::open_in_memory().unwrap();
        state.put_node(&test_node("c1", "n1")).unwrap();

        let (cb, seen) = recording_callback();
        let detector = Detector::new(state.clone()).with_callback(cb);

        let tx = detector.start_events("c1", 16).await;
        tx.send(LifecycleEvent {
            node_id: "n1".to_string(),
            kind: crate::events::EventKind::NodeStopped,
            at: 0,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.stop_all().await;

        let node = state.get_node("c1", "n1").unwrap().unwrap();
        assert_eq!(node.health, HealthState::Unhealthy);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[("n1".to_string(), HealthState::Unhealthy)]
        );
    }

    #[tokio::test]
    async fn event_for_unknown_node_ignored() {
        let state = StateStore::open_in_memory().unwrap();
        let (cb, seen) = recording_callback();
        let detector = Detector::new(state).with_callback(cb);

        let tx = detector.start_events("c1", 16).await;
        tx.send(LifecycleEvent {
            node_id: "ghost".to_string(),
            kind: crate::events::EventKind::NodeError,
            at: 0,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.stop_all().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn recovering_nodes_are_skipped() {
        let state = StateStore::open_in_memory().unwrap();
        let mut node = test_node("c1", "n1");
        node.status = NodeStatus::Recovering;
        node.health = HealthState::Unhealthy;
        state.put_node(&node).unwrap();

        let (cb, seen) = recording_callback();
        let detector = Detector::new(state.clone()).with_callback(cb);

        let tx = detector.start_events("c1", 16).await;
        tx.send(LifecycleEvent {
            node_id: "n1".to_string(),
            kind: crate::events::EventKind::NodeError,
            at: 0,
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        detector.stop_all().await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
