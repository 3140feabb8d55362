//! Node lifecycle event types for `LIFECYCLE_EVENTS` detection.

use serde::{Deserialize, Serialize};

use curo_state::NodeId;

/// A pushed notification about a node's lifecycle.
///
/// Every kind delivered here is an unhealthy signal; healthy nodes do
/// not emit lifecycle notifications.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub node_id: NodeId,
    pub kind: EventKind,
    /// Unix timestamp of the event; 0 means "stamp on receipt".
    #[serde(default)]
    pub at: u64,
}

/// What happened to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The node's workload stopped.
    NodeStopped,
    /// The node was deleted out from under the cluster.
    NodeDeleted,
    /// The platform reported the node as errored.
    NodeError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_json_shape() {
        let json = r#"{"node_id":"n1","kind":"node_stopped"}"#;
        let event: LifecycleEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.node_id, "n1");
        assert_eq!(event.kind, EventKind::NodeStopped);
        assert_eq!(event.at, 0);
    }
}
