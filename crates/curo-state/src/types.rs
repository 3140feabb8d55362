//! Domain types for the Curo state store.
//!
//! These types represent the persisted state of managed nodes and the
//! recovery audit log. All types are serializable to/from JSON for
//! storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a managed node.
pub type NodeId = String;

/// Unique identifier for a cluster.
pub type ClusterId = String;

// ── Node ──────────────────────────────────────────────────────────

/// Registry entry for a managed node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub cluster_id: ClusterId,
    /// The node agent's address (ip:port), used for probes and actions.
    pub address: String,
    pub status: NodeStatus,
    /// Health as determined by the active detection strategy.
    pub health: HealthState,
    /// How many times this node has been successfully recovered.
    pub recovery_count: u32,
    /// Unix timestamp of the last health check against this node.
    pub last_checked_at: u64,
    /// Unix timestamp of the last record change.
    pub updated_at: u64,
}

/// Lifecycle status of a managed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Node is in service.
    Active,
    /// A recovery is in flight for this node.
    Recovering,
    /// All configured recovery actions failed; operator attention needed.
    Error,
}

/// Health verdict for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

// ── Recovery audit log ────────────────────────────────────────────

/// Outcome of one recovery action against one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

/// Audit record for a recovery action, one per action tried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecoveryRecord {
    pub node_id: NodeId,
    pub cluster_id: ClusterId,
    /// The action name (REBOOT, REBUILD, RECREATE).
    pub action: String,
    pub outcome: RecoveryOutcome,
    /// How many attempts the action took (retries included).
    pub attempts: u32,
    /// Unix timestamp when the action started.
    pub started_at: u64,
    /// Unix timestamp when the action finished.
    pub finished_at: u64,
}

impl NodeRecord {
    /// Build the composite key for the nodes table.
    pub fn table_key(&self) -> String {
        format!("{}:{}", self.cluster_id, self.id)
    }

    /// Composite key for a given cluster/node pair.
    pub fn key_for(cluster_id: &str, node_id: &str) -> String {
        format!("{cluster_id}:{node_id}")
    }
}

impl RecoveryRecord {
    /// Build the composite key for the recoveries table. The timestamp
    /// is zero-padded so key order matches time order.
    pub fn table_key(&self) -> String {
        format!("{}:{:020}:{}", self.node_id, self.started_at, self.action)
    }
}
