//! The action execution seam.

use async_trait::async_trait;

use curo_policy::ActionName;
use curo_state::NodeRecord;

/// Result of one execution attempt of a recovery action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action completed and the node should be back in service.
    Ok,
    /// The action failed; move on to the next configured action.
    Error(String),
    /// The action could not run right now and is worth retrying
    /// (resource lock held, API throttled).
    Retry(String),
    /// The action ran out of time.
    Timeout,
}

/// Executes recovery actions against the platform that owns the nodes.
///
/// The runtime that performs the actual reboot/rebuild/recreate is an
/// external collaborator; the orchestrator only sees outcomes.
#[async_trait]
pub trait ActionRunner: Send + Sync {
    async fn execute(&self, node: &NodeRecord, action: ActionName) -> ActionOutcome;
}
