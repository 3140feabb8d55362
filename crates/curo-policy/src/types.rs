//! Validated policy model.
//!
//! These types are what the rest of the system consumes. They are only
//! constructed by the loader, after validation; the raw document shapes
//! live in `loader.rs`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::PolicyError;

/// How unhealthy nodes are detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionType {
    /// Poll each node's own status endpoint on an interval.
    NodeStatusPolling,
    /// Poll the load balancer's member health on an interval.
    LbStatusPolling,
    /// React to pushed node lifecycle notifications; no polling.
    LifecycleEvents,
}

impl FromStr for DetectionType {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NODE_STATUS_POLLING" => Ok(Self::NodeStatusPolling),
            "LB_STATUS_POLLING" => Ok(Self::LbStatusPolling),
            "LIFECYCLE_EVENTS" => Ok(Self::LifecycleEvents),
            other => Err(PolicyError::UnknownDetectionType(other.to_string())),
        }
    }
}

impl fmt::Display for DetectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NodeStatusPolling => "NODE_STATUS_POLLING",
            Self::LbStatusPolling => "LB_STATUS_POLLING",
            Self::LifecycleEvents => "LIFECYCLE_EVENTS",
        };
        f.write_str(s)
    }
}

/// A remediation step applied to an unhealthy node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionName {
    /// Restart the node in place.
    Reboot,
    /// Rebuild the node from its profile, keeping its identity.
    Rebuild,
    /// Delete and re-create the node.
    Recreate,
}

impl FromStr for ActionName {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REBOOT" => Ok(Self::Reboot),
            "REBUILD" => Ok(Self::Rebuild),
            "RECREATE" => Ok(Self::Recreate),
            other => Err(PolicyError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for ActionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Reboot => "REBOOT",
            Self::Rebuild => "REBUILD",
            Self::Recreate => "RECREATE",
        };
        f.write_str(s)
    }
}

/// Tuning knobs for a detection strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionOptions {
    /// Poll interval in seconds (ignored for LIFECYCLE_EVENTS).
    pub interval: u64,
    /// How long a node may stay inconclusive before it counts as
    /// unhealthy.
    pub node_update_timeout: u64,
}

impl DetectionOptions {
    /// Default poll interval when the document omits `interval`.
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;
    /// Default inconclusive-escalation window.
    pub const DEFAULT_NODE_UPDATE_TIMEOUT_SECS: u64 = 300;

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }

    pub fn node_update_timeout(&self) -> Duration {
        Duration::from_secs(self.node_update_timeout)
    }
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL_SECS,
            node_update_timeout: Self::DEFAULT_NODE_UPDATE_TIMEOUT_SECS,
        }
    }
}

/// The detection half of a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionSpec {
    pub strategy: DetectionType,
    pub options: DetectionOptions,
}

/// One entry in the ordered recovery action list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryActionSpec {
    pub name: ActionName,
}

/// The recovery half of a policy. `actions` is non-empty and ordered;
/// the orchestrator tries each in turn until one succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverySpec {
    pub actions: Vec<RecoveryActionSpec>,
}

impl RecoverySpec {
    /// The action names in configured order.
    pub fn action_names(&self) -> Vec<ActionName> {
        self.actions.iter().map(|a| a.name).collect()
    }
}

/// A fully validated health policy. Immutable once attached; updates
/// replace the whole document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthPolicy {
    /// Document type namespace (e.g. `curo.policy.health`), kept verbatim.
    pub type_name: String,
    /// Document schema version, kept verbatim.
    pub version: String,
    pub description: String,
    pub detection: DetectionSpec,
    pub recovery: RecoverySpec,
}
