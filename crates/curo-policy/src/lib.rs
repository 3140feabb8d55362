//! curo-policy — the declarative health policy document.
//!
//! A health policy selects a detection strategy and an ordered list of
//! recovery actions for a cluster. Documents are YAML:
//!
//! ```yaml
//! type: curo.policy.health
//! version: "1.0"
//! description: A policy for maintaining node health from a cluster.
//! properties:
//!   detection:
//!     type: NODE_STATUS_POLLING
//!     options:
//!       interval: 600
//!   recovery:
//!     actions:
//!       - name: RECREATE
//! ```
//!
//! All schema violations are surfaced at load time as [`PolicyError`];
//! a loaded [`HealthPolicy`] is fully validated and immutable. Policy
//! updates replace the document wholesale (detach + attach).

pub mod error;
pub mod loader;
pub mod types;

pub use error::PolicyError;
pub use types::{
    ActionName, DetectionOptions, DetectionSpec, DetectionType, HealthPolicy, RecoveryActionSpec,
    RecoverySpec,
};
