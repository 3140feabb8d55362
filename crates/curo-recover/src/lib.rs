//! curo-recover — recovery orchestration for unhealthy nodes.
//!
//! Given an unhealthy node and the policy's ordered action list, the
//! orchestrator executes actions in order until one succeeds or all are
//! exhausted. Each action gets bounded retries with exponential backoff
//! and a per-attempt timeout. At most one recovery runs per node at any
//! time; a node whose actions are all exhausted is reported as a
//! permanent failure and parked in `NodeStatus::Error`.
//!
//! Action execution itself is external — implement [`ActionRunner`]
//! against the platform that actually reboots, rebuilds, or re-creates
//! nodes.

pub mod error;
pub mod orchestrator;
pub mod runner;

pub use error::{RecoverError, RecoverResult};
pub use orchestrator::{RecoveryOrchestrator, RetryPolicy};
pub use runner::{ActionOutcome, ActionRunner};
