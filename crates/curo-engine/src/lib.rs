//! curo-engine — the policy engine.
//!
//! Ties the detector's verdicts to the recovery orchestrator under a
//! single attached [`HealthPolicy`](curo_policy::HealthPolicy):
//!
//! ```text
//! PolicyEngine::attach(cluster)
//!   └── Detector (strategy from policy.detection.type)
//!         └── verdict transition → handle_verdict
//!               ├── cooldown / in-flight / parked-node checks
//!               └── RecoveryOrchestrator::recover(node, policy actions)
//! ```
//!
//! The policy is immutable while attached; replacing it is
//! `detach` + `attach` with the new document.

pub mod engine;

pub use engine::{EngineConfig, EngineError, PolicyEngine};
