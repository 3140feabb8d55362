//! curo-detect — health detection for managed cluster nodes.
//!
//! Implements the three detection strategies a health policy can name:
//!
//! - `NODE_STATUS_POLLING` — probe each node's own status endpoint.
//! - `LB_STATUS_POLLING` — ask the load balancer for member health.
//! - `LIFECYCLE_EVENTS` — react to pushed node lifecycle notifications.
//!
//! # Architecture
//!
//! ```text
//! Detector
//!   ├── Per-cluster background task (poll loop or event loop)
//!   │   ├── VerdictTracker per node (thresholds, backoff)
//!   │   ├── StatusProbe / LbStatusSource → ProbeStatus
//!   │   └── Persist health + last_checked_at to the StateStore
//!   └── VerdictCallback for engine notification (transitions only)
//! ```
//!
//! Transient check failures are `Inconclusive`: they count toward
//! neither health state, so a flaky network path cannot mark a node
//! unhealthy on its own. A node that stays inconclusive longer than
//! the policy's `node_update_timeout` escalates to unhealthy.

pub mod detector;
pub mod events;
pub mod probe;
pub mod verdict;

pub use detector::{Detector, VerdictCallback};
pub use events::{EventKind, LifecycleEvent};
pub use probe::{HttpStatusProbe, LbStatusSource, ProbeStatus, StatusProbe, http_probe};
pub use verdict::VerdictTracker;
