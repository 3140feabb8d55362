//! curo-state — embedded state store for Curo.
//!
//! Backed by [redb](https://docs.rs/redb), persists the node registry
//! and the recovery audit log. All domain types are JSON-serialized into
//! redb's `&[u8]` value columns; composite keys (`{cluster_id}:{node_id}`,
//! `{node_id}:{started_at}:{action}`) enable prefix scans for related
//! records.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`) and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
