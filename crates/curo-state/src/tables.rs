//! redb table definitions for the Curo state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized
//! domain types).

use redb::TableDefinition;

/// Node records keyed by `{cluster_id}:{node_id}`.
pub const NODES: TableDefinition<&str, &[u8]> = TableDefinition::new("nodes");

/// Recovery audit records keyed by `{node_id}:{started_at}:{action}`,
/// with the timestamp zero-padded to keep key order chronological.
pub const RECOVERIES: TableDefinition<&str, &[u8]> = TableDefinition::new("recoveries");
