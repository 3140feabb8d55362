//! StateStore — redb-backed state persistence for Curo.
//!
//! Provides typed CRUD operations over node records and the recovery
//! audit log. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(RECOVERIES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node record.
    pub fn put_node(&self, node: &NodeRecord) -> StateResult<()> {
        let key = node.table_key();
        let value = serde_json::to_vec(node).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "node stored");
        Ok(())
    }

    /// Get a node by cluster/node id.
    pub fn get_node(&self, cluster_id: &str, node_id: &str) -> StateResult<Option<NodeRecord>> {
        let key = NodeRecord::key_for(cluster_id, node_id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let node: NodeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(node))
            }
            None => Ok(None),
        }
    }

    /// Get a node that must exist.
    pub fn get_node_required(&self, cluster_id: &str, node_id: &str) -> StateResult<NodeRecord> {
        self.get_node(cluster_id, node_id)?
            .ok_or_else(|| StateError::NodeNotFound(NodeRecord::key_for(cluster_id, node_id)))
    }

    /// List all node records in a cluster.
    pub fn list_nodes_for_cluster(&self, cluster_id: &str) -> StateResult<Vec<NodeRecord>> {
        let prefix = format!("{cluster_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(NODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let node: NodeRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(node);
            }
        }
        Ok(results)
    }

    /// Delete a node record. Returns true if it existed.
    pub fn delete_node(&self, cluster_id: &str, node_id: &str) -> StateResult<bool> {
        let key = NodeRecord::key_for(cluster_id, node_id);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(NODES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "node deleted");
        Ok(existed)
    }

    // ── Recovery audit log ─────────────────────────────────────────

    /// Append a recovery record to the audit log.
    pub fn put_recovery(&self, record: &RecoveryRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RECOVERIES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, outcome = ?record.outcome, "recovery recorded");
        Ok(())
    }

    /// List recovery records for a node, oldest first (key order).
    pub fn list_recoveries_for_node(&self, node_id: &str) -> StateResult<Vec<RecoveryRecord>> {
        let prefix = format!("{node_id}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RECOVERIES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: RecoveryRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        Ok(results)
    }

    /// Unix timestamp of the most recently finished recovery for a node,
    /// if any.
    pub fn last_recovery_finished_at(&self, node_id: &str) -> StateResult<Option<u64>> {
        let recoveries = self.list_recoveries_for_node(node_id)?;
        Ok(recoveries.iter().map(|r| r.finished_at).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_node(cluster_id: &str, node_id: &str) -> NodeRecord {
        NodeRecord {
            id: node_id.to_string(),
            cluster_id: cluster_id.to_string(),
            address: "10.0.0.1:7700".to_string(),
            status: NodeStatus::Active,
            health: HealthState::Unknown,
            recovery_count: 0,
            last_checked_at: 0,
            updated_at: 1000,
        }
    }

    fn test_recovery(node_id: &str, started_at: u64, action: &str) -> RecoveryRecord {
        RecoveryRecord {
            node_id: node_id.to_string(),
            cluster_id: "c1".to_string(),
            action: action.to_string(),
            outcome: RecoveryOutcome::Succeeded,
            attempts: 1,
            started_at,
            finished_at: started_at + 5,
        }
    }

    #[test]
    fn node_crud() {
        let store = StateStore::open_in_memory().unwrap();

        let node = test_node("c1", "n1");
        store.put_node(&node).unwrap();

        let loaded = store.get_node("c1", "n1").unwrap().unwrap();
        assert_eq!(loaded, node);

        assert!(store.delete_node("c1", "n1").unwrap());
        assert!(store.get_node("c1", "n1").unwrap().is_none());
        assert!(!store.delete_node("c1", "n1").unwrap());
    }

    #[test]
    fn put_node_overwrites() {
        let store = StateStore::open_in_memory().unwrap();

        let mut node = test_node("c1", "n1");
        store.put_node(&node).unwrap();

        node.health = HealthState::Unhealthy;
        node.status = NodeStatus::Recovering;
        store.put_node(&node).unwrap();

        let loaded = store.get_node("c1", "n1").unwrap().unwrap();
        assert_eq!(loaded.health, HealthState::Unhealthy);
        assert_eq!(loaded.status, NodeStatus::Recovering);
    }

    #[test]
    fn list_nodes_scoped_to_cluster() {
        let store = StateStore::open_in_memory().unwrap();

        store.put_node(&test_node("c1", "n1")).unwrap();
        store.put_node(&test_node("c1", "n2")).unwrap();
        store.put_node(&test_node("c2", "n1")).unwrap();

        assert_eq!(store.list_nodes_for_cluster("c1").unwrap().len(), 2);
        assert_eq!(store.list_nodes_for_cluster("c2").unwrap().len(), 1);
        assert!(store.list_nodes_for_cluster("c3").unwrap().is_empty());
    }

    #[test]
    fn get_node_required_errors_when_absent() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.get_node_required("c1", "ghost").unwrap_err();
        assert!(matches!(err, StateError::NodeNotFound(k) if k == "c1:ghost"));
    }

    #[test]
    fn recovery_log_scoped_to_node() {
        let store = StateStore::open_in_memory().unwrap();

        store.put_recovery(&test_recovery("n1", 100, "REBOOT")).unwrap();
        store.put_recovery(&test_recovery("n1", 200, "RECREATE")).unwrap();
        store.put_recovery(&test_recovery("n2", 150, "REBOOT")).unwrap();

        let n1 = store.list_recoveries_for_node("n1").unwrap();
        assert_eq!(n1.len(), 2);
        assert!(n1.iter().all(|r| r.node_id == "n1"));

        assert_eq!(store.list_recoveries_for_node("n2").unwrap().len(), 1);
    }

    #[test]
    fn last_recovery_finished_at_picks_latest() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.last_recovery_finished_at("n1").unwrap(), None);

        store.put_recovery(&test_recovery("n1", 100, "REBOOT")).unwrap();
        store.put_recovery(&test_recovery("n1", 200, "RECREATE")).unwrap();

        assert_eq!(store.last_recovery_finished_at("n1").unwrap(), Some(205));
    }

    #[test]
    fn recovery_log_order_spans_timestamp_widths() {
        let store = StateStore::open_in_memory().unwrap();

        // Unpadded keys would sort "1000" before "999".
        store.put_recovery(&test_recovery("n1", 999, "REBOOT")).unwrap();
        store.put_recovery(&test_recovery("n1", 1000, "RECREATE")).unwrap();

        let log = store.list_recoveries_for_node("n1").unwrap();
        assert_eq!(log[0].started_at, 999);
        assert_eq!(log[1].started_at, 1000);
    }

    #[test]
    fn same_second_actions_do_not_collide() {
        let store = StateStore::open_in_memory().unwrap();

        let mut reboot = test_recovery("n1", 100, "REBOOT");
        reboot.outcome = RecoveryOutcome::Failed;
        store.put_recovery(&reboot).unwrap();
        store.put_recovery(&test_recovery("n1", 100, "RECREATE")).unwrap();

        assert_eq!(store.list_recoveries_for_node("n1").unwrap().len(), 2);
    }

    #[test]
    fn persistent_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("curo.redb");

        {
            let store = StateStore::open(&path).unwrap();
            store.put_node(&test_node("c1", "n1")).unwrap();
        }

        let store = StateStore::open(&path).unwrap();
        assert!(store.get_node("c1", "n1").unwrap().is_some());
    }
}
