//! Local Metadata Store
//!
//! Persistent storage for partition-map snapshots held by this server,
//! backed by SQLite. Tracks the head snapshot per table (with its config
//! version, so stale pushes can be recognized) and keeps a best-effort
//! cache of which remote servers are known to hold which transaction ids.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::metadata::snapshot::{MetadataSnapshot, TransactionId};

/// Outcome of applying a snapshot to the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyResult {
    /// The snapshot was stored and is now the table's head
    Applied,
    /// The store already holds this id, or a newer config version
    AlreadyCurrent,
}

/// SQLite-backed metadata store
pub struct MetadataStore {
    /// Database connection
    conn: Mutex<Connection>,
    /// Server name of the local node
    server_name: String,
}

impl MetadataStore {
    /// Create or open the metadata store database
    pub fn new(data_dir: PathBuf, server_name: String) -> Result<Self> {
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("metadata.db");
        let conn = Connection::open(&db_path)?;

        // Initialize schema
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                namespace TEXT NOT NULL,
                table_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                created_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, table_id, transaction_id)
            );

            CREATE TABLE IF NOT EXISTS table_heads (
                namespace TEXT NOT NULL,
                table_id TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, table_id)
            );

            CREATE TABLE IF NOT EXISTS server_heads (
                namespace TEXT NOT NULL,
                table_id TEXT NOT NULL,
                server TEXT NOT NULL,
                transaction_id TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (namespace, table_id, server)
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            server_name,
        })
    }

    /// Apply a snapshot for a table at the given config version
    ///
    /// The head only advances when `version` is newer than the stored head,
    /// so a stale snapshot racing in after a newer one is a no-op. The
    /// snapshot payload itself is kept for every applied transaction id.
    pub async fn apply_snapshot(
        &self,
        namespace: &str,
        table_id: &str,
        version: u64,
        snapshot: &MetadataSnapshot,
    ) -> Result<ApplyResult> {
        let txid = snapshot.transaction_id().to_string();
        let payload = bincode::serialize(snapshot)?;

        let conn = self.conn.lock().await;

        let head: Option<(String, i64)> = conn
            .query_row(
                "SELECT transaction_id, version FROM table_heads
                 WHERE namespace = ?1 AND table_id = ?2",
                params![namespace, table_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((head_txid, head_version)) = head {
            if head_txid == txid || head_version >= version as i64 {
                return Ok(ApplyResult::AlreadyCurrent);
            }
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO snapshots (namespace, table_id, transaction_id, payload)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![namespace, table_id, txid, payload],
        )?;

        conn.execute(
            r#"
            INSERT INTO table_heads (namespace, table_id, transaction_id, version)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, table_id) DO UPDATE SET
                transaction_id = ?3,
                version = ?4,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![namespace, table_id, txid, version as i64],
        )?;

        Ok(ApplyResult::Applied)
    }

    /// Get the head transaction id and config version for a table
    pub async fn head(
        &self,
        namespace: &str,
        table_id: &str,
    ) -> Result<Option<(TransactionId, u64)>> {
        let conn = self.conn.lock().await;
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT transaction_id, version FROM table_heads
                 WHERE namespace = ?1 AND table_id = ?2",
                params![namespace, table_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match row {
            Some((txid, version)) => Ok(Some((TransactionId::parse(&txid)?, version as u64))),
            None => Ok(None),
        }
    }

    /// Check whether a snapshot with this transaction id is stored locally
    pub async fn has_snapshot(
        &self,
        namespace: &str,
        table_id: &str,
        transaction_id: &TransactionId,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM snapshots
             WHERE namespace = ?1 AND table_id = ?2 AND transaction_id = ?3",
            params![namespace, table_id, transaction_id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Load a stored snapshot by transaction id
    pub async fn get_snapshot(
        &self,
        namespace: &str,
        table_id: &str,
        transaction_id: &TransactionId,
    ) -> Result<Option<MetadataSnapshot>> {
        let conn = self.conn.lock().await;
        let payload: Option<Vec<u8>> = conn
            .query_row(
                "SELECT payload FROM snapshots
                 WHERE namespace = ?1 AND table_id = ?2 AND transaction_id = ?3",
                params![namespace, table_id, transaction_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match payload {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Record that a remote server confirmed holding a transaction id
    pub async fn record_server_head(
        &self,
        namespace: &str,
        table_id: &str,
        server: &str,
        transaction_id: &TransactionId,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO server_heads (namespace, table_id, server, transaction_id)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(namespace, table_id, server) DO UPDATE SET
                transaction_id = ?4,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![namespace, table_id, server, transaction_id.to_string()],
        )?;
        Ok(())
    }

    /// Best-effort check whether a remote server is known to hold a
    /// transaction id
    ///
    /// Used only to prune redundant pushes. A false negative costs one
    /// idempotent push; any store error therefore reports `false` rather
    /// than surfacing.
    pub async fn server_has_transaction(
        &self,
        namespace: &str,
        table_id: &str,
        server: &str,
        transaction_id: &TransactionId,
    ) -> bool {
        let conn = self.conn.lock().await;
        let result: std::result::Result<String, _> = conn.query_row(
            "SELECT transaction_id FROM server_heads
             WHERE namespace = ?1 AND table_id = ?2 AND server = ?3",
            params![namespace, table_id, server],
            |row| row.get(0),
        );

        match result {
            Ok(known) => known == transaction_id.to_string(),
            Err(_) => false,
        }
    }

    /// Number of tables with a head snapshot in this store
    pub async fn tables_held(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM table_heads", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Get the local server name
    pub fn server_name(&self) -> &str {
        &self.server_name
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Store(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::snapshot::PartitionEntry;
    use tempfile::tempdir;

    fn snapshot(servers: Vec<String>) -> MetadataSnapshot {
        MetadataSnapshot::compute(vec![PartitionEntry::stable("", 1, servers)]).unwrap()
    }

    #[tokio::test]
    async fn test_apply_and_head() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), "node-a".into()).unwrap();

        let s1 = snapshot(vec!["a".into()]);
        let result = store.apply_snapshot("prod", "events", 1, &s1).await.unwrap();
        assert_eq!(result, ApplyResult::Applied);

        let (head_txid, version) = store.head("prod", "events").await.unwrap().unwrap();
        assert_eq!(&head_txid, s1.transaction_id());
        assert_eq!(version, 1);

        // Replay of the same snapshot is a no-op
        let result = store.apply_snapshot("prod", "events", 1, &s1).await.unwrap();
        assert_eq!(result, ApplyResult::AlreadyCurrent);
    }

    #[tokio::test]
    async fn test_stale_version_is_noop() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), "node-a".into()).unwrap();

        let t1 = snapshot(vec!["a".into()]);
        let t2 = snapshot(vec!["a".into(), "b".into()]);

        // T2 lands first
        store.apply_snapshot("prod", "events", 2, &t2).await.unwrap();

        // T1 racing in afterwards must not displace the head
        let result = store.apply_snapshot("prod", "events", 1, &t1).await.unwrap();
        assert_eq!(result, ApplyResult::AlreadyCurrent);

        let (head_txid, _) = store.head("prod", "events").await.unwrap().unwrap();
        assert_eq!(&head_txid, t2.transaction_id());
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), "node-a".into()).unwrap();

        let s = snapshot(vec!["a".into(), "b".into()]);
        store.apply_snapshot("prod", "events", 1, &s).await.unwrap();

        assert!(store
            .has_snapshot("prod", "events", s.transaction_id())
            .await
            .unwrap());

        let loaded = store
            .get_snapshot("prod", "events", s.transaction_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded, s);
        assert_eq!(loaded.partition_map(), s.partition_map());

        let other = snapshot(vec!["z".into()]);
        assert!(!store
            .has_snapshot("prod", "events", other.transaction_id())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_server_heads_best_effort() {
        let dir = tempdir().unwrap();
        let store = MetadataStore::new(dir.path().to_path_buf(), "node-a".into()).unwrap();

        let s = snapshot(vec!["a".into()]);

        // Unknown server: false negative, never an error
        assert!(
            !store
                .server_has_transaction("prod", "events", "node-b", s.transaction_id())
                .await
        );

        store
            .record_server_head("prod", "events", "node-b", s.transaction_id())
            .await
            .unwrap();
        assert!(
            store
                .server_has_transaction("prod", "events", "node-b", s.transaction_id())
                .await
        );

        // A different id is not satisfied by the cached head
        let other = snapshot(vec!["q".into()]);
        assert!(
            !store
                .server_has_transaction("prod", "events", "node-b", other.transaction_id())
                .await
        );
    }
}
