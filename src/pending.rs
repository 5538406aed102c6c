//! Pending operation store
//!
//! Holds at most one mutating statement per session while it waits for
//! confirmation. Stores must make `propose` and `take` atomic per session
//! key: a proposal replaces whatever was there, and a take removes and
//! returns the entry in one step, so a confirmation can never observe a
//! half-replaced proposal.
//!
//! Two backends:
//! - `InMemoryPendingStore`: sharded concurrent map, lost on restart.
//! - `SqlitePendingStore`: one row per session, survives restarts and can
//!   be shared by several gateway processes on the same host.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    pub session_key: String,
    pub sql_text: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PendingStore: Send + Sync {
    /// Store `op`, returning the proposal it superseded, if any.
    async fn propose(&self, op: PendingOperation) -> Result<Option<PendingOperation>>;

    /// Remove and return the pending operation for `session_key`.
    async fn take(&self, session_key: &str) -> Result<Option<PendingOperation>>;

    /// Look without consuming.
    async fn peek(&self, session_key: &str) -> Result<Option<PendingOperation>>;

    /// Delete every entry created before `cutoff`. Returns how many went.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;

    async fn len(&self) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryPendingStore {
    entries: DashMap<String, PendingOperation>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingStore for InMemoryPendingStore {
    async fn propose(&self, op: PendingOperation) -> Result<Option<PendingOperation>> {
        Ok(self.entries.insert(op.session_key.clone(), op))
    }

    async fn take(&self, session_key: &str) -> Result<Option<PendingOperation>> {
        Ok(self.entries.remove(session_key).map(|(_, op)| op))
    }

    async fn peek(&self, session_key: &str) -> Result<Option<PendingOperation>> {
        Ok(self.entries.get(session_key).map(|entry| entry.value().clone()))
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let before = self.entries.len();
        self.entries.retain(|_, op| op.created_at >= cutoff);
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.entries.len())
    }
}

pub struct SqlitePendingStore {
    db: Mutex<Connection>,
}

impl SqlitePendingStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened pending store at {}", path.as_ref().display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pending_operations (
                session_key TEXT PRIMARY KEY,
                sql_text TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_pending_created_at
                ON pending_operations(created_at);
            "#,
        )?;
        Ok(Self { db: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db
            .lock()
            .map_err(|_| GatewayError::Store("Pending store lock poisoned".to_string()))
    }
}

fn to_nanos(ts: DateTime<Utc>) -> Result<i64> {
    ts.timestamp_nanos_opt()
        .ok_or_else(|| GatewayError::Store(format!("Timestamp out of range: {}", ts)))
}

fn from_nanos(nanos: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(
        nanos.div_euclid(1_000_000_000),
        nanos.rem_euclid(1_000_000_000) as u32,
    )
    .ok_or_else(|| GatewayError::Store(format!("Invalid stored timestamp: {}", nanos)))
}

fn row_to_op(session_key: &str, sql_text: String, created_at: i64) -> Result<PendingOperation> {
    Ok(PendingOperation {
        session_key: session_key.to_string(),
        sql_text,
        created_at: from_nanos(created_at)?,
    })
}

#[async_trait]
impl PendingStore for SqlitePendingStore {
    async fn propose(&self, op: PendingOperation) -> Result<Option<PendingOperation>> {
        let created_at = to_nanos(op.created_at)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let previous: Option<(String, i64)> = tx
            .query_row(
                "SELECT sql_text, created_at FROM pending_operations WHERE session_key = ?1",
                params![op.session_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        tx.execute(
            "INSERT OR REPLACE INTO pending_operations (session_key, sql_text, created_at) \
             VALUES (?1, ?2, ?3)",
            params![op.session_key, op.sql_text, created_at],
        )?;
        tx.commit()?;

        previous
            .map(|(sql_text, ts)| row_to_op(&op.session_key, sql_text, ts))
            .transpose()
    }

    async fn take(&self, session_key: &str) -> Result<Option<PendingOperation>> {
        let conn = self.conn()?;
        let taken: Option<(String, i64)> = conn
            .query_row(
                "DELETE FROM pending_operations WHERE session_key = ?1 \
                 RETURNING sql_text, created_at",
                params![session_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        taken
            .map(|(sql_text, ts)| row_to_op(session_key, sql_text, ts))
            .transpose()
    }

    async fn peek(&self, session_key: &str) -> Result<Option<PendingOperation>> {
        let conn = self.conn()?;
        let found: Option<(String, i64)> = conn
            .query_row(
                "SELECT sql_text, created_at FROM pending_operations WHERE session_key = ?1",
                params![session_key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        found
            .map(|(sql_text, ts)| row_to_op(session_key, sql_text, ts))
            .transpose()
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let cutoff = to_nanos(cutoff)?;
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM pending_operations WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM pending_operations", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn op(session: &str, sql: &str, created_at: DateTime<Utc>) -> PendingOperation {
        PendingOperation {
            session_key: session.to_string(),
            sql_text: sql.to_string(),
            created_at,
        }
    }

    fn stores() -> Vec<Box<dyn PendingStore>> {
        vec![
            Box::new(InMemoryPendingStore::new()),
            Box::new(SqlitePendingStore::open_in_memory().unwrap()),
        ]
    }

    #[tokio::test]
    async fn test_propose_supersedes_and_take_consumes() {
        let now = Utc::now();
        for store in stores() {
            assert!(store.propose(op("s1", "DELETE FROM a", now)).await.unwrap().is_none());
            let superseded = store
                .propose(op("s1", "DELETE FROM b", now))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(superseded.sql_text, "DELETE FROM a");
            assert_eq!(store.len().await.unwrap(), 1);

            let taken = store.take("s1").await.unwrap().unwrap();
            assert_eq!(taken.sql_text, "DELETE FROM b");
            assert_eq!(taken.created_at, now);
            assert!(store.take("s1").await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let now = Utc::now();
        for store in stores() {
            store.propose(op("a", "UPDATE x SET y = 1", now)).await.unwrap();
            store.propose(op("b", "UPDATE x SET y = 2", now)).await.unwrap();
            assert_eq!(store.take("a").await.unwrap().unwrap().sql_text, "UPDATE x SET y = 1");
            assert!(store.peek("b").await.unwrap().is_some());
        }
    }

    #[tokio::test]
    async fn test_purge_created_before() {
        let now = Utc::now();
        for store in stores() {
            store.propose(op("old", "DELETE FROM t", now - Duration::minutes(10))).await.unwrap();
            store.propose(op("new", "DELETE FROM t", now)).await.unwrap();
            let removed = store
                .purge_created_before(now - Duration::minutes(5))
                .await
                .unwrap();
            assert_eq!(removed, 1);
            assert!(store.peek("old").await.unwrap().is_none());
            assert!(store.peek("new").await.unwrap().is_some());
        }
    }
}
