//! Confirmation Gate
//!
//! Per-session state machine guarding mutating statements:
//!
//! ```text
//! NONE --propose--> PENDING --confirm, age <= ttl--> NONE (confirmed, executes)
//!                   PENDING --confirm, age >  ttl--> NONE (expired, discarded)
//!                   PENDING --propose-----------> PENDING (superseded)
//! NONE --confirm--> NONE (nothing to confirm)
//! ```
//!
//! A confirmation always consumes the entry, whatever happens next. Each
//! confirmation also sweeps entries older than the retention window so
//! abandoned proposals do not pile up; inside that window an unconfirmed
//! session still gets the "expired" answer.

use crate::clock::Clock;
use crate::error::{GatewayError, Result};
use crate::pending::{PendingOperation, PendingStore};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub operation: PendingOperation,
    pub expires_at: DateTime<Utc>,
    pub superseded: Option<PendingOperation>,
}

/// Abandoned entries survive this many TTLs before a sweep removes them.
const RETENTION_FACTOR: i32 = 12;

pub struct ConfirmationGate {
    store: Arc<dyn PendingStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    retention: Duration,
}

impl ConfirmationGate {
    pub fn new(store: Arc<dyn PendingStore>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self {
            store,
            clock,
            ttl,
            retention: ttl.checked_mul(RETENTION_FACTOR).unwrap_or(ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Park `sql` for `session_key`, replacing any earlier proposal.
    pub async fn propose(&self, session_key: &str, sql: &str) -> Result<Proposal> {
        let operation = PendingOperation {
            session_key: session_key.to_string(),
            sql_text: sql.to_string(),
            created_at: self.clock.now(),
        };
        let expires_at = operation
            .created_at
            .checked_add_signed(self.ttl)
            .ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "Confirmation TTL of {}s is out of range",
                    self.ttl.num_seconds()
                ))
            })?;

        let superseded = self.store.propose(operation.clone()).await?;
        if let Some(previous) = &superseded {
            info!(
                "Session {}: superseded pending statement: {}",
                session_key, previous.sql_text
            );
        }
        info!("Session {}: awaiting confirmation for: {}", session_key, sql);

        Ok(Proposal {
            operation,
            expires_at,
            superseded,
        })
    }

    /// Consume the pending operation for `session_key`. Returns it when it
    /// is still within the TTL; otherwise `ExpiredConfirmation` or
    /// `NoPendingOperation`. The entry is gone afterwards in every case.
    pub async fn confirm(&self, session_key: &str) -> Result<PendingOperation> {
        let now = self.clock.now();
        let taken = self.store.take(session_key).await?;
        self.purge_abandoned(now).await;

        let operation = taken.ok_or_else(|| {
            debug!("Session {}: nothing to confirm", session_key);
            GatewayError::NoPendingOperation(session_key.to_string())
        })?;

        let age = now - operation.created_at;
        if age > self.ttl {
            warn!(
                "Session {}: confirmation arrived {}s after proposal, discarding",
                session_key,
                age.num_seconds()
            );
            return Err(GatewayError::ExpiredConfirmation(session_key.to_string()));
        }

        info!("Session {}: confirmed: {}", session_key, operation.sql_text);
        Ok(operation)
    }

    pub async fn pending(&self, session_key: &str) -> Result<Option<PendingOperation>> {
        self.store.peek(session_key).await
    }

    /// Drop entries for sessions that proposed and never came back.
    async fn purge_abandoned(&self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.retention) else {
            return;
        };
        match self.store.purge_created_before(cutoff).await {
            Ok(0) => {}
            Ok(n) => debug!("Purged {} abandoned pending operations", n),
            Err(e) => warn!("Failed to purge abandoned pending operations: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::pending::InMemoryPendingStore;

    fn gate_with_ttl(ttl: Duration) -> (ConfirmationGate, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let gate = ConfirmationGate::new(Arc::new(InMemoryPendingStore::new()), clock.clone(), ttl);
        (gate, clock)
    }

    fn gate() -> (ConfirmationGate, Arc<ManualClock>) {
        gate_with_ttl(Duration::minutes(5))
    }

    #[tokio::test]
    async fn test_confirm_within_ttl() {
        let (gate, clock) = gate();
        gate.propose("s", "DELETE FROM t").await.unwrap();
        clock.advance(Duration::minutes(5) - Duration::milliseconds(1));

        let op = gate.confirm("s").await.unwrap();
        assert_eq!(op.sql_text, "DELETE FROM t");
        assert!(gate.pending("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_exactly_at_ttl_succeeds() {
        let (gate, clock) = gate();
        gate.propose("s", "DELETE FROM t").await.unwrap();
        clock.advance(Duration::minutes(5));
        assert!(gate.confirm("s").await.is_ok());
    }

    #[tokio::test]
    async fn test_confirm_after_ttl_expires_and_deletes() {
        let (gate, clock) = gate();
        gate.propose("s", "DELETE FROM t").await.unwrap();
        clock.advance(Duration::minutes(5) + Duration::milliseconds(1));

        let err = gate.confirm("s").await.unwrap_err();
        assert!(matches!(err, GatewayError::ExpiredConfirmation(_)));
        let err = gate.confirm("s").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoPendingOperation(_)));
    }

    #[tokio::test]
    async fn test_propose_reports_superseded() {
        let (gate, _clock) = gate();
        let first = gate.propose("s", "DELETE FROM a").await.unwrap();
        assert!(first.superseded.is_none());
        assert_eq!(first.expires_at, first.operation.created_at + Duration::minutes(5));

        let second = gate.propose("s", "DELETE FROM b").await.unwrap();
        assert_eq!(second.superseded.unwrap().sql_text, "DELETE FROM a");
        assert_eq!(gate.confirm("s").await.unwrap().sql_text, "DELETE FROM b");
    }

    #[tokio::test]
    async fn test_confirm_purges_other_abandoned_sessions() {
        let (gate, clock) = gate();
        gate.propose("abandoned", "DELETE FROM a").await.unwrap();
        gate.propose("recent", "DELETE FROM c").await.unwrap();
        clock.advance(Duration::minutes(61));
        gate.propose("recent", "DELETE FROM c").await.unwrap();
        gate.propose("active", "DELETE FROM b").await.unwrap();

        assert!(gate.confirm("active").await.is_ok());
        assert!(gate.pending("abandoned").await.unwrap().is_none());
        assert!(gate.pending("recent").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_an_error_not_a_panic() {
        let (gate, _clock) = gate_with_ttl(Duration::seconds(10_000_000_000_000));
        let err = gate.propose("s", "DELETE FROM t").await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert!(gate.pending("s").await.unwrap().is_none());

        let err = gate.confirm("s").await.unwrap_err();
        assert!(matches!(err, GatewayError::NoPendingOperation(_)));
    }
}
