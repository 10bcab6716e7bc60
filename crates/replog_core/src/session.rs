//! Session statement bookkeeping consumed by apply.

use crate::types::{OpTime, SessionInfo, StatementId};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

/// Remembers which session statements have already been applied.
pub trait SessionTracker: Send + Sync {
    /// Returns true if the statement was already applied.
    fn has_applied(&self, session: &SessionInfo, statement_id: StatementId) -> bool;

    /// Records the statement as applied at `op_time`.
    fn record_applied(&self, session: &SessionInfo, statement_id: StatementId, op_time: OpTime);
}

#[derive(Debug, Default)]
struct SessionRecord {
    txn_number: i64,
    statements: HashMap<StatementId, OpTime>,
}

/// Reference tracker kept in memory.
///
/// Each session remembers statements of its newest transaction only; a
/// higher transaction number starts a fresh set.
#[derive(Debug, Default)]
pub struct InMemorySessionTracker {
    sessions: RwLock<HashMap<Uuid, SessionRecord>>,
}

impl InMemorySessionTracker {
    /// Creates an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the optime a statement was applied at.
    #[must_use]
    pub fn applied_at(&self, session: &SessionInfo, statement_id: StatementId) -> Option<OpTime> {
        let sessions = self.sessions.read();
        let record = sessions.get(&session.session_id)?;
        if record.txn_number != session.txn_number {
            return None;
        }
        record.statements.get(&statement_id).copied()
    }

    /// Returns the number of sessions seen.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

impl SessionTracker for InMemorySessionTracker {
    fn has_applied(&self, session: &SessionInfo, statement_id: StatementId) -> bool {
        self.applied_at(session, statement_id).is_some()
    }

    fn record_applied(&self, session: &SessionInfo, statement_id: StatementId, op_time: OpTime) {
        let mut sessions = self.sessions.write();
        let record = sessions.entry(session.session_id).or_default();
        if session.txn_number > record.txn_number || record.statements.is_empty() {
            record.txn_number = session.txn_number;
            record.statements.clear();
        } else if session.txn_number < record.txn_number {
            tracing::debug!(
                session = %session.session_id,
                txn = session.txn_number,
                current = record.txn_number,
                "ignoring statement from an older transaction"
            );
            return;
        }
        record.statements.insert(statement_id, op_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timestamp;

    fn op(inc: u32) -> OpTime {
        OpTime::new(Timestamp::new(1, inc), 1)
    }

    #[test]
    fn records_and_reports() {
        let tracker = InMemorySessionTracker::new();
        let session = SessionInfo::new(Uuid::from_u128(1), 5);

        assert!(!tracker.has_applied(&session, StatementId::new(0)));
        tracker.record_applied(&session, StatementId::new(0), op(1));
        assert!(tracker.has_applied(&session, StatementId::new(0)));
        assert!(!tracker.has_applied(&session, StatementId::new(1)));
        assert_eq!(tracker.applied_at(&session, StatementId::new(0)), Some(op(1)));
    }

    #[test]
    fn newer_transaction_resets_statements() {
        let tracker = InMemorySessionTracker::new();
        let txn5 = SessionInfo::new(Uuid::from_u128(1), 5);
        let txn6 = SessionInfo::new(Uuid::from_u128(1), 6);

        tracker.record_applied(&txn5, StatementId::new(0), op(1));
        tracker.record_applied(&txn6, StatementId::new(1), op(2));

        assert!(!tracker.has_applied(&txn5, StatementId::new(0)));
        assert!(!tracker.has_applied(&txn6, StatementId::new(0)));
        assert!(tracker.has_applied(&txn6, StatementId::new(1)));

        tracker.record_applied(&txn5, StatementId::new(3), op(3));
        assert!(!tracker.has_applied(&txn5, StatementId::new(3)));
        assert_eq!(tracker.session_count(), 1);
    }
}
