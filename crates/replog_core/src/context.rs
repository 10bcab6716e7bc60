//! Process-wide replication log state.
//!
//! The context owns everything slot allocation needs to agree on: the
//! logical clock, the current term and the hash of the last allocated slot.
//! It is created once per node and shared by `Arc` with the allocator,
//! the writer and anything that needs the visibility point.
//!
//! # Lifecycle
//!
//! A fresh context refuses to allocate. It becomes usable after
//! [`ReplicationLogContext::initialize`] (or `initialize_from_store` on
//! startup) and stops again after [`ReplicationLogContext::teardown`].

use crate::allocator::GENESIS_HASH;
use crate::clock::{LogicalClock, SystemWallClock, WallClock};
use crate::config::ReplicationConfig;
use crate::entry::OplogEntry;
use crate::error::{CoreError, CoreResult};
use crate::store::OplogStore;
use crate::types::{Namespace, OpTime, OplogSlot, Timestamp};
use crate::visibility::VisibilityTracker;
use parking_lot::Mutex;
use std::sync::Arc;

/// Allocation state guarded by the context lock.
#[derive(Debug)]
pub(crate) struct SlotState {
    pub(crate) clock: LogicalClock,
    pub(crate) term: i64,
    pub(crate) last_hash: i64,
    pub(crate) last_op_time: Option<OpTime>,
}

/// Shared clock, term and chain state for one node.
pub struct ReplicationLogContext {
    config: ReplicationConfig,
    wall_clock: Arc<dyn WallClock>,
    slots: Mutex<Option<SlotState>>,
    visibility: VisibilityTracker,
}

impl ReplicationLogContext {
    /// Creates an uninitialized context reading the system clock.
    #[must_use]
    pub fn new(config: ReplicationConfig) -> Self {
        Self::with_wall_clock(config, Arc::new(SystemWallClock))
    }

    /// Creates an uninitialized context reading `wall_clock`.
    #[must_use]
    pub fn with_wall_clock(config: ReplicationConfig, wall_clock: Arc<dyn WallClock>) -> Self {
        Self {
            config,
            wall_clock,
            slots: Mutex::new(None),
            visibility: VisibilityTracker::new(),
        }
    }

    /// Makes the context ready to allocate in `term`.
    ///
    /// `last` is the newest slot already in the log, if any. The clock
    /// resumes after it, its hash seeds the chain and everything up to it
    /// is considered visible. A `term` older than `last`'s is raised to it,
    /// since optimes order by term first.
    pub fn initialize(&self, term: i64, last: Option<OplogSlot>) {
        let term = match last {
            Some(slot) if slot.op_time.term() > term => {
                tracing::warn!(
                    requested = term,
                    stored = slot.op_time.term(),
                    "requested term is older than the log; using the stored term"
                );
                slot.op_time.term()
            }
            _ => term,
        };
        let last_ts = last.map_or_else(Timestamp::default, |s| s.op_time.timestamp());
        let state = SlotState {
            clock: LogicalClock::starting_after(last_ts),
            term,
            last_hash: last.map_or(GENESIS_HASH, |s| s.hash),
            last_op_time: last.map(|s| s.op_time),
        };
        *self.slots.lock() = Some(state);
        self.visibility.reset(last.map(|s| s.op_time));
        tracing::info!(
            term,
            last = ?last.map(|s| s.op_time),
            mode = ?self.config.mode,
            "replication log context initialized"
        );
    }

    /// Initializes from the newest slot in `store`, entry or hole.
    ///
    /// The chain resumes from that slot's hash. The term never moves
    /// backwards (see [`ReplicationLogContext::initialize`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the last entry cannot be read or decoded.
    pub fn initialize_from_store(
        &self,
        store: &dyn OplogStore,
        term: i64,
    ) -> CoreResult<Option<OpTime>> {
        let last_entry = match store.last_entry()? {
            Some(bytes) => Some(OplogEntry::decode(&bytes)?.slot),
            None => None,
        };
        let last = match (last_entry, store.last_hole()?) {
            (Some(entry), Some(hole)) if hole.op_time > entry.op_time => Some(hole),
            (None, hole) => hole,
            (entry, _) => entry,
        };
        self.initialize(term, last);
        Ok(last.map(|s| s.op_time))
    }

    /// Stops allocation. In-flight writers may still finish their slots.
    pub fn teardown(&self) {
        if self.slots.lock().take().is_some() {
            tracing::info!("replication log context torn down");
        }
    }

    /// Returns true between `initialize` and `teardown`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.slots.lock().is_some()
    }

    /// Moves to a new term, as on stepping up to primary.
    ///
    /// # Errors
    ///
    /// Fails if the context is not initialized or `term` is older than the
    /// current term.
    pub fn set_term(&self, term: i64) -> CoreResult<()> {
        self.with_slot_state(|state, _| {
            if term < state.term {
                return Err(CoreError::validation(format!(
                    "term {term} is older than current term {}",
                    state.term
                )));
            }
            state.term = term;
            Ok(())
        })
    }

    /// Moves the logical clock forward to at least `ts`. Never moves it back.
    ///
    /// Returns true if the clock advanced.
    ///
    /// # Errors
    ///
    /// Fails if the context is not initialized.
    pub fn set_new_timestamp(&self, ts: Timestamp) -> CoreResult<bool> {
        self.with_slot_state(|state, _| {
            let moved = state.clock.advance_to(ts);
            if moved {
                tracing::debug!(%ts, "logical clock advanced");
            }
            Ok(moved)
        })
    }

    /// Returns the current term, if initialized.
    #[must_use]
    pub fn term(&self) -> Option<i64> {
        self.slots.lock().as_ref().map(|s| s.term)
    }

    /// Returns the most recently allocated optime.
    #[must_use]
    pub fn last_op_time(&self) -> Option<OpTime> {
        self.slots.lock().as_ref().and_then(|s| s.last_op_time)
    }

    /// Returns the hash of the most recently allocated slot.
    #[must_use]
    pub fn last_hash(&self) -> Option<i64> {
        self.slots.lock().as_ref().map(|s| s.last_hash)
    }

    /// Returns the latest timestamp issued by the logical clock.
    #[must_use]
    pub fn last_timestamp(&self) -> Option<Timestamp> {
        self.slots.lock().as_ref().map(|s| s.clock.last())
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Returns true if writes are logged.
    #[must_use]
    pub fn is_logging_enabled(&self) -> bool {
        self.config.is_logging_enabled()
    }

    /// Returns the oplog namespace for the configured mode.
    #[must_use]
    pub fn oplog_namespace(&self) -> Option<Namespace> {
        self.config.mode.oplog_namespace()
    }

    /// Returns the visibility tracker.
    #[must_use]
    pub fn visibility(&self) -> &VisibilityTracker {
        &self.visibility
    }

    /// Runs `f` inside the allocation critical section.
    pub(crate) fn with_slot_state<R>(
        &self,
        f: impl FnOnce(&mut SlotState, &dyn WallClock) -> CoreResult<R>,
    ) -> CoreResult<R> {
        let mut guard = self.slots.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| CoreError::allocation("replication log context is not initialized"))?;
        f(state, self.wall_clock.as_ref())
    }
}

impl std::fmt::Debug for ReplicationLogContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationLogContext")
            .field("config", &self.config)
            .field("slots", &*self.slots.lock())
            .field("visibility", &self.visibility)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualWallClock;

    fn context() -> ReplicationLogContext {
        ReplicationLogContext::with_wall_clock(
            ReplicationConfig::default(),
            Arc::new(ManualWallClock::new(100)),
        )
    }

    #[test]
    fn lifecycle() {
        let ctx = context();
        assert!(!ctx.is_initialized());
        assert!(ctx.set_new_timestamp(Timestamp::new(1, 1)).is_err());

        ctx.initialize(3, None);
        assert!(ctx.is_initialized());
        assert_eq!(ctx.term(), Some(3));
        assert_eq!(ctx.last_hash(), Some(0));
        assert_eq!(ctx.last_op_time(), None);

        ctx.teardown();
        assert!(!ctx.is_initialized());
        assert_eq!(ctx.term(), None);
    }

    #[test]
    fn initialize_seeds_from_last_slot() {
        let ctx = context();
        let last = OplogSlot::new(OpTime::new(Timestamp::new(90, 4), 2), 77);
        ctx.initialize(2, Some(last));

        assert_eq!(ctx.last_hash(), Some(77));
        assert_eq!(ctx.last_timestamp(), Some(Timestamp::new(90, 4)));
        assert!(ctx.visibility().is_visible(last.op_time));
    }

    #[test]
    fn stale_term_is_raised_to_the_stored_term() {
        let ctx = Arc::new(context());
        let last = OplogSlot::new(OpTime::new(Timestamp::new(90, 1), 5), 11);
        ctx.initialize(2, Some(last));
        assert_eq!(ctx.term(), Some(5));

        let next = crate::allocator::SlotAllocator::new(Arc::clone(&ctx))
            .allocate_one()
            .unwrap();
        assert!(next.op_time > last.op_time);
        assert_eq!(next.op_time.term(), 5);
    }

    #[test]
    fn term_never_moves_backwards() {
        let ctx = context();
        ctx.initialize(5, None);
        assert!(ctx.set_term(4).is_err());
        ctx.set_term(6).unwrap();
        assert_eq!(ctx.term(), Some(6));
    }

    #[test]
    fn set_new_timestamp_only_moves_forward() {
        let ctx = context();
        ctx.initialize(1, None);
        assert!(ctx.set_new_timestamp(Timestamp::new(500, 2)).unwrap());
        assert!(!ctx.set_new_timestamp(Timestamp::new(400, 9)).unwrap());
        assert_eq!(ctx.last_timestamp(), Some(Timestamp::new(500, 2)));
    }
}
