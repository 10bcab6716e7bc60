//! Ordered visibility for concurrently written log entries.
//!
//! Slots are registered here at allocation time, in optime order. Writers
//! finish them in any order, but the visibility point only moves past a
//! slot once every earlier slot is written or aborted. Readers never see an
//! entry while an earlier one is still in flight.

use crate::error::{CoreError, CoreResult};
use crate::types::{OpTime, OplogSlot};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotStatus {
    Reserved,
    Written,
    Aborted,
}

#[derive(Debug, Default)]
struct State {
    pending: BTreeMap<OpTime, SlotStatus>,
    visible: Option<OpTime>,
}

impl State {
    /// Pops finished slots off the front. Returns true if the point moved.
    fn settle(&mut self) -> bool {
        let mut moved = false;
        while let Some(entry) = self.pending.first_entry() {
            if *entry.get() == SlotStatus::Reserved {
                break;
            }
            let (op_time, _) = entry.remove_entry();
            self.visible = Some(op_time);
            moved = true;
        }
        moved
    }

    fn finish(&mut self, op_times: &[OpTime], status: SlotStatus) -> usize {
        let mut finished = 0;
        for op_time in op_times {
            match self.pending.get_mut(op_time) {
                Some(slot) if *slot == SlotStatus::Reserved => {
                    *slot = status;
                    finished += 1;
                }
                Some(_) => {
                    tracing::warn!(%op_time, "slot finished twice");
                }
                None => {
                    tracing::warn!(%op_time, "finishing a slot that was never reserved");
                }
            }
        }
        finished
    }
}

/// Tracks in-flight slots and publishes the visibility point.
#[derive(Debug, Default)]
pub struct VisibilityTracker {
    state: Mutex<State>,
    advanced: Condvar,
}

impl VisibilityTracker {
    /// Creates a tracker with nothing visible.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets all in-flight slots and sets the visibility point.
    pub(crate) fn reset(&self, visible: Option<OpTime>) {
        let mut state = self.state.lock();
        state.pending.clear();
        state.visible = visible;
        drop(state);
        self.advanced.notify_all();
    }

    /// Registers newly allocated slots. Called inside the allocation
    /// critical section so registration order equals optime order.
    pub(crate) fn reserve(&self, slots: &[OplogSlot]) {
        let mut state = self.state.lock();
        for slot in slots {
            state.pending.insert(slot.op_time, SlotStatus::Reserved);
        }
    }

    /// Returns true if every optime is reserved and not yet finished.
    pub(crate) fn all_reserved(&self, op_times: &[OpTime]) -> bool {
        let state = self.state.lock();
        op_times
            .iter()
            .all(|t| state.pending.get(t) == Some(&SlotStatus::Reserved))
    }

    /// Marks slots as durably written.
    pub(crate) fn mark_written(&self, op_times: &[OpTime]) {
        self.finish(op_times, SlotStatus::Written);
    }

    /// Marks slots as abandoned so they stop holding back readers.
    pub(crate) fn mark_aborted(&self, op_times: &[OpTime]) {
        self.finish(op_times, SlotStatus::Aborted);
    }

    fn finish(&self, op_times: &[OpTime], status: SlotStatus) {
        let mut state = self.state.lock();
        if state.finish(op_times, status) > 0 && state.settle() {
            drop(state);
            self.advanced.notify_all();
        }
    }

    /// Returns the highest optime through which the log is visible.
    #[must_use]
    pub fn visible_point(&self) -> Option<OpTime> {
        self.state.lock().visible
    }

    /// Returns true if `op_time` is at or below the visibility point.
    #[must_use]
    pub fn is_visible(&self, op_time: OpTime) -> bool {
        self.visible_point().is_some_and(|v| v >= op_time)
    }

    /// Returns the number of reserved-but-unpublished slots.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns the oldest slot still holding back the visibility point.
    #[must_use]
    pub fn oldest_pending(&self) -> Option<OpTime> {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .find(|(_, status)| **status == SlotStatus::Reserved)
            .map(|(op_time, _)| *op_time)
    }

    /// Blocks until `op_time` is visible.
    pub fn wait_until_visible(&self, op_time: OpTime) {
        let mut state = self.state.lock();
        while !state.visible.is_some_and(|v| v >= op_time) {
            self.advanced.wait(&mut state);
        }
    }

    /// Blocks until `op_time` is visible or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `VisibilityStall` if the timeout expires first.
    pub fn wait_until_visible_for(&self, op_time: OpTime, timeout: Duration) -> CoreResult<()> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.visible.is_some_and(|v| v >= op_time) {
            if self.advanced.wait_until(&mut state, deadline).timed_out() {
                if state.visible.is_some_and(|v| v >= op_time) {
                    break;
                }
                return Err(CoreError::VisibilityStall {
                    waiting_for: op_time,
                    visible: state.visible,
                });
            }
        }
        Ok(())
    }
}
