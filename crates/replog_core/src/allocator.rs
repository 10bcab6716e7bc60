//! OpTime slot allocation.

use crate::context::ReplicationLogContext;
use crate::error::{CoreError, CoreResult};
use crate::types::{OpTime, OplogSlot, Timestamp};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Current entry format version, stored in every entry as `v`.
pub const OPLOG_VERSION: i32 = 2;

/// Hash of the (nonexistent) predecessor of the first entry.
pub const GENESIS_HASH: i64 = 0;

/// Computes the chain hash of a slot.
///
/// The first eight bytes, little endian, of
/// `SHA-256(prev_hash ‖ term ‖ packed timestamp ‖ version)`, each field
/// little endian.
#[must_use]
pub fn chain_hash(prev_hash: i64, op_time: OpTime, version: i32) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.to_le_bytes());
    hasher.update(op_time.term().to_le_bytes());
    hasher.update(op_time.timestamp().as_u64().to_le_bytes());
    hasher.update(version.to_le_bytes());
    let digest = hasher.finalize();

    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    i64::from_le_bytes(head)
}

/// Issues unique, strictly increasing slots.
///
/// The allocator is the only thing that advances the logical clock for
/// logging. Allocation holds the context lock for a few arithmetic steps
/// and a hash per slot; it never does I/O.
#[derive(Debug, Clone)]
pub struct SlotAllocator {
    ctx: Arc<ReplicationLogContext>,
}

impl SlotAllocator {
    /// Creates an allocator over a shared context.
    #[must_use]
    pub fn new(ctx: Arc<ReplicationLogContext>) -> Self {
        Self { ctx }
    }

    /// Allocates `count` consecutive slots.
    ///
    /// The slots are registered with the visibility tracker before the lock
    /// is released, so reservation order is optime order.
    ///
    /// # Errors
    ///
    /// `Validation` if `count` is zero or too large; `Allocation` if the
    /// context is not initialized or the clock cannot produce a value.
    pub fn allocate(&self, count: usize) -> CoreResult<Vec<OplogSlot>> {
        if count == 0 {
            return Err(CoreError::validation("cannot allocate zero slots"));
        }
        let ticks = u32::try_from(count)
            .map_err(|_| CoreError::validation(format!("cannot allocate {count} slots at once")))?;

        let slots = self.ctx.with_slot_state(|state, wall| {
            let first = state.clock.reserve(wall, ticks)?;
            let mut prev_hash = state.last_hash;
            let slots: Vec<OplogSlot> = (0..ticks)
                .map(|i| {
                    let ts = Timestamp::new(first.secs(), first.inc() + i);
                    let op_time = OpTime::new(ts, state.term);
                    prev_hash = chain_hash(prev_hash, op_time, OPLOG_VERSION);
                    OplogSlot::new(op_time, prev_hash)
                })
                .collect();

            state.last_hash = prev_hash;
            state.last_op_time = slots.last().map(|s| s.op_time);
            self.ctx.visibility().reserve(&slots);
            Ok(slots)
        })?;

        tracing::debug!(
            count,
            first = %slots[0].op_time,
            "allocated oplog slots"
        );
        Ok(slots)
    }

    /// Allocates a single slot.
    ///
    /// # Errors
    ///
    /// See [`SlotAllocator::allocate`].
    pub fn allocate_one(&self) -> CoreResult<OplogSlot> {
        let mut slots = self.allocate(1)?;
        slots
            .pop()
            .ok_or_else(|| CoreError::allocation("allocator returned no slot"))
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ReplicationLogContext> {
        &self.ctx
    }
}
