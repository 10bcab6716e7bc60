//! Apply counters.
//!
//! All counters are atomic and can be read while replay is in progress.

use crate::apply::OpsAppliedObserver;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing replay activity.
#[derive(Debug, Default)]
pub struct ApplyStats {
    /// Non-command entries applied (the observer count).
    ops_applied: AtomicU64,
    /// Command entries applied.
    commands_applied: AtomicU64,
    /// Entries skipped because their session statement was already applied.
    duplicates_skipped: AtomicU64,
    /// Updates of a missing document turned into inserts.
    upserts: AtomicU64,
    /// Outcomes tolerated for idempotency (duplicate insert, missing delete
    /// target, create of an existing collection and so on).
    tolerated: AtomicU64,
    /// Entries that failed to apply.
    failures: AtomicU64,
}

impl ApplyStats {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_command(&self) {
        self.commands_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_duplicate(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_tolerated(&self) {
        self.tolerated.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of non-command entries applied.
    pub fn ops_applied(&self) -> u64 {
        self.ops_applied.load(Ordering::Relaxed)
    }

    /// Returns the number of commands applied.
    pub fn commands_applied(&self) -> u64 {
        self.commands_applied.load(Ordering::Relaxed)
    }

    /// Returns the number of duplicate statements skipped.
    pub fn duplicates_skipped(&self) -> u64 {
        self.duplicates_skipped.load(Ordering::Relaxed)
    }

    /// Returns the number of updates converted to upserts.
    pub fn upserts(&self) -> u64 {
        self.upserts.load(Ordering::Relaxed)
    }

    /// Returns the number of tolerated idempotency outcomes.
    pub fn tolerated(&self) -> u64 {
        self.tolerated.load(Ordering::Relaxed)
    }

    /// Returns the number of failed applies.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Returns a point-in-time copy of every counter.
    #[must_use]
    pub fn snapshot(&self) -> ApplyStatsSnapshot {
        ApplyStatsSnapshot {
            ops_applied: self.ops_applied(),
            commands_applied: self.commands_applied(),
            duplicates_skipped: self.duplicates_skipped(),
            upserts: self.upserts(),
            tolerated: self.tolerated(),
            failures: self.failures(),
        }
    }

    /// Resets every counter to zero.
    pub fn reset(&self) {
        for counter in [
            &self.ops_applied,
            &self.commands_applied,
            &self.duplicates_skipped,
            &self.upserts,
            &self.tolerated,
            &self.failures,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl OpsAppliedObserver for ApplyStats {
    fn on_op_applied(&self) {
        self.ops_applied.fetch_add(1, Ordering::Relaxed);
    }
}

/// A copy of [`ApplyStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStatsSnapshot {
    /// Non-command entries applied.
    pub ops_applied: u64,
    /// Commands applied.
    pub commands_applied: u64,
    /// Duplicate statements skipped.
    pub duplicates_skipped: u64,
    /// Updates converted to upserts.
    pub upserts: u64,
    /// Tolerated idempotency outcomes.
    pub tolerated: u64,
    /// Failed applies.
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observer_counts_ops() {
        let stats = ApplyStats::new();
        let observer: &dyn OpsAppliedObserver = &stats;
        observer.on_op_applied();
        observer.on_op_applied();
        stats.record_command();

        let snap = stats.snapshot();
        assert_eq!(snap.ops_applied, 2);
        assert_eq!(snap.commands_applied, 1);

        stats.reset();
        assert_eq!(stats.snapshot(), ApplyStatsSnapshot::default());
    }
}
