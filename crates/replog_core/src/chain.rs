//! Offline verification of the hash chain.

use crate::allocator::{chain_hash, GENESIS_HASH, OPLOG_VERSION};
use crate::entry::OplogEntry;
use crate::types::{OpTime, OplogSlot};
use std::fmt;

/// Why an entry does not continue the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainBreakKind {
    /// The stored hash differs from the recomputed one.
    HashMismatch {
        /// Recomputed from the predecessor.
        expected: i64,
        /// Stored in the entry.
        actual: i64,
    },
    /// A hole record's stored hash differs from the recomputed one.
    HoleMismatch {
        /// Recomputed from the predecessor.
        expected: i64,
        /// Stored in the hole record.
        actual: i64,
    },
    /// The entry's optime is not greater than its predecessor's.
    OutOfOrder {
        /// The predecessor's optime.
        previous: OpTime,
    },
}

/// One entry that failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak {
    /// Position in the verified entries. A hole break carries the position
    /// of the entry that follows the hole.
    pub index: usize,
    /// The offending entry's or hole's optime.
    pub op_time: OpTime,
    /// What went wrong.
    pub kind: ChainBreakKind,
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ChainBreakKind::HashMismatch { expected, actual } => write!(
                f,
                "entry {} at {}: hash {actual} does not match expected {expected}",
                self.index, self.op_time
            ),
            ChainBreakKind::HoleMismatch { expected, actual } => write!(
                f,
                "hole before entry {} at {}: hash {actual} does not match expected {expected}",
                self.index, self.op_time
            ),
            ChainBreakKind::OutOfOrder { previous } => write!(
                f,
                "entry {} at {}: not after previous entry {previous}",
                self.index, self.op_time
            ),
        }
    }
}

/// Result of [`verify_chain`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of entries examined.
    pub checked: usize,
    /// First optime examined.
    pub first: Option<OpTime>,
    /// Last optime examined.
    pub last: Option<OpTime>,
    /// Number of hole records bridged.
    pub holes: usize,
    /// Every break found, in order.
    pub breaks: Vec<ChainBreak>,
}

impl ChainReport {
    /// True if no breaks were found.
    #[must_use]
    pub fn is_intact(&self) -> bool {
        self.breaks.is_empty()
    }
}

/// Recomputes every hash in `entries` and checks strict optime order.
///
/// `holes` are the hole records of aborted slots in the same range. The
/// chain passes through them in optime order, and their own hashes are
/// checked too.
///
/// `prev_hash` is the hash of the slot preceding the range; pass `None`
/// when the range starts at the beginning of the log, which chains from the
/// genesis hash. Each entry is hashed with its own format version.
/// Verification always continues from the stored hash, so a corrupted hash
/// is reported on its own entry and on the entry that follows it.
#[must_use]
pub fn verify_chain(
    entries: &[OplogEntry],
    holes: &[OplogSlot],
    prev_hash: Option<i64>,
) -> ChainReport {
    let mut report = ChainReport {
        checked: entries.len(),
        first: entries.first().map(OplogEntry::op_time),
        last: entries.last().map(OplogEntry::op_time),
        holes: holes.len(),
        breaks: Vec::new(),
    };

    let mut holes = holes.to_vec();
    holes.sort_by_key(|h| h.op_time);
    let mut holes = holes.into_iter().peekable();

    let mut prev = prev_hash.unwrap_or(GENESIS_HASH);
    let mut prev_op: Option<OpTime> = None;
    for (index, entry) in entries.iter().enumerate() {
        let op_time = entry.op_time();
        while let Some(hole) = holes.next_if(|h| h.op_time < op_time) {
            prev = bridge_hole(&mut report, index, prev, hole);
        }
        if let Some(previous) = prev_op.filter(|p| *p >= op_time) {
            report.breaks.push(ChainBreak {
                index,
                op_time,
                kind: ChainBreakKind::OutOfOrder { previous },
            });
        }

        let expected = chain_hash(prev, op_time, entry.version);
        if expected != entry.hash() {
            report.breaks.push(ChainBreak {
                index,
                op_time,
                kind: ChainBreakKind::HashMismatch {
                    expected,
                    actual: entry.hash(),
                },
            });
        }

        prev = entry.hash();
        prev_op = Some(op_time);
    }
    for hole in holes {
        prev = bridge_hole(&mut report, entries.len(), prev, hole);
    }

    if !report.is_intact() {
        tracing::warn!(
            checked = report.checked,
            breaks = report.breaks.len(),
            "oplog chain verification found breaks"
        );
    }
    report
}

fn bridge_hole(report: &mut ChainReport, index: usize, prev: i64, hole: OplogSlot) -> i64 {
    let expected = chain_hash(prev, hole.op_time, OPLOG_VERSION);
    if expected != hole.hash {
        report.breaks.push(ChainBreak {
            index,
            op_time: hole.op_time,
            kind: ChainBreakKind::HoleMismatch {
                expected,
                actual: hole.hash,
            },
        });
    }
    hole.hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{build_entry, OpDescriptor};
    use crate::types::{OplogSlot, Timestamp};
    use replog_codec::Document;

    fn chained(count: u32) -> Vec<OplogEntry> {
        let mut prev = GENESIS_HASH;
        (1..=count)
            .map(|inc| {
                let op_time = OpTime::new(Timestamp::new(10, inc), 1);
                let hash = chain_hash(prev, op_time, OPLOG_VERSION);
                prev = hash;
                build_entry(
                    OpDescriptor::insert("app.c", Document::new().with("_id", i64::from(inc))),
                    OplogSlot::new(op_time, hash),
                )
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn intact_chain() {
        let entries = chained(4);
        let report = verify_chain(&entries, &[], None);
        assert!(report.is_intact());
        assert_eq!(report.checked, 4);
        assert_eq!(report.first, Some(entries[0].op_time()));
        assert_eq!(report.last, Some(entries[3].op_time()));
    }

    #[test]
    fn suffix_verifies_from_known_predecessor() {
        let entries = chained(4);
        let report = verify_chain(&entries[2..], &[], Some(entries[1].hash()));
        assert!(report.is_intact());

        let report = verify_chain(&entries[2..], &[], None);
        assert_eq!(report.breaks.len(), 1);
    }

    // Drops the entries at `skipped` and returns the hole records standing
    // in for them.
    fn punch_holes(entries: &mut Vec<OplogEntry>, skipped: &[usize]) -> Vec<OplogSlot> {
        let holes = skipped.iter().map(|&i| entries[i].slot).collect();
        let mut index = 0;
        entries.retain(|_| {
            index += 1;
            !skipped.contains(&(index - 1))
        });
        holes
    }

    #[test]
    fn holes_are_bridged() {
        let mut entries = chained(6);
        let holes = punch_holes(&mut entries, &[1, 2, 5]);
        assert_eq!(entries.len(), 3);

        let report = verify_chain(&entries, &holes, None);
        assert!(report.is_intact(), "{:?}", report.breaks);
        assert_eq!(report.holes, 3);

        let report = verify_chain(&entries, &[], None);
        assert_eq!(report.breaks.len(), 1);
        assert_eq!(report.breaks[0].index, 1);
    }

    #[test]
    fn tampered_hole_is_reported() {
        let mut entries = chained(3);
        let mut holes = punch_holes(&mut entries, &[1]);
        holes[0].hash ^= 1;

        let report = verify_chain(&entries, &holes, None);
        assert!(matches!(
            report.breaks[0].kind,
            ChainBreakKind::HoleMismatch { .. }
        ));
        assert_eq!(report.breaks[0].op_time, holes[0].op_time);
        assert!(report.breaks[0].to_string().starts_with("hole before entry 1"));
    }

    #[test]
    fn tampered_hash_breaks_two_links() {
        let mut entries = chained(4);
        entries[1].slot.hash ^= 1;

        let report = verify_chain(&entries, &[], None);
        assert_eq!(report.breaks.len(), 2);
        assert!(report.breaks.iter().all(|b| matches!(b.kind, ChainBreakKind::HashMismatch { .. })));
        assert_eq!(report.breaks[0].index, 1);
        assert_eq!(report.breaks[1].index, 2);
    }

    #[test]
    fn reordering_is_reported() {
        let mut entries = chained(3);
        entries.swap(1, 2);

        let report = verify_chain(&entries, &[], None);
        assert!(report
            .breaks
            .iter()
            .any(|b| b.index == 2 && matches!(b.kind, ChainBreakKind::OutOfOrder { .. })));
        assert!(report.breaks[0].to_string().contains("entry 1"));
    }
}
