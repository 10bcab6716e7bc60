//! The log writer.
//!
//! Writes go allocator → builder → store. Each call allocates its slots in
//! one critical section, builds the entries outside it, appends them and
//! then publishes them through the visibility tracker. Concurrent writers
//! may finish out of order; readers only ever see an ordered prefix.

use crate::allocator::SlotAllocator;
use crate::builder::{build_entry, OpDescriptor};
use crate::config::HolePolicy;
use crate::context::ReplicationLogContext;
use crate::entry::{OpKind, OplogEntry};
use crate::error::{CoreError, CoreResult};
use crate::store::OplogStore;
use crate::types::{Namespace, OpTime, OplogSlot, SessionInfo, StatementId};
use replog_codec::Document;
use std::sync::Arc;
use uuid::Uuid;

/// One document of a batch insert.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// Statement id within the caller's session.
    pub statement_id: StatementId,
    /// The inserted document.
    pub document: Document,
    /// A slot reserved earlier, if the caller pre-allocated.
    pub slot: Option<OplogSlot>,
}

impl InsertStatement {
    /// A statement that will be given a fresh slot.
    #[must_use]
    pub fn new(statement_id: StatementId, document: Document) -> Self {
        Self {
            statement_id,
            document,
            slot: None,
        }
    }

    /// A statement using a pre-reserved slot.
    #[must_use]
    pub fn with_slot(statement_id: StatementId, document: Document, slot: OplogSlot) -> Self {
        Self {
            statement_id,
            document,
            slot: Some(slot),
        }
    }
}

/// Appends entries to the oplog in allocation order.
pub struct LogWriter {
    ctx: Arc<ReplicationLogContext>,
    store: Arc<dyn OplogStore>,
    allocator: SlotAllocator,
}

impl LogWriter {
    /// Creates a writer over a shared context and store.
    pub fn new(ctx: Arc<ReplicationLogContext>, store: Arc<dyn OplogStore>) -> Self {
        let allocator = SlotAllocator::new(Arc::clone(&ctx));
        Self {
            ctx,
            store,
            allocator,
        }
    }

    /// Returns the shared context.
    #[must_use]
    pub fn context(&self) -> &Arc<ReplicationLogContext> {
        &self.ctx
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn OplogStore> {
        &self.store
    }

    /// Reserves slots for a caller that builds its own entries.
    ///
    /// Every reserved slot must later be passed to [`LogWriter::append`]
    /// (inside an entry) or [`LogWriter::abort`]; until then it holds back
    /// readers.
    ///
    /// # Errors
    ///
    /// `Validation` if logging is disabled or `count` is zero;
    /// `Allocation` if the context cannot allocate.
    pub fn reserve(&self, count: usize) -> CoreResult<Vec<OplogSlot>> {
        if !self.ctx.is_logging_enabled() {
            return Err(CoreError::validation(
                "cannot reserve slots while replication logging is disabled",
            ));
        }
        self.allocator.allocate(count)
    }

    /// Logs one operation.
    ///
    /// Returns `None` when logging is disabled.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed descriptor (checked before a slot is
    /// taken), `Allocation` if no slot can be issued, or a storage error
    /// from the append.
    pub fn log_op(&self, descriptor: OpDescriptor) -> CoreResult<Option<OpTime>> {
        if !self.ctx.is_logging_enabled() {
            return Ok(None);
        }
        descriptor.validate()?;
        let slot = self.allocator.allocate_one()?;
        let entry = match build_entry(descriptor, slot) {
            Ok(entry) => entry,
            Err(e) => {
                self.abort(&[slot])?;
                return Err(e);
            }
        };
        self.write_entries(std::slice::from_ref(&entry))?;
        Ok(Some(slot.op_time))
    }

    /// Logs a batch of inserts into one collection.
    ///
    /// The entries are siblings: none links to another through
    /// `prev_op_time`. Statements either all carry pre-reserved slots or
    /// none do.
    ///
    /// Returns one optime per statement, in order, or `None` for each when
    /// logging is disabled.
    ///
    /// # Errors
    ///
    /// `Validation` for mixed slot usage or a malformed namespace or
    /// session; otherwise as [`LogWriter::log_op`].
    pub fn log_insert_ops(
        &self,
        namespace: &Namespace,
        uuid: Option<Uuid>,
        session: Option<SessionInfo>,
        statements: &[InsertStatement],
        from_migrate: bool,
    ) -> CoreResult<Vec<Option<OpTime>>> {
        if !self.ctx.is_logging_enabled() {
            return Ok(vec![None; statements.len()]);
        }
        if statements.is_empty() {
            return Ok(Vec::new());
        }

        let descriptors: Vec<OpDescriptor> = statements
            .iter()
            .map(|stmt| {
                let mut desc = OpDescriptor::insert(namespace.clone(), stmt.document.clone())
                    .from_migrate(from_migrate);
                desc.uuid = uuid;
                if let Some(session) = session {
                    desc = desc.with_session(session, stmt.statement_id);
                }
                desc
            })
            .collect();
        for desc in &descriptors {
            desc.validate()?;
        }

        let reserved = statements.iter().filter(|s| s.slot.is_some()).count();
        let slots: Vec<OplogSlot> = if reserved == statements.len() {
            statements.iter().filter_map(|s| s.slot).collect()
        } else if reserved == 0 {
            self.allocator.allocate(statements.len())?
        } else {
            return Err(CoreError::validation(format!(
                "{reserved} of {} insert statements carry a reserved slot; use all or none",
                statements.len()
            )));
        };

        let entries = descriptors
            .into_iter()
            .zip(slots)
            .map(|(desc, slot)| build_entry(desc, slot))
            .collect::<CoreResult<Vec<_>>>()?;
        self.append(&entries)
    }

    /// Appends pre-built entries in the supplied order.
    ///
    /// Every entry's slot must come from this writer's context and still be
    /// outstanding. Returns one optime per entry, or `None` for each when
    /// logging is disabled.
    ///
    /// # Errors
    ///
    /// `Validation` if the optimes are not strictly increasing or a slot is
    /// not outstanding; storage errors from the append. On a storage error
    /// the batch's unwritten slots are aborted.
    pub fn append(&self, entries: &[OplogEntry]) -> CoreResult<Vec<Option<OpTime>>> {
        if !self.ctx.is_logging_enabled() {
            return Ok(vec![None; entries.len()]);
        }
        if let Some(pair) = entries
            .windows(2)
            .find(|pair| pair[0].op_time() >= pair[1].op_time())
        {
            return Err(CoreError::validation(format!(
                "entries out of order: {} is not before {}",
                pair[0].op_time(),
                pair[1].op_time()
            )));
        }
        let op_times: Vec<OpTime> = entries.iter().map(OplogEntry::op_time).collect();
        if !self.ctx.visibility().all_reserved(&op_times) {
            return Err(CoreError::validation(
                "appended entries must use outstanding reserved slots",
            ));
        }

        self.write_entries(entries)?;
        Ok(op_times.into_iter().map(Some).collect())
    }

    /// Gives up reserved slots that will never be written.
    ///
    /// Under [`HolePolicy::WriteNoop`] a placeholder no-op is written at
    /// each slot; under [`HolePolicy::Skip`] only a hole record carrying the
    /// slot's hash is stored, so the chain can still be verified across it.
    /// Either way readers stop waiting on it.
    ///
    /// # Errors
    ///
    /// Returns the storage error if a placeholder cannot be written. The
    /// slots are released regardless.
    pub fn abort(&self, slots: &[OplogSlot]) -> CoreResult<()> {
        if slots.is_empty() {
            return Ok(());
        }
        let op_times: Vec<OpTime> = slots.iter().map(|s| s.op_time).collect();
        tracing::warn!(
            count = slots.len(),
            first = %op_times[0],
            policy = ?self.ctx.config().hole_policy,
            "aborting oplog slots"
        );

        let result = match (self.ctx.config().hole_policy, self.ctx.oplog_namespace()) {
            (HolePolicy::WriteNoop, Some(oplog_ns)) => slots.iter().try_for_each(|slot| {
                let desc = OpDescriptor::noop(oplog_ns.clone(), "hole closed");
                let entry = build_entry(desc, *slot)?;
                self.store.raw_append(slot.op_time, &entry.encode()?)?;
                Ok(())
            }),
            _ => slots
                .iter()
                .try_for_each(|slot| self.store.record_hole(*slot)),
        };
        self.ctx.visibility().mark_aborted(&op_times);
        result
    }

    /// Returns visible entries after `after`, oldest first, at most `limit`.
    ///
    /// Never returns an entry above the visibility point, even if it has
    /// already been appended.
    ///
    /// # Errors
    ///
    /// Storage or decode errors.
    pub fn read_visible(&self, after: Option<OpTime>, limit: usize) -> CoreResult<Vec<OplogEntry>> {
        let Some(visible) = self.ctx.visibility().visible_point() else {
            return Ok(Vec::new());
        };
        let from = after.unwrap_or_else(OpTime::min_value);
        let mut entries = Vec::new();
        for bytes in self.store.read_range(from, visible)? {
            let entry = OplogEntry::decode(&bytes)?;
            if after.is_some_and(|a| entry.op_time() <= a) {
                continue;
            }
            if entries.len() == limit {
                break;
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Blocks until `op_time` is visible to readers.
    pub fn wait_until_visible(&self, op_time: OpTime) {
        self.ctx.visibility().wait_until_visible(op_time);
    }

    fn write_entries(&self, entries: &[OplogEntry]) -> CoreResult<()> {
        for (i, entry) in entries.iter().enumerate() {
            let appended = entry
                .encode()
                .and_then(|bytes| self.store.raw_append(entry.op_time(), &bytes));
            if let Err(e) = appended {
                let written: Vec<OpTime> = entries[..i].iter().map(OplogEntry::op_time).collect();
                let unwritten: Vec<OplogSlot> = entries[i..].iter().map(|e| e.slot).collect();
                self.ctx.visibility().mark_written(&written);
                self.abort(&unwritten)?;
                return Err(e);
            }
            tracing::debug!(op_time = %entry.op_time(), kind = %entry.kind, ns = %entry.namespace, "appended oplog entry");
        }

        let op_times: Vec<OpTime> = entries.iter().map(OplogEntry::op_time).collect();
        let synced = if self.ctx.config().sync_on_append {
            self.store.flush(true)
        } else {
            Ok(())
        };
        // Appended frames are in the store either way; a failed sync is
        // reported to the caller but does not wedge readers.
        self.ctx.visibility().mark_written(&op_times);
        synced
    }
}

impl std::fmt::Debug for LogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogWriter")
            .field("ctx", &self.ctx)
            .finish_non_exhaustive()
    }
}

/// Returns true if `entry` is a placeholder written for an aborted slot.
#[must_use]
pub fn is_hole_placeholder(entry: &OplogEntry) -> bool {
    entry.kind == OpKind::Noop && entry.object.get_text("msg") == Some("hole closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualWallClock;
    use crate::config::{ReplicationConfig, ReplicationMode};
    use crate::store::FramedOplogStore;
    use crate::types::Timestamp;

    fn writer_with(config: ReplicationConfig) -> (LogWriter, Arc<FramedOplogStore>) {
        let ctx = ReplicationLogContext::with_wall_clock(config, Arc::new(ManualWallClock::new(500)));
        ctx.initialize(1, None);
        let store = Arc::new(FramedOplogStore::in_memory());
        let writer = LogWriter::new(Arc::new(ctx), store.clone());
        (writer, store)
    }

    fn writer() -> (LogWriter, Arc<FramedOplogStore>) {
        writer_with(ReplicationConfig::default().sync_on_append(false))
    }

    fn doc(id: i64) -> Document {
        Document::new().with("_id", id)
    }

    #[test]
    fn log_op_appends_and_publishes() {
        let (writer, store) = writer();
        let op_time = writer
            .log_op(OpDescriptor::insert("app.users", doc(1)))
            .unwrap()
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(writer.context().visibility().is_visible(op_time));
        let visible = writer.read_visible(None, 10).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].object, doc(1));
    }

    #[test]
    fn invalid_descriptor_consumes_no_slot() {
        let (writer, store) = writer();
        let bad = OpDescriptor::insert("app.users", doc(1)).with_criteria(doc(1));
        assert!(writer.log_op(bad).is_err());

        assert_eq!(writer.context().last_op_time(), None);
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn disabled_mode_logs_nothing() {
        let (writer, store) =
            writer_with(ReplicationConfig::default().mode(ReplicationMode::Disabled));

        assert_eq!(
            writer.log_op(OpDescriptor::insert("app.users", doc(1))).unwrap(),
            None
        );
        let stmts = vec![
            InsertStatement::new(StatementId::new(0), doc(1)),
            InsertStatement::new(StatementId::new(1), doc(2)),
        ];
        let result = writer
            .log_insert_ops(&Namespace::new("app.users"), None, None, &stmts, false)
            .unwrap();
        assert_eq!(result, vec![None, None]);
        assert!(writer.reserve(1).is_err());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn mixed_reserved_slots_are_rejected() {
        let (writer, _store) = writer();
        let slot = writer.reserve(1).unwrap()[0];
        let stmts = vec![
            InsertStatement::with_slot(StatementId::new(0), doc(1), slot),
            InsertStatement::new(StatementId::new(1), doc(2)),
        ];
        let err = writer
            .log_insert_ops(&Namespace::new("app.users"), None, None, &stmts, false)
            .unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }

    #[test]
    fn pre_reserved_slots_are_used() {
        let (writer, _store) = writer();
        let slots = writer.reserve(2).unwrap();
        let stmts = vec![
            InsertStatement::with_slot(StatementId::new(0), doc(1), slots[0]),
            InsertStatement::with_slot(StatementId::new(1), doc(2), slots[1]),
        ];
        let result = writer
            .log_insert_ops(&Namespace::new("app.users"), None, None, &stmts, false)
            .unwrap();
        assert_eq!(result, vec![Some(slots[0].op_time), Some(slots[1].op_time)]);
    }

    #[test]
    fn append_rejects_out_of_order_batch() {
        let (writer, _store) = writer();
        let slots = writer.reserve(2).unwrap();
        let entries = vec![
            build_entry(OpDescriptor::insert("a.b", doc(2)), slots[1]).unwrap(),
            build_entry(OpDescriptor::insert("a.b", doc(1)), slots[0]).unwrap(),
        ];
        assert!(writer.append(&entries).is_err());
    }

    #[test]
    fn append_rejects_foreign_slot() {
        let (writer, _store) = writer();
        let foreign = OplogSlot::new(OpTime::new(Timestamp::new(1, 1), 1), 0);
        let entry = build_entry(OpDescriptor::insert("a.b", doc(1)), foreign).unwrap();
        assert!(writer.append(&[entry]).is_err());
    }

    #[test]
    fn reserved_slot_hides_later_entries_until_aborted() {
        let (writer, _store) = writer();
        let held = writer.reserve(1).unwrap();
        let later = writer
            .log_op(OpDescriptor::insert("app.users", doc(1)))
            .unwrap()
            .unwrap();

        assert!(writer.read_visible(None, 10).unwrap().is_empty());
        assert!(!writer.context().visibility().is_visible(later));

        writer.abort(&held).unwrap();
        let visible = writer.read_visible(None, 10).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].op_time(), later);
    }

    #[test]
    fn write_noop_policy_fills_holes() {
        let (writer, store) = writer_with(
            ReplicationConfig::default()
                .sync_on_append(false)
                .hole_policy(HolePolicy::WriteNoop),
        );
        let held = writer.reserve(1).unwrap();
        writer.abort(&held).unwrap();

        assert_eq!(store.len(), 1);
        let visible = writer.read_visible(None, 10).unwrap();
        assert!(is_hole_placeholder(&visible[0]));
        assert_eq!(visible[0].namespace.as_str(), "local.oplog.rs");
        assert!(store.last_hole().unwrap().is_none());
    }

    #[test]
    fn skip_policy_records_hole() {
        let (writer, store) = writer();
        let held = writer.reserve(1).unwrap();
        writer.abort(&held).unwrap();

        assert_eq!(store.len(), 0);
        assert_eq!(store.last_hole().unwrap(), Some(held[0]));
        assert!(writer.read_visible(None, 10).unwrap().is_empty());
    }

    #[test]
    fn read_visible_pages_after_an_optime() {
        let (writer, _store) = writer();
        let times: Vec<OpTime> = (0..5)
            .map(|i| {
                writer
                    .log_op(OpDescriptor::insert("app.users", doc(i)))
                    .unwrap()
                    .unwrap()
            })
            .collect();

        let page = writer.read_visible(Some(times[1]), 2).unwrap();
        let got: Vec<OpTime> = page.iter().map(OplogEntry::op_time).collect();
        assert_eq!(got, vec![times[2], times[3]]);
    }
}
