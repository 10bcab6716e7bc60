//! Benchmark fixtures.

use replog_codec::Document;
use replog_core::{
    FramedOplogStore, LogWriter, OpDescriptor, OplogStore, ReplicationConfig,
    ReplicationLogContext,
};
use std::sync::Arc;

/// Creates an initialized context that does not sync on append.
pub fn context() -> Arc<ReplicationLogContext> {
    let ctx = Arc::new(ReplicationLogContext::new(
        ReplicationConfig::default().sync_on_append(false),
    ));
    ctx.initialize(1, None);
    ctx
}

/// Creates a writer over `store`.
pub fn writer(store: Arc<dyn OplogStore>) -> LogWriter {
    LogWriter::new(context(), store)
}

/// Creates a writer over an in-memory store.
pub fn memory_writer() -> LogWriter {
    writer(Arc::new(FramedOplogStore::in_memory()))
}

/// Builds a document with `fields` short text fields and the given `_id`.
pub fn document(id: i64, fields: usize) -> Document {
    (0..fields).fold(Document::new().with("_id", id), |doc, i| {
        doc.with(format!("field{i}"), format!("value-{id}-{i}"))
    })
}

/// An insert of [`document`] into `bench.items`.
pub fn insert(id: i64, fields: usize) -> OpDescriptor {
    OpDescriptor::insert("bench.items", document(id, fields))
}
