//! # replog core
//!
//! The write and replay paths of a replicated operation log.
//!
//! This crate provides:
//! - Optime allocation with a hash chain ([`SlotAllocator`])
//! - Entry construction and the CBOR wire form ([`OpDescriptor`], [`OplogEntry`])
//! - A framed append-only store ([`FramedOplogStore`])
//! - Ordered visibility over out-of-order completions ([`VisibilityTracker`])
//! - Logging of local writes ([`LogWriter`])
//! - Idempotent replay against a [`Catalog`] ([`ApplyEngine`])
//! - Offline chain verification ([`verify_chain`])
//! - Read preference settings ([`ReadPreferenceSetting`])
//!
//! ## Concurrency
//!
//! Allocation is serialized by one short lock in the
//! [`ReplicationLogContext`]; store I/O happens outside it. Writers may
//! finish in any order, and readers observe entries only up to the
//! visibility point, below which no slot is still pending.
//!
//! ## Example
//!
//! ```rust
//! use replog_codec::Document;
//! use replog_core::{FramedOplogStore, LogWriter, OpDescriptor, ReplicationConfig, ReplicationLogContext};
//! use std::sync::Arc;
//!
//! let ctx = Arc::new(ReplicationLogContext::new(ReplicationConfig::default()));
//! ctx.initialize(1, None);
//! let writer = LogWriter::new(ctx, Arc::new(FramedOplogStore::in_memory()));
//!
//! let op_time = writer
//!     .log_op(OpDescriptor::insert("app.users", Document::new().with("_id", 1)))
//!     .unwrap()
//!     .unwrap();
//! let visible = writer.read_visible(None, 10).unwrap();
//! assert_eq!(visible[0].op_time(), op_time);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod allocator;
mod apply;
mod builder;
mod catalog;
mod chain;
mod clock;
mod config;
mod context;
mod entry;
mod error;
mod read_preference;
mod session;
mod stats;
mod store;
mod types;
mod update;
mod visibility;
mod writer;

pub use allocator::{chain_hash, SlotAllocator, GENESIS_HASH, OPLOG_VERSION};
pub use apply::{ApplyEngine, ApplyMode, OpsAppliedObserver};
pub use builder::{build_entry, OpDescriptor};
pub use catalog::{
    Catalog, CollectionInfo, InMemoryCatalog, IndexOutcome, IndexSpec, InsertOutcome,
    NamespaceLocks, ID_INDEX_NAME,
};
pub use chain::{verify_chain, ChainBreak, ChainBreakKind, ChainReport};
pub use clock::{ManualWallClock, SystemWallClock, WallClock};
pub use config::{HolePolicy, ReplicationConfig, ReplicationMode};
pub use context::ReplicationLogContext;
pub use entry::{OpKind, OplogEntry, OplogLink};
pub use error::{ApplyErrorCode, CoreError, CoreResult, ErrorCategory};
pub use read_preference::{ReadPreference, ReadPreferenceSetting, TagSet, MIN_MAX_STALENESS};
pub use session::{InMemorySessionTracker, SessionTracker};
pub use stats::{ApplyStats, ApplyStatsSnapshot};
pub use store::{
    encode_frame, encode_hole, read_frame_payload, read_hole, scan_frames, FrameInfo, FrameKind,
    FrameScan, FramedOplogStore, OplogStore, FRAME_MAGIC, FRAME_VERSION, HOLE_MAGIC,
};
pub use types::{Namespace, OpTime, OplogSlot, SessionInfo, StatementId, Timestamp};
pub use update::{apply_update, classify, matches, upsert_seed, UpdateForm};
pub use visibility::VisibilityTracker;
pub use writer::{is_hole_placeholder, InsertStatement, LogWriter};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
