//! # replog storage
//!
//! Byte-level append-only stores that sit underneath the oplog.
//!
//! Backends are **opaque**: they know nothing about entry framing, optimes
//! or documents. The oplog store in `replog_core` owns all interpretation.
//!
//! - [`InMemoryBackend`] for tests and ephemeral replicas
//! - [`FileBackend`] for a durable, exclusively locked log file
//!
//! ```rust
//! use replog_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let pos = backend.append(b"entry").unwrap();
//! assert_eq!(backend.read_at(pos, 5).unwrap(), b"entry");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
