//! Core type definitions for the replication log.

use replog_codec::{CodecError, CodecResult, Document, Value};
use std::fmt;
use uuid::Uuid;

/// A logical timestamp: wall-clock seconds plus an increment within that second.
///
/// Ordered lexicographically by `(secs, inc)`. The packed `u64` form is
/// `secs << 32 | inc`, which preserves that order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    secs: u32,
    inc: u32,
}

impl Timestamp {
    /// Creates a timestamp.
    #[must_use]
    pub const fn new(secs: u32, inc: u32) -> Self {
        Self { secs, inc }
    }

    /// Returns the seconds component.
    #[must_use]
    pub const fn secs(self) -> u32 {
        self.secs
    }

    /// Returns the increment component.
    #[must_use]
    pub const fn inc(self) -> u32 {
        self.inc
    }

    /// Returns the packed form.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        ((self.secs as u64) << 32) | self.inc as u64
    }

    /// Unpacks a timestamp from its packed form.
    #[must_use]
    pub const fn from_u64(packed: u64) -> Self {
        Self {
            secs: (packed >> 32) as u32,
            inc: packed as u32,
        }
    }

    /// Returns true for the zero timestamp.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.secs == 0 && self.inc == 0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}, {})", self.secs, self.inc)
    }
}

/// A position in the replication log.
///
/// Ordered by term first, then timestamp. Field order matters for the
/// derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpTime {
    term: i64,
    timestamp: Timestamp,
}

impl OpTime {
    /// Creates an optime.
    #[must_use]
    pub const fn new(timestamp: Timestamp, term: i64) -> Self {
        Self { term, timestamp }
    }

    /// The smallest representable optime.
    #[must_use]
    pub const fn min_value() -> Self {
        Self::new(Timestamp::new(0, 0), i64::MIN)
    }

    /// Returns the timestamp.
    #[must_use]
    pub const fn timestamp(self) -> Timestamp {
        self.timestamp
    }

    /// Returns the term.
    #[must_use]
    pub const fn term(self) -> i64 {
        self.term
    }

    /// Serializes as `{ts, t}`.
    #[must_use]
    pub fn to_document(self) -> Document {
        Document::new()
            .with("ts", self.timestamp.as_u64() as i64)
            .with("t", self.term)
    }

    /// Parses the `{ts, t}` form.
    ///
    /// # Errors
    ///
    /// Fails if either field is missing or not an integer.
    pub fn from_document(doc: &Document) -> CodecResult<Self> {
        let ts = doc
            .get_integer("ts")
            .ok_or_else(|| CodecError::invalid_structure("optime missing integer 'ts'"))?;
        let term = doc
            .get_integer("t")
            .ok_or_else(|| CodecError::invalid_structure("optime missing integer 't'"))?;
        Ok(Self::new(Timestamp::from_u64(ts as u64), term))
    }
}

impl fmt::Display for OpTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ ts: {}, t: {} }}", self.timestamp, self.term)
    }
}

/// An allocated log position together with its integrity hash.
///
/// Created once per logged operation, immediately before the write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OplogSlot {
    /// The allocated position.
    pub op_time: OpTime,
    /// Hash chaining this slot to its predecessor.
    pub hash: i64,
}

impl OplogSlot {
    /// Creates a slot.
    #[must_use]
    pub const fn new(op_time: OpTime, hash: i64) -> Self {
        Self { op_time, hash }
    }
}

/// Identifies a statement within a logical session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StatementId(pub i32);

impl StatementId {
    /// The uninitialized statement id. Never written to the log.
    pub const UNINITIALIZED: Self = Self(-1);

    /// Creates a statement id.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Returns false for [`StatementId::UNINITIALIZED`].
    #[must_use]
    pub const fn is_initialized(self) -> bool {
        self.0 != Self::UNINITIALIZED.0
    }
}

impl fmt::Display for StatementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stmt:{}", self.0)
    }
}

/// Logical session and transaction number a write belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionInfo {
    /// Logical session id.
    pub session_id: Uuid,
    /// Transaction number within the session.
    pub txn_number: i64,
}

impl SessionInfo {
    /// Creates session info.
    #[must_use]
    pub const fn new(session_id: Uuid, txn_number: i64) -> Self {
        Self {
            session_id,
            txn_number,
        }
    }
}

/// A `db.collection` namespace string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Namespace(String);

impl Namespace {
    /// Suffix of command namespaces.
    pub const COMMAND_COLLECTION: &'static str = "$cmd";
    /// Collection whose inserts are index creations.
    pub const SYSTEM_INDEXES: &'static str = "system.indexes";

    /// Wraps a namespace string without validating it.
    pub fn new(ns: impl Into<String>) -> Self {
        Self(ns.into())
    }

    /// Joins a database and collection name.
    #[must_use]
    pub fn from_parts(db: &str, coll: &str) -> Self {
        Self(format!("{db}.{coll}"))
    }

    /// Returns the `db.$cmd` namespace for a database.
    #[must_use]
    pub fn command(db: &str) -> Self {
        Self::from_parts(db, Self::COMMAND_COLLECTION)
    }

    /// Returns the `db.` marker namespace for a database.
    #[must_use]
    pub fn db_marker(db: &str) -> Self {
        Self(format!("{db}."))
    }

    /// Returns the full string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the database part (everything before the first `.`).
    pub fn db(&self) -> &str {
        self.0.split_once('.').map_or(self.0.as_str(), |(db, _)| db)
    }

    /// Returns the collection part (everything after the first `.`).
    pub fn coll(&self) -> &str {
        self.0.split_once('.').map_or("", |(_, coll)| coll)
    }

    /// True for `db.$cmd`.
    pub fn is_command(&self) -> bool {
        self.coll() == Self::COMMAND_COLLECTION
    }

    /// True for `db.system.indexes`.
    pub fn is_system_indexes(&self) -> bool {
        self.coll() == Self::SYSTEM_INDEXES
    }

    /// True for a database marker `db.`.
    pub fn is_db_marker(&self) -> bool {
        self.0.ends_with('.') && !self.db().is_empty() && self.coll().is_empty()
    }

    /// True if this is a well-formed `db.coll` namespace.
    pub fn is_well_formed(&self) -> bool {
        !self.db().is_empty()
            && !self.coll().is_empty()
            && self.0.contains('.')
            && !self.0.contains('\0')
            && !self.db().contains(['/', '\\', ' ', '"', '$'])
    }

    /// True if this can name a user collection (well formed, not a command
    /// namespace, no `$` outside the oplog's own name).
    pub fn is_valid_collection(&self) -> bool {
        self.is_well_formed()
            && !self.is_command()
            && (!self.coll().contains('$') || self.coll() == "oplog.$main")
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Namespace {
    fn from(ns: &str) -> Self {
        Self::new(ns)
    }
}

impl From<String> for Namespace {
    fn from(ns: String) -> Self {
        Self(ns)
    }
}

/// Reads a UUID stored as a 16-byte byte string.
pub(crate) fn uuid_from_value(value: &Value, field: &str) -> CodecResult<Uuid> {
    let bytes = value
        .as_bytes()
        .ok_or_else(|| CodecError::invalid_structure(format!("'{field}' must be bytes")))?;
    Uuid::from_slice(bytes)
        .map_err(|_| CodecError::invalid_structure(format!("'{field}' is not a 16-byte uuid")))
}
