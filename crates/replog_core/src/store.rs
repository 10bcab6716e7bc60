//! Append-only oplog storage.
//!
//! [`OplogStore`] is the seam between the writer and whatever physically
//! keeps the log. [`FramedOplogStore`] is the reference implementation: it
//! frames every entry over a [`StorageBackend`] and keeps an in-memory
//! optime index.
//!
//! ## Frame format
//!
//! ```text
//! | magic (4) | version u16 (2) | term i64 (8) | ts u64 (8) | len u32 (4) | payload | crc32 (4) |
//! ```
//!
//! Magic `"ROPL"` marks an entry frame whose payload is an encoded entry.
//! Magic `"RHOL"` marks a hole record: a slot that was aborted without a
//! placeholder entry, whose 8-byte payload is the slot's chain hash. Hole
//! records let the chain be verified across skipped slots.
//!
//! All integers are little endian. The CRC covers the header and payload.
//! Frames are written in completion order, which may differ from optime
//! order when writers race; the index restores optime order for readers.

use crate::error::{CoreError, CoreResult};
use crate::types::{OpTime, OplogSlot, Timestamp};
use parking_lot::{Mutex, RwLock};
use replog_storage::{InMemoryBackend, StorageBackend};
use std::collections::BTreeMap;

/// Magic bytes at the start of every entry frame.
pub const FRAME_MAGIC: [u8; 4] = *b"ROPL";

/// Magic bytes at the start of every hole record.
pub const HOLE_MAGIC: [u8; 4] = *b"RHOL";

/// Current frame format version.
pub const FRAME_VERSION: u16 = 1;

const HEADER_SIZE: usize = 26;
const CRC_SIZE: usize = 4;
const HOLE_PAYLOAD_SIZE: usize = 8;

/// Physical storage for encoded entries, keyed by optime.
pub trait OplogStore: Send + Sync {
    /// Appends an encoded entry and returns its physical position.
    ///
    /// # Errors
    ///
    /// Fails if `op_time` is already stored or on storage error.
    fn raw_append(&self, op_time: OpTime, entry: &[u8]) -> CoreResult<u64>;

    /// Returns the entries with `from <= optime <= to`, in optime order.
    ///
    /// # Errors
    ///
    /// Fails on storage error.
    fn read_range(&self, from: OpTime, to: OpTime) -> CoreResult<Vec<Vec<u8>>>;

    /// Returns the entry with the greatest optime.
    ///
    /// # Errors
    ///
    /// Fails on storage error.
    fn last_entry(&self) -> CoreResult<Option<Vec<u8>>>;

    /// Flushes buffered writes; with `sync`, forces them to durable media.
    ///
    /// # Errors
    ///
    /// Fails on storage error.
    fn flush(&self, sync: bool) -> CoreResult<()>;

    /// Records that `slot` was aborted and will never hold an entry.
    ///
    /// # Errors
    ///
    /// Fails if the optime is already stored or on storage error.
    fn record_hole(&self, slot: OplogSlot) -> CoreResult<()>;

    /// Returns the hole records with `from <= optime <= to`, in optime order.
    ///
    /// # Errors
    ///
    /// Fails on storage error.
    fn holes(&self, from: OpTime, to: OpTime) -> CoreResult<Vec<OplogSlot>>;

    /// Returns the hole record with the greatest optime.
    ///
    /// # Errors
    ///
    /// Fails on storage error.
    fn last_hole(&self) -> CoreResult<Option<OplogSlot>>;
}

/// What a frame holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// An encoded oplog entry.
    Entry,
    /// The chain hash of an aborted slot.
    Hole,
}

impl FrameKind {
    const fn magic(self) -> [u8; 4] {
        match self {
            Self::Entry => FRAME_MAGIC,
            Self::Hole => HOLE_MAGIC,
        }
    }

    fn from_magic(magic: &[u8]) -> Option<Self> {
        if magic == FRAME_MAGIC {
            Some(Self::Entry)
        } else if magic == HOLE_MAGIC {
            Some(Self::Hole)
        } else {
            None
        }
    }
}

/// Location of one frame in the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Entry or hole record.
    pub kind: FrameKind,
    /// Offset of the frame's first byte.
    pub offset: u64,
    /// Optime recorded in the header.
    pub op_time: OpTime,
    /// Payload length in bytes.
    pub payload_len: u32,
}

impl FrameInfo {
    fn payload_offset(&self) -> u64 {
        self.offset + HEADER_SIZE as u64
    }

    /// Offset one past the frame's last byte.
    #[must_use]
    pub fn end(&self) -> u64 {
        self.payload_offset() + u64::from(self.payload_len) + CRC_SIZE as u64
    }
}

/// Result of walking every frame in a backend.
#[derive(Debug, Clone, Default)]
pub struct FrameScan {
    /// Complete frames in physical order.
    pub frames: Vec<FrameInfo>,
    /// Bytes covered by complete frames.
    pub valid_len: u64,
    /// Backend size.
    pub total_len: u64,
}

impl FrameScan {
    /// True if the backend ends in a partially written frame.
    #[must_use]
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.total_len
    }
}

/// Encodes one entry frame.
///
/// # Errors
///
/// Fails if the payload is larger than `u32::MAX` bytes.
pub fn encode_frame(op_time: OpTime, payload: &[u8]) -> CoreResult<Vec<u8>> {
    if u32::try_from(payload.len()).is_err() {
        return Err(CoreError::validation("oplog entry larger than 4 GiB"));
    }
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    push_frame(&mut frame, FrameKind::Entry, op_time, payload);
    Ok(frame)
}

/// Encodes the hole record for an aborted slot.
#[must_use]
pub fn encode_hole(slot: OplogSlot) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + HOLE_PAYLOAD_SIZE + CRC_SIZE);
    push_frame(&mut frame, FrameKind::Hole, slot.op_time, &slot.hash.to_le_bytes());
    frame
}

// Callers guarantee the payload fits in a u32.
fn push_frame(frame: &mut Vec<u8>, kind: FrameKind, op_time: OpTime, payload: &[u8]) {
    let len = payload.len() as u32;
    frame.extend_from_slice(&kind.magic());
    frame.extend_from_slice(&FRAME_VERSION.to_le_bytes());
    frame.extend_from_slice(&op_time.term().to_le_bytes());
    frame.extend_from_slice(&op_time.timestamp().as_u64().to_le_bytes());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc32fast::hash(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

/// Walks every frame in `backend` without modifying it.
///
/// A frame cut off by the end of the backend ends the scan and is reported
/// through [`FrameScan::has_torn_tail`].
///
/// # Errors
///
/// Bad magic, an unknown version, a duplicate optime or a checksum
/// mismatch is corruption and fails the scan.
pub fn scan_frames(backend: &dyn StorageBackend) -> CoreResult<FrameScan> {
    let total_len = backend.size()?;
    let mut scan = FrameScan {
        frames: Vec::new(),
        valid_len: 0,
        total_len,
    };
    let mut seen = std::collections::HashSet::new();
    let mut offset = 0u64;

    while offset < total_len {
        if total_len - offset < HEADER_SIZE as u64 {
            break;
        }
        let header = backend.read_at(offset, HEADER_SIZE)?;
        let Some(kind) = FrameKind::from_magic(&header[0..4]) else {
            return Err(CoreError::corruption(offset, "bad frame magic"));
        };
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != FRAME_VERSION {
            return Err(CoreError::corruption(
                offset,
                format!("unsupported frame version {version}"),
            ));
        }
        let term = i64::from_le_bytes(read_array(&header[6..14]));
        let ts = u64::from_le_bytes(read_array(&header[14..22]));
        let payload_len = u32::from_le_bytes(read_array(&header[22..26]));

        let frame = FrameInfo {
            kind,
            offset,
            op_time: OpTime::new(Timestamp::from_u64(ts), term),
            payload_len,
        };
        if frame.end() > total_len {
            break;
        }
        if kind == FrameKind::Hole && payload_len as usize != HOLE_PAYLOAD_SIZE {
            return Err(CoreError::corruption(
                offset,
                format!("hole record with {payload_len}-byte payload"),
            ));
        }

        let body = backend.read_at(frame.payload_offset(), payload_len as usize + CRC_SIZE)?;
        let (payload, stored) = body.split_at(payload_len as usize);
        let expected = u32::from_le_bytes(read_array(stored));
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&header);
        hasher.update(payload);
        let actual = hasher.finalize();
        if expected != actual {
            return Err(CoreError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }
        if !seen.insert(frame.op_time) {
            return Err(CoreError::corruption(
                offset,
                format!("duplicate optime {}", frame.op_time),
            ));
        }

        offset = frame.end();
        scan.frames.push(frame);
        scan.valid_len = offset;
    }
    Ok(scan)
}

/// Reads the payload of a scanned frame.
///
/// # Errors
///
/// Fails on storage error.
pub fn read_frame_payload(backend: &dyn StorageBackend, frame: &FrameInfo) -> CoreResult<Vec<u8>> {
    Ok(backend.read_at(frame.payload_offset(), frame.payload_len as usize)?)
}

/// Reads the slot recorded by a scanned hole frame.
///
/// # Errors
///
/// `Validation` if `frame` is not a hole record; storage errors.
pub fn read_hole(backend: &dyn StorageBackend, frame: &FrameInfo) -> CoreResult<OplogSlot> {
    if frame.kind != FrameKind::Hole || frame.payload_len as usize != HOLE_PAYLOAD_SIZE {
        return Err(CoreError::validation(format!(
            "frame at offset {} is not a hole record",
            frame.offset
        )));
    }
    let payload = read_frame_payload(backend, frame)?;
    let hash = i64::from_le_bytes(read_array(&payload));
    Ok(OplogSlot::new(frame.op_time, hash))
}

fn read_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

/// A frame-per-entry oplog over a byte store.
pub struct FramedOplogStore {
    backend: Mutex<Box<dyn StorageBackend>>,
    index: RwLock<BTreeMap<OpTime, FrameInfo>>,
    holes: RwLock<BTreeMap<OpTime, i64>>,
}

impl FramedOplogStore {
    /// Opens a store, rebuilding the index from existing frames.
    ///
    /// A torn tail left by a crash mid-append is truncated away.
    ///
    /// # Errors
    ///
    /// Fails on corruption (see [`scan_frames`]) or storage error.
    pub fn open(mut backend: Box<dyn StorageBackend>) -> CoreResult<Self> {
        let scan = scan_frames(backend.as_ref())?;
        if scan.has_torn_tail() {
            tracing::warn!(
                valid_len = scan.valid_len,
                total_len = scan.total_len,
                "dropping torn oplog tail"
            );
            backend.truncate(scan.valid_len)?;
            backend.sync()?;
        }

        let mut index = BTreeMap::new();
        let mut holes = BTreeMap::new();
        for frame in &scan.frames {
            match frame.kind {
                FrameKind::Entry => {
                    index.insert(frame.op_time, *frame);
                }
                FrameKind::Hole => {
                    let slot = read_hole(backend.as_ref(), frame)?;
                    holes.insert(slot.op_time, slot.hash);
                }
            }
        }
        tracing::info!(
            entries = index.len(),
            holes = holes.len(),
            last = ?index.keys().next_back(),
            "oplog store opened"
        );
        Ok(Self {
            backend: Mutex::new(backend),
            index: RwLock::new(index),
            holes: RwLock::new(holes),
        })
    }

    /// Creates an empty store in memory.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backend: Mutex::new(Box::new(InMemoryBackend::new())),
            index: RwLock::new(BTreeMap::new()),
            holes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Returns the number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Returns every entry frame in optime order.
    #[must_use]
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.index.read().values().copied().collect()
    }

    fn ensure_vacant(&self, op_time: OpTime) -> CoreResult<()> {
        if self.index.read().contains_key(&op_time) || self.holes.read().contains_key(&op_time) {
            return Err(CoreError::validation(format!(
                "optime {op_time} is already in the oplog"
            )));
        }
        Ok(())
    }
}

impl OplogStore for FramedOplogStore {
    fn raw_append(&self, op_time: OpTime, entry: &[u8]) -> CoreResult<u64> {
        let frame = encode_frame(op_time, entry)?;
        let mut backend = self.backend.lock();
        self.ensure_vacant(op_time)?;
        let offset = backend.append(&frame)?;
        self.index.write().insert(
            op_time,
            FrameInfo {
                kind: FrameKind::Entry,
                offset,
                op_time,
                payload_len: entry.len() as u32,
            },
        );
        Ok(offset)
    }

    fn read_range(&self, from: OpTime, to: OpTime) -> CoreResult<Vec<Vec<u8>>> {
        if from > to {
            return Ok(Vec::new());
        }
        let frames: Vec<FrameInfo> = self.index.read().range(from..=to).map(|(_, f)| *f).collect();
        let backend = self.backend.lock();
        frames
            .iter()
            .map(|f| read_frame_payload(&**backend, f))
            .collect()
    }

    fn last_entry(&self) -> CoreResult<Option<Vec<u8>>> {
        let last = self.index.read().values().next_back().copied();
        match last {
            Some(frame) => {
                let backend = self.backend.lock();
                Ok(Some(read_frame_payload(&**backend, &frame)?))
            }
            None => Ok(None),
        }
    }

    fn flush(&self, sync: bool) -> CoreResult<()> {
        let mut backend = self.backend.lock();
        backend.flush()?;
        if sync {
            backend.sync()?;
        }
        Ok(())
    }

    fn record_hole(&self, slot: OplogSlot) -> CoreResult<()> {
        let frame = encode_hole(slot);
        let mut backend = self.backend.lock();
        self.ensure_vacant(slot.op_time)?;
        backend.append(&frame)?;
        self.holes.write().insert(slot.op_time, slot.hash);
        Ok(())
    }

    fn holes(&self, from: OpTime, to: OpTime) -> CoreResult<Vec<OplogSlot>> {
        if from > to {
            return Ok(Vec::new());
        }
        Ok(self
            .holes
            .read()
            .range(from..=to)
            .map(|(op_time, hash)| OplogSlot::new(*op_time, *hash))
            .collect())
    }

    fn last_hole(&self) -> CoreResult<Option<OplogSlot>> {
        Ok(self
            .holes
            .read()
            .iter()
            .next_back()
            .map(|(op_time, hash)| OplogSlot::new(*op_time, *hash)))
    }
}

impl std::fmt::Debug for FramedOplogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramedOplogStore")
            .field("entries", &self.len())
            .field("holes", &self.holes.read().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(inc: u32) -> OpTime {
        OpTime::new(Timestamp::new(100, inc), 1)
    }

    fn store_over(backend: &InMemoryBackend) -> FramedOplogStore {
        FramedOplogStore::open(Box::new(backend.clone())).unwrap()
    }

    #[test]
    fn reads_come_back_in_optime_order() {
        let store = FramedOplogStore::in_memory();
        store.raw_append(op(2), b"two").unwrap();
        store.raw_append(op(1), b"one").unwrap();
        store.raw_append(op(3), b"three").unwrap();

        let all = store.read_range(op(1), op(3)).unwrap();
        assert_eq!(all, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
        assert_eq!(store.read_range(op(2), op(2)).unwrap(), vec![b"two".to_vec()]);
        assert!(store.read_range(op(3), op(1)).unwrap().is_empty());
        assert_eq!(store.last_entry().unwrap(), Some(b"three".to_vec()));
    }

    #[test]
    fn duplicate_optime_is_rejected() {
        let store = FramedOplogStore::in_memory();
        store.raw_append(op(1), b"a").unwrap();
        assert!(store.raw_append(op(1), b"b").is_err());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reopen_rebuilds_index() {
        let backend = InMemoryBackend::new();
        {
            let store = store_over(&backend);
            store.raw_append(op(1), b"first").unwrap();
            store.raw_append(op(2), b"second").unwrap();
            store.flush(true).unwrap();
        }

        let store = store_over(&backend);
        assert_eq!(store.len(), 2);
        assert_eq!(store.last_entry().unwrap(), Some(b"second".to_vec()));
    }

    #[test]
    fn torn_tail_is_dropped_on_open() {
        let backend = InMemoryBackend::new();
        {
            let store = store_over(&backend);
            store.raw_append(op(1), b"complete").unwrap();
            store.raw_append(op(2), b"torn").unwrap();
        }
        let bytes = backend.snapshot();
        let torn = InMemoryBackend::with_data(bytes[..bytes.len() - 3].to_vec());

        let scan = scan_frames(&torn).unwrap();
        assert!(scan.has_torn_tail());
        assert_eq!(scan.frames.len(), 1);

        let store = store_over(&torn);
        assert_eq!(store.len(), 1);
        assert_eq!(torn.size().unwrap(), scan.valid_len);
    }

    #[test]
    fn checksum_mismatch_is_fatal() {
        let backend = InMemoryBackend::new();
        store_over(&backend).raw_append(op(1), b"payload").unwrap();
        backend.corrupt_byte(HEADER_SIZE + 2, b'X');

        let err = FramedOplogStore::open(Box::new(backend)).unwrap_err();
        assert!(matches!(err, CoreError::ChecksumMismatch { .. }));
    }

    #[test]
    fn bad_magic_is_fatal() {
        let backend = InMemoryBackend::new();
        store_over(&backend).raw_append(op(1), b"payload").unwrap();
        backend.corrupt_byte(0, b'Z');

        let err = FramedOplogStore::open(Box::new(backend)).unwrap_err();
        assert!(matches!(err, CoreError::Corruption { .. }));
    }

    #[test]
    fn hole_records_survive_reopen() {
        let backend = InMemoryBackend::new();
        let hole = OplogSlot::new(op(2), -42);
        {
            let store = store_over(&backend);
            store.raw_append(op(1), b"first").unwrap();
            store.record_hole(hole).unwrap();
            store.raw_append(op(3), b"third").unwrap();
        }

        let store = store_over(&backend);
        assert_eq!(store.len(), 2);
        assert_eq!(store.holes(op(1), op(3)).unwrap(), vec![hole]);
        assert_eq!(store.last_hole().unwrap(), Some(hole));
        assert_eq!(
            store.read_range(op(1), op(3)).unwrap(),
            vec![b"first".to_vec(), b"third".to_vec()]
        );
        assert!(store.raw_append(op(2), b"late").is_err());
        assert!(store.record_hole(OplogSlot::new(op(3), 0)).is_err());
    }

    #[test]
    fn frame_layout() {
        let frame = encode_frame(op(7), b"abc").unwrap();
        assert_eq!(&frame[0..4], b"ROPL");
        assert_eq!(frame.len(), HEADER_SIZE + 3 + CRC_SIZE);
        assert_eq!(&frame[HEADER_SIZE..HEADER_SIZE + 3], b"abc");
    }
}
