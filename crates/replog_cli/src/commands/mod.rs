//! CLI command implementations.

pub mod dump;
pub mod verify;

use replog_core::{
    read_frame_payload, read_hole, scan_frames, FrameKind, FrameScan, OplogEntry, OplogSlot,
};
use replog_storage::FileBackend;
use std::path::Path;

/// An oplog file read without modification.
pub struct LoadedOplog {
    /// Frame layout of the file.
    pub scan: FrameScan,
    /// Decoded entries, in optime order, paired with their frame offsets.
    pub entries: Vec<(u64, OplogEntry)>,
    /// Hole records of aborted slots, in optime order.
    pub holes: Vec<OplogSlot>,
}

/// Scans `path` and decodes every complete frame, entries and holes.
///
/// Frames are stored in completion order; the result is sorted by optime.
pub fn load(path: &Path) -> Result<LoadedOplog, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("oplog file {} not found", path.display()).into());
    }
    let backend = FileBackend::open(path)?;
    let scan = scan_frames(&backend)?;

    let mut entries = Vec::with_capacity(scan.frames.len());
    let mut holes = Vec::new();
    for frame in &scan.frames {
        if frame.kind == FrameKind::Hole {
            holes.push(read_hole(&backend, frame)?);
            continue;
        }
        let payload = read_frame_payload(&backend, frame)?;
        let entry = OplogEntry::decode(&payload)?;
        if entry.op_time() != frame.op_time {
            return Err(format!(
                "frame at offset {} is keyed {} but holds entry {}",
                frame.offset,
                frame.op_time,
                entry.op_time()
            )
            .into());
        }
        entries.push((frame.offset, entry));
    }
    entries.sort_by_key(|(_, entry)| entry.op_time());
    holes.sort_by_key(|hole| hole.op_time);
    Ok(LoadedOplog {
        scan,
        entries,
        holes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use replog_codec::Document;
    use replog_core::{
        build_entry, chain_hash, verify_chain, FramedOplogStore, OpDescriptor, OpTime, OplogStore,
        Timestamp, GENESIS_HASH, OPLOG_VERSION,
    };

    #[test]
    fn load_sorts_by_optime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.bin");

        let first = OpTime::new(Timestamp::new(10, 1), 1);
        let second = OpTime::new(Timestamp::new(10, 2), 1);
        let h1 = chain_hash(GENESIS_HASH, first, OPLOG_VERSION);
        let h2 = chain_hash(h1, second, OPLOG_VERSION);
        {
            let store = FramedOplogStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
            for (op_time, hash, id) in [(second, h2, 2), (first, h1, 1)] {
                let entry = build_entry(
                    OpDescriptor::insert("app.c", Document::new().with("_id", id)),
                    OplogSlot::new(op_time, hash),
                )
                .unwrap();
                store.raw_append(op_time, &entry.encode().unwrap()).unwrap();
            }
            store.flush(true).unwrap();
        }

        let loaded = load(&path).unwrap();
        assert!(!loaded.scan.has_torn_tail());
        let order: Vec<OpTime> = loaded.entries.iter().map(|(_, e)| e.op_time()).collect();
        assert_eq!(order, vec![first, second]);
        assert!(loaded.entries[0].0 > loaded.entries[1].0);
        assert!(loaded.holes.is_empty());
    }

    #[test]
    fn load_separates_hole_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oplog.bin");

        let first = OpTime::new(Timestamp::new(10, 1), 1);
        let skipped = OpTime::new(Timestamp::new(10, 2), 1);
        let h1 = chain_hash(GENESIS_HASH, first, OPLOG_VERSION);
        let hole = OplogSlot::new(skipped, chain_hash(h1, skipped, OPLOG_VERSION));
        {
            let store = FramedOplogStore::open(Box::new(FileBackend::open(&path).unwrap())).unwrap();
            let entry = build_entry(
                OpDescriptor::insert("app.c", Document::new().with("_id", 1)),
                OplogSlot::new(first, h1),
            )
            .unwrap();
            store.raw_append(first, &entry.encode().unwrap()).unwrap();
            store.record_hole(hole).unwrap();
            store.flush(true).unwrap();
        }

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.holes, vec![hole]);
        assert!(verify_chain(&[loaded.entries[0].1.clone()], &loaded.holes, None).is_intact());
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.bin")).is_err());
    }
}
