//! Write-ahead log: durable ordered record of transactional intent.
//!
//! Records are framed as `{u32 size, bincode(FramedRecord)}` where the framed
//! form carries its own CRC over a canonical byte order. Replay parses frames
//! in append order and stops at the first frame that fails to parse or
//! CRC-check, discarding any torn tail.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};
use crate::storage::btree::Value;
use crate::storage::checksum;
use crate::storage::{wal_segment_path, Lsn, SegmentId};

/// Upper bound on a single framed record; anything larger is treated as a
/// torn or corrupt frame.
const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Default fsync coalescing window for the append path.
pub const DEFAULT_GROUP_COMMIT_WINDOW: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecordType {
    TxnBegin,
    Upsert,
    Tombstone,
    TxnCommit,
    TxnAbort,
    Checkpoint,
}

impl WalRecordType {
    fn tag(self) -> u8 {
        match self {
            WalRecordType::TxnBegin => 0,
            WalRecordType::Upsert => 1,
            WalRecordType::Tombstone => 2,
            WalRecordType::TxnCommit => 3,
            WalRecordType::TxnAbort => 4,
            WalRecordType::Checkpoint => 5,
        }
    }
}

/// Payload of an upsert record. The value keeps its scalar kind so replay
/// reconstructs the exact record; spilled values arrive here as references
/// and are never re-appended to the value log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertPayload {
    pub key: String,
    pub value: Value,
    pub ttl_epoch_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalRecord {
    pub record_type: WalRecordType,
    pub lsn: Lsn,
    pub txn_id: u64,
    pub upsert: Option<UpsertPayload>,
    pub tombstone_key: Option<String>,
}

impl WalRecord {
    pub fn marker(record_type: WalRecordType, txn_id: u64) -> Self {
        Self {
            record_type,
            lsn: 0,
            txn_id,
            upsert: None,
            tombstone_key: None,
        }
    }

    pub fn upsert(txn_id: u64, payload: UpsertPayload) -> Self {
        Self {
            record_type: WalRecordType::Upsert,
            lsn: 0,
            txn_id,
            upsert: Some(payload),
            tombstone_key: None,
        }
    }

    pub fn tombstone(txn_id: u64, key: String) -> Self {
        Self {
            record_type: WalRecordType::Tombstone,
            lsn: 0,
            txn_id,
            upsert: None,
            tombstone_key: Some(key),
        }
    }
}

/// On-disk form: the record plus a CRC over its canonical byte order.
#[derive(Serialize, Deserialize)]
struct FramedRecord {
    record: WalRecord,
    crc: u32,
}

#[derive(Debug, Default)]
pub struct ReplayResult {
    pub last_replayed: Lsn,
    pub committed: Vec<WalRecord>,
}

pub struct WalManager {
    wal_dir: PathBuf,
    wal_path: PathBuf,
    file: File,
    next_lsn: Lsn,
    group_commit_window: Duration,
    last_sync: Instant,
    pending_sync: bool,
}

impl WalManager {
    /// Open the WAL under `base_dir`, scanning existing segments to resume
    /// the LSN sequence.
    pub fn open(base_dir: &Path) -> Result<Self> {
        Self::open_with_window(base_dir, DEFAULT_GROUP_COMMIT_WINDOW)
    }

    pub fn open_with_window(base_dir: &Path, group_commit_window: Duration) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        let wal_path = wal_segment_path(base_dir, 0);

        let replay = Self::replay_segments(base_dir);
        let next_lsn = replay.last_replayed + 1;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .map_err(|e| StrandError::Wal(format!("open {}: {}", wal_path.display(), e)))?;

        Ok(Self {
            wal_dir: base_dir.to_path_buf(),
            wal_path,
            file,
            next_lsn,
            group_commit_window,
            last_sync: Instant::now(),
            pending_sync: false,
        })
    }

    /// Assign the next LSN to `record` and append it to the active segment.
    /// Syncs are coalesced by the group-commit window; call [`Self::flush`]
    /// for a durability point.
    pub fn append(&mut self, mut record: WalRecord) -> Result<Lsn> {
        record.lsn = self.next_lsn;
        self.next_lsn += 1;

        let crc = record_crc(&record);
        let framed = FramedRecord { record, crc };
        let bytes = bincode::serialize(&framed)
            .map_err(|e| StrandError::Wal(format!("record serialization: {}", e)))?;
        if bytes.len() as u32 > MAX_FRAME_SIZE {
            return Err(StrandError::Wal(format!(
                "record of {} bytes exceeds frame limit",
                bytes.len()
            )));
        }

        self.file
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .and_then(|()| self.file.write_all(&bytes))
            .map_err(|e| StrandError::Wal(format!("append: {}", e)))?;
        self.pending_sync = true;

        if self.group_commit_window.is_zero()
            || self.last_sync.elapsed() >= self.group_commit_window
        {
            self.flush()?;
        }

        Ok(framed.record.lsn)
    }

    /// Force appended records to durable media.
    pub fn flush(&mut self) -> Result<()> {
        if self.pending_sync {
            self.file
                .sync_data()
                .map_err(|e| StrandError::Wal(format!("sync: {}", e)))?;
            self.pending_sync = false;
        }
        self.last_sync = Instant::now();
        Ok(())
    }

    /// Re-read every segment in order, yielding records up to the first
    /// frame that fails to parse or CRC-check.
    pub fn replay(&self) -> ReplayResult {
        Self::replay_segments(&self.wal_dir)
    }

    /// Replay a WAL directory without opening it for writing (creates
    /// nothing on disk).
    pub fn replay_dir(base_dir: &Path) -> ReplayResult {
        Self::replay_segments(base_dir)
    }

    pub fn next_lsn(&self) -> Lsn {
        self.next_lsn
    }

    pub fn segment_path(&self) -> &Path {
        &self.wal_path
    }

    fn replay_segments(base_dir: &Path) -> ReplayResult {
        let mut result = ReplayResult::default();

        let mut segment_id: SegmentId = 0;
        loop {
            let path = wal_segment_path(base_dir, segment_id);
            if !path.exists() {
                break;
            }
            if !Self::replay_segment(&path, &mut result) {
                break;
            }
            segment_id += 1;
        }

        result
    }

    /// Returns false when replay hit a bad frame and must stop for good.
    fn replay_segment(path: &Path, result: &mut ReplayResult) -> bool {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(_) => return false,
        };
        let mut reader = BufReader::new(file);

        loop {
            let mut size_buf = [0u8; 4];
            match reader.read_exact(&mut size_buf) {
                Ok(()) => {}
                Err(_) => return true, // clean end of segment
            }
            let size = u32::from_le_bytes(size_buf);
            if size == 0 || size > MAX_FRAME_SIZE {
                tracing::warn!(path = %path.display(), size, "invalid WAL frame size, stopping replay");
                return false;
            }

            let mut frame = vec![0u8; size as usize];
            if reader.read_exact(&mut frame).is_err() {
                tracing::warn!(path = %path.display(), "torn WAL tail discarded");
                return false;
            }

            let framed: FramedRecord = match bincode::deserialize(&frame) {
                Ok(framed) => framed,
                Err(_) => {
                    tracing::warn!(path = %path.display(), "unparseable WAL frame, stopping replay");
                    return false;
                }
            };
            if record_crc(&framed.record) != framed.crc {
                tracing::warn!(
                    path = %path.display(),
                    lsn = framed.record.lsn,
                    "WAL record checksum mismatch, stopping replay"
                );
                return false;
            }

            result.last_replayed = framed.record.lsn;
            result.committed.push(framed.record);
        }
    }
}

/// CRC over the canonical byte form: type tag, lsn, txn_id, then the payload
/// fields in a fixed order. Must stay stable across releases; it is what
/// replay verifies.
fn record_crc(record: &WalRecord) -> u32 {
    let mut hasher = checksum::Hasher::new();
    hasher.update(&[record.record_type.tag()]);
    hasher.update(&record.lsn.to_le_bytes());
    hasher.update(&record.txn_id.to_le_bytes());

    if let Some(upsert) = &record.upsert {
        hasher.update(&upsert.ttl_epoch_seconds.to_le_bytes());
        hasher.update(&(upsert.key.len() as u32).to_le_bytes());
        hasher.update(upsert.key.as_bytes());
        match &upsert.value {
            Value::Bytes(bytes) => {
                hasher.update(&[0]);
                hasher.update(&(bytes.len() as u32).to_le_bytes());
                hasher.update(bytes);
            }
            Value::Str(s) => {
                hasher.update(&[1]);
                hasher.update(&(s.len() as u32).to_le_bytes());
                hasher.update(s.as_bytes());
            }
            Value::I64(v) => {
                hasher.update(&[2]);
                hasher.update(&v.to_le_bytes());
            }
            Value::Ref(r) => {
                hasher.update(&[3]);
                hasher.update(&r.pointer.segment_id.to_le_bytes());
                hasher.update(&r.pointer.offset.to_le_bytes());
                hasher.update(&r.pointer.length.to_le_bytes());
            }
        }
    } else if let Some(key) = &record.tombstone_key {
        hasher.update(&(key.len() as u32).to_le_bytes());
        hasher.update(key.as_bytes());
    }

    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::btree::{RefKind, ValueLogRef};
    use crate::storage::SegmentPointer;
    use tempfile::tempdir;

    fn sample_upsert(txn_id: u64, key: &str, value: Value) -> WalRecord {
        WalRecord::upsert(
            txn_id,
            UpsertPayload {
                key: key.to_string(),
                value,
                ttl_epoch_seconds: 0,
            },
        )
    }

    #[test]
    fn append_assigns_monotonic_lsns() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open(dir.path()).unwrap();

        let a = wal
            .append(WalRecord::marker(WalRecordType::TxnBegin, 1))
            .unwrap();
        let b = wal.append(sample_upsert(1, "k", Value::I64(7))).unwrap();
        let c = wal
            .append(WalRecord::marker(WalRecordType::TxnCommit, 1))
            .unwrap();

        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(wal.next_lsn(), 4);
    }

    #[test]
    fn replay_roundtrips_all_record_shapes() {
        let dir = tempdir().unwrap();
        let mut wal = WalManager::open(dir.path()).unwrap();

        wal.append(WalRecord::marker(WalRecordType::TxnBegin, 9))
            .unwrap();
        wal.append(sample_upsert(9, "inline", Value::Str("v".into())))
            .unwrap();
        wal.append(sample_upsert(
            9,
            "spilled",
            Value::Ref(ValueLogRef {
                pointer: SegmentPointer {
                    segment_id: 0,
                    offset: 64,
                    length: 2048,
                },
                kind: RefKind::String,
            }),
        ))
        .unwrap();
        wal.append(WalRecord::tombstone(9, "gone".into())).unwrap();
        wal.append(WalRecord::marker(WalRecordType::TxnCommit, 9))
            .unwrap();
        wal.flush().unwrap();

        let replay = wal.replay();
        assert_eq!(replay.last_replayed, 5);
        assert_eq!(replay.committed.len(), 5);
        assert_eq!(replay.committed[0].record_type, WalRecordType::TxnBegin);
        assert_eq!(
            replay.committed[1].upsert.as_ref().unwrap().value,
            Value::Str("v".into())
        );
        assert!(matches!(
            replay.committed[2].upsert.as_ref().unwrap().value,
            Value::Ref(_)
        ));
        assert_eq!(
            replay.committed[3].tombstone_key.as_deref(),
            Some("gone")
        );
        assert_eq!(replay.committed[4].record_type, WalRecordType::TxnCommit);
    }

    #[test]
    fn lsn_sequence_resumes_after_reopen() {
        let dir = tempdir().unwrap();
        {
            let mut wal = WalManager::open(dir.path()).unwrap();
            wal.append(WalRecord::marker(WalRecordType::TxnBegin, 1))
                .unwrap();
            wal.append(WalRecord::marker(WalRecordType::TxnCommit, 1))
                .unwrap();
            wal.flush().unwrap();
        }

        let mut wal = WalManager::open(dir.path()).unwrap();
        assert_eq!(wal.next_lsn(), 3);
        let lsn = wal
            .append(WalRecord::marker(WalRecordType::Checkpoint, 0))
            .unwrap();
        assert_eq!(lsn, 3);
    }

    #[test]
    fn flipped_bit_halts_replay_at_the_bad_frame() {
        let dir = tempdir().unwrap();
        let segment = {
            let mut wal = WalManager::open(dir.path()).unwrap();
            for i in 0..3 {
                wal.append(sample_upsert(1, &format!("k{}", i), Value::I64(i)))
                    .unwrap();
            }
            wal.flush().unwrap();
            wal.segment_path().to_path_buf()
        };

        // Corrupt a byte inside the second frame's body.
        let mut bytes = std::fs::read(&segment).unwrap();
        let first_frame_size = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let second_frame_body = 4 + first_frame_size + 4 + 10;
        bytes[second_frame_body] ^= 0xFF;
        std::fs::write(&segment, bytes).unwrap();

        let wal = WalManager::open(dir.path()).unwrap();
        let replay = wal.replay();
        assert_eq!(replay.committed.len(), 1);
        assert_eq!(replay.last_replayed, 1);
    }

    #[test]
    fn truncated_tail_is_discarded() {
        let dir = tempdir().unwrap();
        let segment = {
            let mut wal = WalManager::open(dir.path()).unwrap();
            wal.append(sample_upsert(1, "a", Value::I64(1))).unwrap();
            wal.append(sample_upsert(1, "b", Value::I64(2))).unwrap();
            wal.flush().unwrap();
            wal.segment_path().to_path_buf()
        };

        let bytes = std::fs::read(&segment).unwrap();
        std::fs::write(&segment, &bytes[..bytes.len() - 3]).unwrap();

        let wal = WalManager::open(dir.path()).unwrap();
        let replay = wal.replay();
        assert_eq!(replay.committed.len(), 1);
        assert_eq!(replay.last_replayed, 1);
    }

    #[test]
    fn segment_zero_uses_padded_name() {
        let dir = tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        assert!(wal
            .segment_path()
            .ends_with("wal-000001.log"));
    }
}
