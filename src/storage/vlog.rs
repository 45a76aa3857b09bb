//! Append-only value log for records that exceed the inline threshold.
//!
//! Each segment is a sequence of `{u32 length, u32 crc32(payload), payload}`
//! records; a [`SegmentPointer`] addresses the length field.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, StrandError};
use crate::storage::checksum;
use crate::storage::{SegmentId, SegmentPointer};

/// Per-record header: length then payload CRC, both little-endian u32.
const RECORD_HEADER_SIZE: u64 = 8;

pub struct ValueLog {
    base_dir: PathBuf,
    next_pointer: SegmentPointer,
}

impl ValueLog {
    /// Open the value log directory, resuming the append offset of the
    /// active segment if it already exists.
    pub fn open(base_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;

        let mut next_pointer = SegmentPointer::default();
        let segment_path = Self::segment_path_in(base_dir, 0);
        if segment_path.exists() {
            next_pointer.segment_id = 0;
            next_pointer.offset = std::fs::metadata(&segment_path)?.len();
        }

        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            next_pointer,
        })
    }

    /// Append a payload to the active segment and return its pointer.
    pub fn append(&mut self, data: &[u8]) -> Result<SegmentPointer> {
        let segment_path = self.segment_path(self.next_pointer.segment_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&segment_path)
            .map_err(|e| StrandError::Storage(format!("value log segment open: {}", e)))?;

        let length = data.len() as u32;
        let crc = checksum::crc32(data);

        file.write_all(&length.to_le_bytes())?;
        file.write_all(&crc.to_le_bytes())?;
        file.write_all(data)?;
        file.flush()?;

        let pointer = SegmentPointer {
            segment_id: self.next_pointer.segment_id,
            offset: self.next_pointer.offset,
            length: data.len() as u64,
        };
        self.next_pointer.offset += RECORD_HEADER_SIZE + data.len() as u64;
        Ok(pointer)
    }

    /// Read the payload a pointer addresses. Returns `None` on any I/O
    /// failure or CRC mismatch.
    pub fn read(&self, pointer: &SegmentPointer) -> Option<Vec<u8>> {
        let segment_path = self.segment_path(pointer.segment_id);
        let mut file = std::fs::File::open(segment_path).ok()?;
        file.seek(SeekFrom::Start(pointer.offset)).ok()?;

        let mut header = [0u8; RECORD_HEADER_SIZE as usize];
        file.read_exact(&mut header).ok()?;
        let length = u32::from_le_bytes(header[0..4].try_into().unwrap());
        let stored_crc = u32::from_le_bytes(header[4..8].try_into().unwrap());

        let mut data = vec![0u8; length as usize];
        file.read_exact(&mut data).ok()?;

        if checksum::crc32(&data) != stored_crc {
            tracing::warn!(
                segment_id = pointer.segment_id,
                offset = pointer.offset,
                "value log record checksum mismatch"
            );
            return None;
        }
        Some(data)
    }

    /// Reserved hook for segment compaction. No-op until checkpoint-driven
    /// liveness tracking lands.
    pub fn run_gc_cycle(&mut self) {}

    pub fn segment_path(&self, segment_id: SegmentId) -> PathBuf {
        Self::segment_path_in(&self.base_dir, segment_id)
    }

    fn segment_path_in(base_dir: &Path, segment_id: SegmentId) -> PathBuf {
        base_dir.join(format!("segment-{}.vlog", segment_id))
    }
}
