//! Double-buffered superblock: the durable anchor for the active root page,
//! last checkpoint LSN, and TTL calibration.
//!
//! Two fixed-size slots, `SUPERBLOCK_A` and `SUPERBLOCK_B`, alternate by
//! generation parity (odd writes land in A, even in B). The active slot is
//! the CRC-valid one with the higher generation, so a torn write of one slot
//! falls back to the other.

use std::path::{Path, PathBuf};

use crate::error::{Result, StrandError};
use crate::storage::checksum;
use crate::storage::ttl::Calibration;
use crate::storage::{Lsn, PageId};

/// Serialized size: five u64 fields plus a u64 CRC slot.
const SUPERBLOCK_SIZE: usize = 48;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuperBlock {
    pub generation: u64,
    pub root_page_id: PageId,
    pub last_checkpoint_lsn: Lsn,
    pub ttl_calibration: Calibration,
}

pub struct SuperBlockStore {
    path_a: PathBuf,
    path_b: PathBuf,
}

impl SuperBlockStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            path_a: base_dir.join("SUPERBLOCK_A"),
            path_b: base_dir.join("SUPERBLOCK_B"),
        }
    }

    /// The CRC-valid slot with the higher generation; A wins ties. `None`
    /// when neither slot is readable.
    pub fn load_active(&self) -> Option<SuperBlock> {
        let block_a = Self::read_slot(&self.path_a);
        let block_b = Self::read_slot(&self.path_b);

        match (block_a, block_b) {
            (Some(a), Some(b)) => Some(if a.generation >= b.generation { a } else { b }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }

    /// Write the next generation of `superblock` into the slot selected by
    /// generation parity. Returns the generation that was assigned.
    pub fn write_next(&self, superblock: &SuperBlock) -> Result<u64> {
        let next_generation = self
            .load_active()
            .map(|current| current.generation + 1)
            .unwrap_or(1);

        let target = if next_generation % 2 == 1 {
            &self.path_a
        } else {
            &self.path_b
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..8].copy_from_slice(&next_generation.to_le_bytes());
        buf[8..16].copy_from_slice(&superblock.root_page_id.to_le_bytes());
        buf[16..24].copy_from_slice(&superblock.last_checkpoint_lsn.to_le_bytes());
        buf[24..32].copy_from_slice(
            &superblock
                .ttl_calibration
                .wall_clock_unix_seconds
                .to_le_bytes(),
        );
        buf[32..40].copy_from_slice(&superblock.ttl_calibration.monotonic_time_nanos.to_le_bytes());
        let crc = checksum::crc32(&buf[0..40]) as u64;
        buf[40..48].copy_from_slice(&crc.to_le_bytes());

        std::fs::write(target, buf)
            .map_err(|e| StrandError::Storage(format!("superblock write: {}", e)))?;
        Ok(next_generation)
    }

    fn read_slot(path: &Path) -> Option<SuperBlock> {
        let bytes = std::fs::read(path).ok()?;
        if bytes.len() != SUPERBLOCK_SIZE {
            return None;
        }

        let stored_crc = u64::from_le_bytes(bytes[40..48].try_into().unwrap());
        if checksum::crc32(&bytes[0..40]) as u64 != stored_crc {
            tracing::warn!(path = %path.display(), "superblock slot checksum mismatch");
            return None;
        }

        Some(SuperBlock {
            generation: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            root_page_id: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            last_checkpoint_lsn: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            ttl_calibration: Calibration {
                wall_clock_unix_seconds: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
                monotonic_time_nanos: u64::from_le_bytes(bytes[32..40].try_into().unwrap()),
            },
        })
    }

    pub fn path_a(&self) -> &Path {
        &self.path_a
    }

    pub fn path_b(&self) -> &Path {
        &self.path_b
    }
}
