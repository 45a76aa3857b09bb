//! Storage layer: pager, value log, write-ahead log, leaf-chain B+tree,
//! TTL clock, checkpoint hook, and the embeddable store facade.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub mod btree;
pub mod checkpoint;
pub mod checksum;
pub mod pager;
pub mod store;
pub mod ttl;
pub mod vlog;
pub mod wal;

pub use btree::{BTree, Record, RecordMetadata, RefKind, Value, ValueLogRef, ValueType};
pub use pager::{Page, Pager};
pub use store::Store;
pub use ttl::TtlClock;
pub use vlog::ValueLog;
pub use wal::WalManager;

// Core identifiers

/// Zero-based ordinal of a page within the page file.
pub type PageId = u64;

/// Log sequence number assigned by the WAL.
pub type Lsn = u64;

/// Identifier of a value-log or WAL segment file.
pub type SegmentId = u32;

/// Sentinel marking the end of the leaf chain.
pub const INVALID_PAGE_ID: PageId = u64::MAX;

/// Default page size in bytes.
pub const DEFAULT_PAGE_SIZE: u32 = 4096;

/// Disk pages carry one of these in their header. Values are stable; changing
/// them would invalidate existing page files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum PageType {
    Unknown = 0,
    Leaf = 1,
    Internal = 2,
    Manifest = 3,
}

impl From<u16> for PageType {
    fn from(value: u16) -> Self {
        match value {
            1 => PageType::Leaf,
            2 => PageType::Internal,
            3 => PageType::Manifest,
            _ => PageType::Unknown,
        }
    }
}

/// Pointer into a value-log or WAL spill segment.
///
/// The layout is shared between the value log, the WAL, and leaf entries so
/// that replay never has to re-interpret a pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentPointer {
    pub segment_id: SegmentId,
    pub offset: u64,
    pub length: u64,
}

// Segment file naming

fn format_segment_sequence(segment_id: SegmentId) -> String {
    format!("{:06}", segment_id as u64 + 1)
}

/// File name of a WAL segment, e.g. `wal-000001.log` for segment 0.
pub fn wal_segment_name(segment_id: SegmentId) -> String {
    format!("wal-{}.log", format_segment_sequence(segment_id))
}

/// Path of a WAL segment under `base_dir`.
pub fn wal_segment_path(base_dir: &Path, segment_id: SegmentId) -> PathBuf {
    base_dir.join(wal_segment_name(segment_id))
}
