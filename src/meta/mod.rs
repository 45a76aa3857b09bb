//! Durable metadata anchors: the manifest (format identity) and the
//! double-buffered superblock (root page, checkpoint LSN, TTL calibration).

pub mod manifest;
pub mod superblock;

pub use manifest::{Manifest, ManifestStore};
pub use superblock::{SuperBlock, SuperBlockStore};
