//! CRC32 helper shared by the pager, value log, WAL, and superblock.
//!
//! All on-disk checksums in StrandKV are CRC-32/ISO-HDLC (polynomial
//! 0xEDB88320, seed and final XOR 0xFFFFFFFF), the function `crc32fast`
//! implements. Keep every caller on this module so the format stays uniform.

pub use crc32fast::Hasher;

/// CRC32 over a single buffer.
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}
