//! Manifest: the database's format identity record.
//!
//! Stored as `MANIFEST` in the database directory: a 4-byte file identifier,
//! a u32 length, the bincode payload, and a trailing CRC32 over the payload.
//! The manifest pins page size and inline threshold; the rest of the stack
//! assumes those stay stable for the lifetime of the database.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrandError};
use crate::storage::checksum;

/// File identifier at the head of the MANIFEST file.
const MANIFEST_MAGIC: &[u8; 4] = b"SKVM";

const MANIFEST_FILE: &str = "MANIFEST";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Strictly increases on every rewrite.
    pub generation: u64,
    pub format_major: u16,
    pub format_minor: u16,
    pub page_size: u32,
    pub inline_threshold: u32,
    pub db_uuid: String,
    pub wire_schema: String,
    pub disk_schema: String,
    pub wal_schema: String,
    pub hash_algorithm: String,
}

pub struct ManifestStore {
    manifest_path: PathBuf,
}

impl ManifestStore {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            manifest_path: base_dir.join(MANIFEST_FILE),
        }
    }

    /// A fresh manifest with default format parameters.
    pub fn new_default(db_uuid: String) -> Manifest {
        Manifest {
            generation: 0,
            format_major: 1,
            format_minor: 0,
            page_size: 4096,
            inline_threshold: 1024,
            db_uuid,
            wire_schema: "wire-v1".to_string(),
            disk_schema: "disk-v1".to_string(),
            wal_schema: "wal-v1".to_string(),
            hash_algorithm: "sha256".to_string(),
        }
    }

    /// Load and re-validate the manifest. Any identifier, length, CRC,
    /// decode, or invariant failure reads as "no manifest".
    pub fn load(&self) -> Option<Manifest> {
        let bytes = std::fs::read(&self.manifest_path).ok()?;
        if bytes.len() < 12 || &bytes[0..4] != MANIFEST_MAGIC {
            return None;
        }

        let length = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
        if bytes.len() != 8 + length + 4 {
            return None;
        }

        let payload = &bytes[8..8 + length];
        let stored_crc = u32::from_le_bytes(bytes[8 + length..].try_into().unwrap());
        if checksum::crc32(payload) != stored_crc {
            tracing::warn!("manifest checksum mismatch");
            return None;
        }

        let manifest: Manifest = bincode::deserialize(payload).ok()?;
        if Self::validate(&manifest).is_err() {
            return None;
        }
        Some(manifest)
    }

    /// Validate, bump the generation past the on-disk one, and write the
    /// manifest atomically (temp file + rename).
    pub fn persist(&self, manifest: &mut Manifest) -> Result<()> {
        Self::validate(manifest)?;

        if let Some(parent) = self.manifest_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let current_generation = self.load().map(|m| m.generation).unwrap_or(0);
        manifest.generation = current_generation + 1;

        let payload = bincode::serialize(manifest)
            .map_err(|e| StrandError::Storage(format!("manifest serialization: {}", e)))?;

        let mut bytes = Vec::with_capacity(12 + payload.len());
        bytes.extend_from_slice(MANIFEST_MAGIC);
        bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(&checksum::crc32(&payload).to_le_bytes());

        let tmp_path = self.manifest_path.with_extension("tmp");
        std::fs::write(&tmp_path, &bytes)?;
        std::fs::rename(&tmp_path, &self.manifest_path)?;
        Ok(())
    }

    pub fn validate(manifest: &Manifest) -> Result<()> {
        let fail = |message: &str| Err(StrandError::InvalidInput(message.to_string()));

        if manifest.format_major == 0 {
            return fail("format_major must be non-zero");
        }
        if manifest.page_size == 0 {
            return fail("page_size must be non-zero");
        }
        if manifest.inline_threshold == 0 || manifest.inline_threshold >= manifest.page_size {
            return fail("inline_threshold must be within (0, page_size)");
        }
        if manifest.db_uuid.is_empty() {
            return fail("db_uuid must be populated");
        }
        if manifest.wire_schema.is_empty() {
            return fail("wire_schema must be populated");
        }
        if manifest.disk_schema.is_empty() {
            return fail("disk_schema must be populated");
        }
        if manifest.wal_schema.is_empty() {
            return fail("wal_schema must be populated");
        }
        if manifest.hash_algorithm.is_empty() {
            return fail("hash_algorithm must be populated");
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.manifest_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn persist_then_load_roundtrip() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());

        let mut manifest = ManifestStore::new_default("uuid-1".into());
        store.persist(&mut manifest).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.page_size, 4096);
        assert_eq!(loaded.inline_threshold, 1024);
        assert_eq!(loaded.hash_algorithm, "sha256");
    }

    #[test]
    fn generation_increments_on_each_rewrite() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());

        let mut manifest = ManifestStore::new_default("uuid-2".into());
        store.persist(&mut manifest).unwrap();
        assert_eq!(manifest.generation, 1);

        store.persist(&mut manifest).unwrap();
        assert_eq!(manifest.generation, 2);
        assert_eq!(store.load().unwrap().generation, 2);
    }

    #[test]
    fn missing_manifest_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(ManifestStore::new(dir.path()).load().is_none());
    }

    #[test]
    fn corrupted_manifest_loads_as_none() {
        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut manifest = ManifestStore::new_default("uuid-3".into());
        store.persist(&mut manifest).unwrap();

        let mut bytes = std::fs::read(store.path()).unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0xFF;
        std::fs::write(store.path(), bytes).unwrap();

        assert!(store.load().is_none());
    }

    #[test]
    fn rejects_invalid_invariants() {
        let mut manifest = ManifestStore::new_default("uuid".into());
        manifest.inline_threshold = manifest.page_size;
        assert!(ManifestStore::validate(&manifest).is_err());

        let mut manifest = ManifestStore::new_default("uuid".into());
        manifest.format_major = 0;
        assert!(ManifestStore::validate(&manifest).is_err());

        let manifest = ManifestStore::new_default(String::new());
        assert!(ManifestStore::validate(&manifest).is_err());

        let dir = tempdir().unwrap();
        let store = ManifestStore::new(dir.path());
        let mut bad = ManifestStore::new_default("uuid".into());
        bad.wal_schema = String::new();
        assert!(store.persist(&mut bad).is_err());
        assert!(store.load().is_none());
    }
}
