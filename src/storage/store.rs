//! Embeddable store facade: single-threaded composition of the metadata
//! pair, pager, value log, TTL clock, and leaf-chain tree.
//!
//! This is the API for embedding StrandKV without the transaction plane; the
//! server composes the same pieces itself and adds workers and the WAL.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;
use crate::meta::{Manifest, ManifestStore, SuperBlock, SuperBlockStore};
use crate::storage::btree::{BTree, BTreeConfig, Record};
use crate::storage::pager::Pager;
use crate::storage::ttl::TtlClock;
use crate::storage::vlog::ValueLog;
use crate::storage::wal::WalManager;
use crate::storage::PageId;

pub struct Store {
    db_dir: PathBuf,
    superblock_store: SuperBlockStore,
    manifest: Manifest,
    superblock: SuperBlock,
    tree: BTree,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub manifest: Manifest,
    pub superblock: SuperBlock,
    pub page_count: PageId,
    pub key_count: u64,
}

/// On-disk health report produced without opening the store for writing.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub ok: bool,
    pub has_manifest: bool,
    pub manifest_ok: bool,
    pub manifest_message: String,
    pub superblock_ok: bool,
    pub superblock_message: String,
    pub checkpoint_ok: bool,
    pub checkpoint_message: String,
}

impl Store {
    /// Open (or create) a database directory for embedded use.
    pub fn open(db_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(db_dir)?;

        let manifest_store = ManifestStore::new(db_dir);
        let manifest = match manifest_store.load() {
            Some(manifest) => manifest,
            None => {
                let mut fresh = ManifestStore::new_default(Uuid::new_v4().to_string());
                manifest_store.persist(&mut fresh)?;
                fresh
            }
        };

        let superblock_store = SuperBlockStore::new(db_dir);
        let mut superblock = superblock_store.load_active().unwrap_or_default();

        let calibration = TtlClock::calibrate_now();
        let pager = Pager::open(&db_dir.join("data.pages"), manifest.page_size)?;
        let value_log = ValueLog::open(&db_dir.join("vlog"))?;

        let tree = BTree::new(BTreeConfig {
            pager,
            value_log,
            inline_threshold: manifest.inline_threshold,
            root_hint: superblock.root_page_id,
            ttl_clock: Some(TtlClock::new(calibration)),
        })?;

        let mut needs_write = false;
        if superblock.generation == 0 {
            superblock.root_page_id = tree.root_page_id();
            needs_write = true;
        }
        if superblock.ttl_calibration != calibration {
            superblock.ttl_calibration = calibration;
            needs_write = true;
        }
        if needs_write {
            superblock_store.write_next(&superblock)?;
            if let Some(refreshed) = superblock_store.load_active() {
                superblock = refreshed;
            }
        }

        Ok(Self {
            db_dir: db_dir.to_path_buf(),
            superblock_store,
            manifest,
            superblock,
            tree,
        })
    }

    pub fn get(&self, key: &str) -> Option<Record> {
        self.tree.find(key)
    }

    pub fn set(&mut self, key: &str, record: Record) -> Result<()> {
        self.tree.insert(key, record)?;
        self.refresh_root()
    }

    /// Returns whether the key existed. Deleting a missing key leaves the
    /// page file untouched.
    pub fn delete(&mut self, key: &str) -> Result<bool> {
        let erased = self.tree.erase(key)?;
        if erased {
            self.refresh_root()?;
        }
        Ok(erased)
    }

    /// Force pages to durable media.
    pub fn sync(&self) -> Result<()> {
        self.tree.sync()
    }

    pub fn len(&self) -> u64 {
        self.tree.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            manifest: self.manifest.clone(),
            superblock: self.superblock,
            page_count: self.tree.pager().page_count(),
            key_count: self.tree.len() as u64,
        }
    }

    /// Inspect an existing database directory without mutating it.
    pub fn validate_on_disk(db_dir: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();

        let manifest_store = ManifestStore::new(db_dir);
        report.has_manifest = manifest_store.path().exists();
        match manifest_store.load() {
            Some(_) => {
                report.manifest_ok = true;
                report.manifest_message = "manifest valid".to_string();
            }
            None => {
                report.manifest_message = if report.has_manifest {
                    "manifest unreadable or invalid".to_string()
                } else {
                    "manifest missing".to_string()
                };
            }
        }

        let superblock = SuperBlockStore::new(db_dir).load_active();
        match &superblock {
            Some(active) => {
                report.superblock_ok = true;
                report.superblock_message = format!(
                    "active generation {} root {}",
                    active.generation, active.root_page_id
                );
            }
            None => {
                report.superblock_message = "no readable superblock slot".to_string();
            }
        }

        match superblock {
            Some(active) if active.last_checkpoint_lsn > 0 => {
                let replay = WalManager::replay_dir(db_dir);
                if replay.last_replayed >= active.last_checkpoint_lsn {
                    report.checkpoint_ok = true;
                    report.checkpoint_message =
                        format!("checkpoint lsn {} covered", active.last_checkpoint_lsn);
                } else {
                    report.checkpoint_message = format!(
                        "checkpoint lsn {} beyond replayable {}",
                        active.last_checkpoint_lsn, replay.last_replayed
                    );
                }
            }
            _ => {
                report.checkpoint_ok = true;
                report.checkpoint_message = "no checkpoint recorded".to_string();
            }
        }

        report.ok = report.manifest_ok && report.superblock_ok && report.checkpoint_ok;
        report
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn superblock(&self) -> SuperBlock {
        self.superblock
    }

    fn refresh_root(&mut self) -> Result<()> {
        if self.superblock.root_page_id != self.tree.root_page_id() {
            self.superblock.root_page_id = self.tree.root_page_id();
            self.superblock.generation = self.superblock_store.write_next(&self.superblock)?;
        }
        Ok(())
    }
}
