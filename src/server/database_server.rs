//! Core server: owns the storage stack, recovers from the WAL at open, and
//! runs the worker pool that executes transactions serializably.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use uuid::Uuid;

use crate::config::Config;
use crate::error::Result;
use crate::lock::LockManager;
use crate::meta::{Manifest, ManifestStore, SuperBlock, SuperBlockStore};
use crate::server::receiver::TransactionReceiver;
use crate::server::worker::{CompletionFn, TransactionResult, Worker, WorkerContext};
use crate::storage::btree::{BTree, BTreeConfig, Record};
use crate::storage::checkpoint::Checkpointer;
use crate::storage::pager::Pager;
use crate::storage::ttl::TtlClock;
use crate::storage::vlog::ValueLog;
use crate::storage::wal::{ReplayResult, WalManager, WalRecord, WalRecordType};
use crate::txn::TransactionRequest;

struct ResultsQueue {
    completed: Mutex<Vec<TransactionResult>>,
    available: Condvar,
}

pub struct DatabaseServer {
    base_dir: PathBuf,
    manifest: Manifest,
    superblock: Mutex<SuperBlock>,
    ttl_clock: TtlClock,
    worker_count: usize,
    receiver: Arc<TransactionReceiver>,
    lock_manager: Arc<LockManager>,
    tree: Arc<RwLock<BTree>>,
    wal: Arc<Mutex<WalManager>>,
    workers: Mutex<Vec<Worker>>,
    results: Arc<ResultsQueue>,
    running: AtomicBool,
}

impl DatabaseServer {
    /// Open the database directory and bring the tree up to date with the
    /// WAL. `worker_count` of 0 means "use available parallelism".
    pub fn open(config: &Config, worker_count: usize) -> Result<Self> {
        config.validate()?;
        let base_dir = config.db_path.clone();
        std::fs::create_dir_all(&base_dir)?;

        let manifest_store = ManifestStore::new(&base_dir);
        let manifest = match manifest_store.load() {
            Some(manifest) => manifest,
            None => {
                let mut fresh = ManifestStore::new_default(Uuid::new_v4().to_string());
                fresh.page_size = config.page_size;
                fresh.inline_threshold = config.inline_threshold;
                manifest_store.persist(&mut fresh)?;
                tracing::info!(db_uuid = %fresh.db_uuid, "created fresh manifest");
                fresh
            }
        };

        let superblock_store = SuperBlockStore::new(&base_dir);
        let mut superblock = superblock_store.load_active().unwrap_or_default();

        let calibration = TtlClock::calibrate_now();
        let ttl_clock = TtlClock::new(calibration);

        let pager = Pager::open(&base_dir.join("data.pages"), manifest.page_size)?;
        let value_log = ValueLog::open(&base_dir.join("vlog"))?;
        let mut wal = WalManager::open_with_window(
            &base_dir,
            Duration::from_millis(config.group_commit_max_latency_ms as u64),
        )?;

        let mut tree = BTree::new(BTreeConfig {
            pager,
            value_log,
            inline_threshold: manifest.inline_threshold,
            root_hint: superblock.root_page_id,
            ttl_clock: Some(ttl_clock),
        })?;

        // Recovery: re-apply committed transactions the page store may have
        // missed, then checkpoint so the next open starts past them.
        let replay = wal.replay();
        let applied = Self::apply_committed(&mut tree, &replay, superblock.last_checkpoint_lsn)?;
        if applied > 0 {
            tracing::info!(applied, "recovered committed WAL records");
        }

        let mut checkpointer = Checkpointer::new();
        checkpointer.request_checkpoint(replay.last_replayed);
        checkpointer.run_once(|_lsn| {
            tree.sync()?;
            Ok(tree.pager().page_count())
        })?;
        let checkpoint_lsn = wal.append(WalRecord::marker(WalRecordType::Checkpoint, 0))?;
        wal.flush()?;

        superblock.root_page_id = tree.root_page_id();
        superblock.last_checkpoint_lsn = checkpoint_lsn;
        superblock.ttl_calibration = calibration;
        superblock.generation = superblock_store.write_next(&superblock)?;

        Ok(Self {
            base_dir,
            manifest,
            superblock: Mutex::new(superblock),
            ttl_clock,
            worker_count: resolve_worker_count(worker_count),
            receiver: Arc::new(TransactionReceiver::default()),
            lock_manager: Arc::new(LockManager::new()),
            tree: Arc::new(RwLock::new(tree)),
            wal: Arc::new(Mutex::new(wal)),
            workers: Mutex::new(Vec::new()),
            results: Arc::new(ResultsQueue {
                completed: Mutex::new(Vec::new()),
                available: Condvar::new(),
            }),
            running: AtomicBool::new(false),
        })
    }

    /// Convenience open with defaults rooted at `base_dir`.
    pub fn open_dir(base_dir: &Path, worker_count: usize) -> Result<Self> {
        Self::open(&Config::default_for(base_dir), worker_count)
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock();
        for i in 0..self.worker_count {
            let results = Arc::clone(&self.results);
            let on_complete: Arc<CompletionFn> = Arc::new(move |result| {
                results.completed.lock().push(result);
                results.available.notify_all();
            });

            let context = Arc::new(WorkerContext {
                receiver: Arc::clone(&self.receiver),
                lock_manager: Arc::clone(&self.lock_manager),
                tree: Arc::clone(&self.tree),
                wal: Arc::clone(&self.wal),
                on_complete,
            });

            let mut worker = Worker::new(format!("worker-{}", i), context);
            worker.start();
            workers.push(worker);
        }
        tracing::info!(workers = self.worker_count, "server started");
    }

    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.receiver.stop();
        let mut workers = self.workers.lock();
        for worker in workers.iter_mut() {
            worker.stop();
        }
        workers.clear();
        self.results.available.notify_all();
        tracing::info!("server stopped");
    }

    /// Enqueue a transaction. Refused when the server is stopped, the
    /// request is structurally invalid, or the queue is full.
    pub fn submit_transaction(&self, request: TransactionRequest) -> bool {
        if !self.running() {
            return false;
        }
        if !request.is_valid() {
            return false;
        }
        self.receiver.enqueue(request)
    }

    /// Take every accumulated result, in commit-completion order.
    pub fn drain_completed(&self) -> Vec<TransactionResult> {
        std::mem::take(&mut *self.results.completed.lock())
    }

    /// Block until a result is available or the server stops; true when
    /// either holds before the timeout.
    pub fn wait_for_results(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.results.completed.lock();
        while completed.is_empty() && self.running() {
            if self
                .results
                .available
                .wait_until(&mut completed, deadline)
                .timed_out()
            {
                break;
            }
        }
        !completed.is_empty() || !self.running()
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn superblock(&self) -> SuperBlock {
        *self.superblock.lock()
    }

    pub fn ttl_clock(&self) -> &TtlClock {
        &self.ttl_clock
    }

    pub fn backlog(&self) -> usize {
        self.receiver.backlog()
    }

    /// Direct read against the committed tree, outside any transaction.
    pub fn read_committed(&self, key: &str) -> Option<Record> {
        self.tree.read().find(key)
    }

    /// Apply committed upserts and tombstones past the checkpoint horizon.
    fn apply_committed(
        tree: &mut BTree,
        replay: &ReplayResult,
        last_checkpoint_lsn: u64,
    ) -> Result<u64> {
        let committed_txns: std::collections::HashSet<u64> = replay
            .committed
            .iter()
            .filter(|record| record.record_type == WalRecordType::TxnCommit)
            .map(|record| record.txn_id)
            .collect();

        let mut applied = 0;
        for record in &replay.committed {
            if record.lsn <= last_checkpoint_lsn || !committed_txns.contains(&record.txn_id) {
                continue;
            }
            match record.record_type {
                WalRecordType::Upsert => {
                    if let Some(upsert) = &record.upsert {
                        tree.insert(
                            &upsert.key,
                            Record::with_ttl(upsert.value.clone(), upsert.ttl_epoch_seconds),
                        )?;
                        applied += 1;
                    }
                }
                WalRecordType::Tombstone => {
                    if let Some(key) = &record.tombstone_key {
                        tree.erase(key)?;
                        applied += 1;
                    }
                }
                _ => {}
            }
        }
        Ok(applied)
    }
}

impl Drop for DatabaseServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn resolve_worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
