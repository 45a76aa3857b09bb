//! Worker threads: dequeue a request, lock its keys, apply operations
//! against the overlay, and commit atomically through the WAL and tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, RwLock};

use crate::error::Result;
use crate::lock::LockManager;
use crate::server::receiver::TransactionReceiver;
use crate::storage::btree::{BTree, Record};
use crate::storage::wal::{UpsertPayload, WalManager, WalRecord, WalRecordType};
use crate::txn::{
    Operation, OperationType, TransactionContext, TransactionRequest, TransactionState,
};

/// Outcome of a single operation inside a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationResult {
    pub op_type: OperationType,
    pub key_id: u32,
    pub key: String,
    pub success: bool,
    pub value: Option<Record>,
}

impl OperationResult {
    fn pending(operation: &Operation, key: &str) -> Self {
        Self {
            op_type: operation.op_type,
            key_id: operation.key_id,
            key: key.to_string(),
            success: false,
            value: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    pub id: u64,
    pub state: TransactionState,
    pub operations: Vec<OperationResult>,
}

pub type CompletionFn = dyn Fn(TransactionResult) + Send + Sync;

/// Everything a worker thread shares with its peers.
pub(crate) struct WorkerContext {
    pub receiver: Arc<TransactionReceiver>,
    pub lock_manager: Arc<LockManager>,
    pub tree: Arc<RwLock<BTree>>,
    pub wal: Arc<Mutex<WalManager>>,
    pub on_complete: Arc<CompletionFn>,
}

pub struct Worker {
    name: String,
    context: Arc<WorkerContext>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(name: String, context: Arc<WorkerContext>) -> Self {
        Self {
            name,
            context,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let context = Arc::clone(&self.context);
        let running = Arc::clone(&self.running);
        let name = self.name.clone();
        self.handle = Some(
            std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    tracing::debug!(worker = %name, "worker started");
                    context.run(&running);
                    tracing::debug!(worker = %name, "worker stopped");
                })
                .expect("failed to spawn worker thread"),
        );
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.context.receiver.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WorkerContext {
    fn run(&self, running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            let Some(request) = self.receiver.next() else {
                if self.receiver.stopped() {
                    break;
                }
                continue;
            };

            let result = self.process(&request);
            (self.on_complete)(result);
        }
    }

    pub(crate) fn process(&self, request: &TransactionRequest) -> TransactionResult {
        let mut result = TransactionResult {
            id: request.id,
            state: TransactionState::Aborted,
            operations: Vec::new(),
        };

        if !request.is_valid() {
            return result;
        }

        // Lock every declared key in lexicographic order; the fixed order
        // rules out deadlock among well-formed requests.
        let mut sorted_keys: Vec<_> = request.keys.iter().collect();
        sorted_keys.sort_by(|a, b| a.key.cmp(&b.key));
        let _key_guards: Vec<_> = sorted_keys
            .iter()
            .map(|spec| self.lock_manager.lock(&spec.key, spec.mode))
            .collect();

        let mut context = TransactionContext::new(request.id);
        for operation in &request.operations {
            let Some(key) = request.resolve_key(operation) else {
                context.mark_aborted();
                return result;
            };

            match operation.op_type {
                OperationType::Get => self.apply_read(operation, key, &mut context, &mut result),
                OperationType::Set => self.apply_write(operation, key, &mut context, &mut result),
                OperationType::Delete => {
                    self.apply_delete(operation, key, &mut context, &mut result)
                }
                // Reserved: assertions abort until their evaluation lands.
                _ => {
                    context.mark_aborted();
                    return result;
                }
            }

            if context.state() == TransactionState::Aborted {
                return result;
            }
        }

        match self.commit(request, &context) {
            Ok(()) => {
                context.mark_committed();
                result.state = TransactionState::Committed;
            }
            Err(e) => {
                tracing::error!(txn_id = request.id, kind = e.kind(), error = %e, "commit failed");
                context.mark_aborted();
            }
        }
        result
    }

    fn apply_read(
        &self,
        operation: &Operation,
        key: &str,
        context: &mut TransactionContext,
        result: &mut TransactionResult,
    ) {
        let mut op_result = OperationResult::pending(operation, key);

        let tree = &self.tree;
        let found = context.read_through(key, || tree.read().find(key));
        if let Some(record) = found {
            op_result.success = true;
            op_result.value = Some(record);
        }

        result.operations.push(op_result);
    }

    fn apply_write(
        &self,
        operation: &Operation,
        key: &str,
        context: &mut TransactionContext,
        result: &mut TransactionResult,
    ) {
        let mut op_result = OperationResult::pending(operation, key);

        let Some(record) = &operation.value else {
            context.mark_aborted();
            result.operations.push(op_result);
            return;
        };

        context.write(key, record.clone());
        op_result.success = true;
        op_result.value = Some(record.clone());
        result.operations.push(op_result);
    }

    fn apply_delete(
        &self,
        operation: &Operation,
        key: &str,
        context: &mut TransactionContext,
        result: &mut TransactionResult,
    ) {
        let mut op_result = OperationResult::pending(operation, key);

        let tree = &self.tree;
        let existing = context.read_through(key, || tree.read().find(key));
        op_result.success = existing.is_some();
        context.stage_delete(key);

        result.operations.push(op_result);
    }

    /// Apply the overlay under the exclusive tree lock. Durable intent goes
    /// to the WAL first: begin, one record per overlay entry, commit, fsync;
    /// only then are the pages mutated.
    fn commit(&self, request: &TransactionRequest, context: &TransactionContext) -> Result<()> {
        let mut tree = self.tree.write();

        {
            let mut wal = self.wal.lock();
            wal.append(WalRecord::marker(WalRecordType::TxnBegin, request.id))?;
            for spec in &request.keys {
                if !context.has_overlay_entry(&spec.key) {
                    continue;
                }
                match context.read(&spec.key) {
                    Some(record) => {
                        wal.append(WalRecord::upsert(
                            request.id,
                            UpsertPayload {
                                key: spec.key.clone(),
                                value: record.value.clone(),
                                ttl_epoch_seconds: record.metadata.ttl_epoch_seconds,
                            },
                        ))?;
                    }
                    None => {
                        wal.append(WalRecord::tombstone(request.id, spec.key.clone()))?;
                    }
                }
            }
            wal.append(WalRecord::marker(WalRecordType::TxnCommit, request.id))?;
            wal.flush()?;
        }

        for spec in &request.keys {
            if !context.has_overlay_entry(&spec.key) {
                continue;
            }
            match context.read(&spec.key) {
                Some(record) => tree.insert(&spec.key, record)?,
                None => {
                    tree.erase(&spec.key)?;
                }
            }
        }
        Ok(())
    }
}
