//! Bounded FIFO queue feeding transaction requests to the worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::txn::TransactionRequest;

/// Default queue bound.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// How long a blocked consumer waits between stop-flag checks.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct TransactionReceiver {
    sender: Sender<TransactionRequest>,
    receiver: Receiver<TransactionRequest>,
    stopped: AtomicBool,
}

impl Default for TransactionReceiver {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_DEPTH)
    }
}

impl TransactionReceiver {
    pub fn new(max_queue_depth: usize) -> Self {
        let (sender, receiver) = bounded(max_queue_depth);
        Self {
            sender,
            receiver,
            stopped: AtomicBool::new(false),
        }
    }

    /// Returns false when the receiver is stopped or the queue is full.
    pub fn enqueue(&self, request: TransactionRequest) -> bool {
        if self.stopped() {
            return false;
        }
        self.sender.try_send(request).is_ok()
    }

    /// Block until a request is available. After `stop()` the remaining
    /// backlog is still drained; only then does this return `None`.
    pub fn next(&self) -> Option<TransactionRequest> {
        loop {
            match self.receiver.recv_timeout(POLL_INTERVAL) {
                Ok(request) => return Some(request),
                Err(RecvTimeoutError::Timeout) => {
                    if self.stopped() && self.receiver.is_empty() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return None,
            }
        }
    }

    /// Refuse new items and wake blocked consumers once the backlog drains.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }
}
