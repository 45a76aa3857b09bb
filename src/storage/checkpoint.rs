//! Checkpoint hook: records a target LSN and runs page flushes against it.
//!
//! Flush scheduling stays with the caller; the checkpointer only sequences
//! "everything up to this LSN is on disk" and reports what happened.

use crate::error::Result;
use crate::storage::Lsn;

/// Outcome of a completed checkpoint pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointSnapshot {
    pub lsn: Lsn,
    pub pages_flushed: u64,
}

#[derive(Debug, Default)]
pub struct Checkpointer {
    target_lsn: Option<Lsn>,
}

impl Checkpointer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the LSN the next checkpoint pass must cover. A newer request
    /// supersedes an unserved one.
    pub fn request_checkpoint(&mut self, target_lsn: Lsn) {
        self.target_lsn = Some(target_lsn);
    }

    pub fn pending_target(&self) -> Option<Lsn> {
        self.target_lsn
    }

    /// Serve the pending request, if any. `flush` receives the target LSN
    /// and returns how many pages it forced out; WAL durability ordering is
    /// the flush callback's responsibility.
    pub fn run_once<F>(&mut self, flush: F) -> Result<Option<CheckpointSnapshot>>
    where
        F: FnOnce(Lsn) -> Result<u64>,
    {
        let Some(target_lsn) = self.target_lsn else {
            return Ok(None);
        };

        let pages_flushed = flush(target_lsn)?;
        self.target_lsn = None;
        Ok(Some(CheckpointSnapshot {
            lsn: target_lsn,
            pages_flushed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_without_request_is_a_no_op() {
        let mut checkpointer = Checkpointer::new();
        let snapshot = checkpointer.run_once(|_| Ok(1)).unwrap();
        assert!(snapshot.is_none());
    }

    #[test]
    fn serves_the_requested_lsn_once() {
        let mut checkpointer = Checkpointer::new();
        checkpointer.request_checkpoint(17);
        assert_eq!(checkpointer.pending_target(), Some(17));

        let snapshot = checkpointer.run_once(|lsn| {
            assert_eq!(lsn, 17);
            Ok(4)
        });
        assert_eq!(
            snapshot.unwrap(),
            Some(CheckpointSnapshot {
                lsn: 17,
                pages_flushed: 4
            })
        );

        // The request is consumed.
        assert!(checkpointer.run_once(|_| Ok(0)).unwrap().is_none());
    }

    #[test]
    fn newer_request_supersedes_older() {
        let mut checkpointer = Checkpointer::new();
        checkpointer.request_checkpoint(5);
        checkpointer.request_checkpoint(9);
        let snapshot = checkpointer.run_once(|lsn| Ok(lsn)).unwrap().unwrap();
        assert_eq!(snapshot.lsn, 9);
    }

    #[test]
    fn failed_flush_keeps_the_request() {
        let mut checkpointer = Checkpointer::new();
        checkpointer.request_checkpoint(3);
        let result = checkpointer.run_once(|_| {
            Err(crate::error::StrandError::Storage("flush failed".into()))
        });
        assert!(result.is_err());
        assert_eq!(checkpointer.pending_target(), Some(3));
    }
}
