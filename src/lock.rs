//! Per-key readers-writer locks for transaction isolation.
//!
//! Two-level structure: a map mutex guards insertion and removal of the
//! per-key state, a condvar provides the actual waiting. Shared holders
//! coexist; an exclusive acquire waits until no holder of either kind
//! remains. Idle entries are dropped on release so the table tracks only
//! contended keys.

use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct KeyLockState {
    readers: u32,
    writer: bool,
}

impl KeyLockState {
    fn idle(&self) -> bool {
        self.readers == 0 && !self.writer
    }
}

#[derive(Default)]
pub struct LockManager {
    table: Mutex<HashMap<String, KeyLockState>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the key is available in `mode` and take it.
    pub fn acquire(&self, key: &str, mode: LockMode) {
        let mut table = self.table.lock();
        loop {
            let state = table.entry(key.to_string()).or_default();
            match mode {
                LockMode::Shared if !state.writer => {
                    state.readers += 1;
                    return;
                }
                LockMode::Exclusive if state.idle() => {
                    state.writer = true;
                    return;
                }
                _ => {}
            }
            self.released.wait(&mut table);
        }
    }

    /// Release a previously acquired hold. Releasing a key that was never
    /// acquired is a no-op.
    pub fn release(&self, key: &str, mode: LockMode) {
        let mut table = self.table.lock();
        let Some(state) = table.get_mut(key) else {
            return;
        };

        match mode {
            LockMode::Shared => {
                state.readers = state.readers.saturating_sub(1);
            }
            LockMode::Exclusive => {
                state.writer = false;
            }
        }
        if state.idle() {
            table.remove(key);
        }
        drop(table);
        self.released.notify_all();
    }

    /// Acquire with a guard that releases on drop.
    pub fn lock(&self, key: &str, mode: LockMode) -> KeyLockGuard<'_> {
        self.acquire(key, mode);
        KeyLockGuard {
            manager: self,
            key: key.to_string(),
            mode,
        }
    }

    /// Number of keys with at least one holder or pending state.
    pub fn locked_keys(&self) -> usize {
        self.table.lock().len()
    }
}

pub struct KeyLockGuard<'a> {
    manager: &'a LockManager,
    key: String,
    mode: LockMode,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.key, self.mode);
    }
}
