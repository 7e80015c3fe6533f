//! Single-slot, latest-wins handoff between the detection and archival threads.
//!
//! This is intentionally not a queue: a burst of puts collapses into the last
//! value, so the archiver only ever processes the newest known snapshot state.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

struct MailboxState<T> {
    pending: Option<T>,
    closed: bool,
}

/// Latest-only slot guarded by a mutex and a condition variable.
pub struct Mailbox<T> {
    state: Mutex<MailboxState<T>>,
    ready: Condvar,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `job`, replacing any undelivered one. Never blocks.
    ///
    /// Returns `true` when an older undelivered job was dropped.
    pub fn put(&self, job: T) -> bool {
        let mut state = self.lock();
        let replaced = state.pending.replace(job).is_some();
        self.ready.notify_one();
        replaced
    }

    /// Block until a job is present, then remove and return it.
    ///
    /// Returns `None` only once the mailbox has been closed and drained.
    pub fn take(&self) -> Option<T> {
        let mut state = self.lock();
        loop {
            if let Some(job) = state.pending.take() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = self
                .ready
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Non-blocking variant of [`Mailbox::take`].
    pub fn try_take(&self) -> Option<T> {
        self.lock().pending.take()
    }

    /// Racy peek, for diagnostics only.
    pub fn has_job(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Wake every blocked taker; subsequent takes on an empty slot return `None`.
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.ready.notify_all();
    }
}
