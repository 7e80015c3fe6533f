use std::sync::{Mutex, MutexGuard, OnceLock};

use rdb_archiver::config::{CONFIG_PATH_ENV, LOG_LEVEL_ENV, RETENTION_LAST_ENV};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Holds the process-wide env lock and clears every variable the archiver
/// reads, restoring the previous values on drop.
pub struct ArchiverEnvGuard {
    previous: Vec<(&'static str, Option<String>)>,
    _lock: MutexGuard<'static, ()>,
}

impl ArchiverEnvGuard {
    pub fn clean() -> Self {
        let lock = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let mut guard = Self {
            previous: Vec::new(),
            _lock: lock,
        };
        for key in [CONFIG_PATH_ENV, LOG_LEVEL_ENV, RETENTION_LAST_ENV] {
            guard.remember(key);
            // SAFETY: tests run under a global lock to prevent concurrent env mutations.
            unsafe {
                std::env::remove_var(key);
            }
        }
        guard
    }

    pub fn set(&mut self, key: &'static str, value: &str) {
        self.remember(key);
        // SAFETY: tests run under a global lock to prevent concurrent env mutations.
        unsafe {
            std::env::set_var(key, value);
        }
    }

    fn remember(&mut self, key: &'static str) {
        if !self.previous.iter().any(|(seen, _)| *seen == key) {
            self.previous.push((key, std::env::var(key).ok()));
        }
    }
}

impl Drop for ArchiverEnvGuard {
    fn drop(&mut self) {
        for (key, value) in self.previous.drain(..).rev() {
            match value {
                // SAFETY: tests run under a global lock to prevent concurrent env mutations.
                Some(value) => unsafe { std::env::set_var(key, value) },
                // SAFETY: tests run under a global lock to prevent concurrent env mutations.
                None => unsafe { std::env::remove_var(key) },
            }
        }
    }
}
