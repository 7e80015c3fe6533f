use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::cancel::CancelToken;

use super::FsError;

/// Retry settings for filesystem operations with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first try.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for every further attempt.
    pub base_delay: Duration,
    /// Upper bound for a single backoff sleep. Delays only grow strictly
    /// across every attempt when this exceeds the last uncapped delay; see
    /// [`RetryPolicy::delays_grow_strictly`].
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Sleep before attempt `attempt + 1`, where `attempt` counts from 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        backoff_delay(self.base_delay, self.max_delay, attempt)
    }

    /// True when no backoff sleep is clipped by `max_delay`, so each sleep is
    /// longer than the previous one.
    pub fn delays_grow_strictly(&self) -> bool {
        let retries = self.max_attempts.saturating_sub(1);
        (2..=retries).all(|attempt| self.delay_after(attempt) > self.delay_after(attempt - 1))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

/// True for errors worth retrying: busy, temporarily unavailable or timed out.
pub fn is_transient(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        if let Some(code) = err.raw_os_error()
            && (code == libc::EAGAIN
                || code == libc::EWOULDBLOCK
                || code == libc::EBUSY
                || code == libc::ETIMEDOUT)
        {
            return true;
        }
    }
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::ResourceBusy | io::ErrorKind::TimedOut
    )
}

pub(crate) fn retry<T>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    op: &'static str,
    path: &Path,
    action: impl FnMut() -> io::Result<T>,
) -> Result<T, FsError> {
    retry_with_sleep(policy, cancel, op, path, action, |delay| cancel.sleep(delay))
}

/// Core retry loop; `sleep` returns `false` when the wait was interrupted.
pub(crate) fn retry_with_sleep<T>(
    policy: RetryPolicy,
    cancel: &CancelToken,
    op: &'static str,
    path: &Path,
    mut action: impl FnMut() -> io::Result<T>,
    mut sleep: impl FnMut(Duration) -> bool,
) -> Result<T, FsError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(FsError::Cancelled {
                op,
                path: path.to_path_buf(),
            });
        }
        attempt += 1;
        let source = match action() {
            Ok(value) => return Ok(value),
            Err(source) => source,
        };
        if source.kind() == io::ErrorKind::NotFound {
            return Err(FsError::NotFound {
                path: path.to_path_buf(),
            });
        }
        if !is_transient(&source) {
            return Err(FsError::Permanent {
                op,
                path: path.to_path_buf(),
                source,
            });
        }
        if attempt >= max_attempts {
            return Err(FsError::Exhausted {
                op,
                path: path.to_path_buf(),
                attempts: attempt,
                source,
            });
        }
        let delay = policy.delay_after(attempt);
        debug!(
            op,
            path = %path.display(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %source,
            "Transient filesystem error; retrying"
        );
        if !sleep(delay) {
            return Err(FsError::Cancelled {
                op,
                path: path.to_path_buf(),
            });
        }
    }
}

fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
    let delay = base.checked_mul(factor).unwrap_or(max);
    delay.min(max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn busy() -> io::Error {
        io::Error::from(io::ErrorKind::ResourceBusy)
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
        }
    }

    fn run<T>(
        action: impl FnMut() -> io::Result<T>,
        delays: &mut Vec<Duration>,
    ) -> Result<T, FsError> {
        let cancel = CancelToken::new();
        retry_with_sleep(policy(), &cancel, "test", &PathBuf::from("x"), action, |delay| {
            delays.push(delay);
            true
        })
    }

    #[test]
    fn permanent_error_is_not_retried() {
        let mut attempts = 0;
        let mut delays = Vec::new();
        let result: Result<(), FsError> = run(
            || {
                attempts += 1;
                Err(io::Error::from(io::ErrorKind::PermissionDenied))
            },
            &mut delays,
        );
        assert!(matches!(result, Err(FsError::Permanent { .. })));
        assert_eq!(attempts, 1);
        assert!(delays.is_empty());
    }

    #[test]
    fn transient_error_retries_to_ceiling_with_growing_delay() {
        let mut attempts = 0;
        let mut delays = Vec::new();
        let result: Result<(), FsError> = run(
            || {
                attempts += 1;
                Err(busy())
            },
            &mut delays,
        );
        assert!(matches!(
            result,
            Err(FsError::Exhausted { attempts: 4, .. })
        ));
        assert_eq!(attempts, 4);
        assert_eq!(delays.len(), 3);
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(delays[0], Duration::from_millis(10));
    }

    #[test]
    fn transient_error_recovers() {
        let mut attempts = 0;
        let mut delays = Vec::new();
        let result = run(
            || {
                attempts += 1;
                if attempts < 3 { Err(busy()) } else { Ok(42) }
            },
            &mut delays,
        );
        assert_eq!(result.unwrap(), 42);
        assert_eq!(delays.len(), 2);
    }

    #[test]
    fn cancellation_stops_before_first_attempt() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut attempts = 0;
        let result: Result<(), FsError> = retry_with_sleep(
            policy(),
            &cancel,
            "test",
            &PathBuf::from("x"),
            || {
                attempts += 1;
                Ok(())
            },
            |_| true,
        );
        assert!(matches!(result, Err(FsError::Cancelled { .. })));
        assert_eq!(attempts, 0);
    }

    #[test]
    fn interrupted_backoff_reports_cancellation() {
        let cancel = CancelToken::new();
        let result: Result<(), FsError> = retry_with_sleep(
            policy(),
            &cancel,
            "test",
            &PathBuf::from("x"),
            || Err(busy()),
            |_| false,
        );
        assert!(matches!(result, Err(FsError::Cancelled { .. })));
    }

    #[test]
    fn backoff_is_capped() {
        let max = Duration::from_millis(250);
        assert_eq!(backoff_delay(Duration::from_millis(100), max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(Duration::from_millis(100), max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(Duration::from_millis(100), max, 3), max);
        assert_eq!(backoff_delay(Duration::from_millis(100), max, 40), max);
    }

    #[test]
    fn default_policy_delays_grow_strictly() {
        let policy = RetryPolicy::default();
        assert!(policy.delays_grow_strictly());
        let delays: Vec<Duration> = (1..policy.max_attempts)
            .map(|attempt| policy.delay_after(attempt))
            .collect();
        assert_eq!(delays.len(), 4);
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(delays.iter().all(|delay| *delay <= policy.max_delay));
    }

    #[test]
    fn tight_cap_is_reported() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
        };
        assert!(!policy.delays_grow_strictly());
        assert!(RetryPolicy { max_delay: Duration::from_millis(900), ..policy }.delays_grow_strictly());
    }

    #[test]
    fn classifies_transient_kinds() {
        assert!(is_transient(&busy()));
        assert!(is_transient(&io::Error::from(io::ErrorKind::TimedOut)));
        assert!(is_transient(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(!is_transient(&io::Error::from(io::ErrorKind::PermissionDenied)));
    }

    #[cfg(unix)]
    #[test]
    fn classifies_raw_errno() {
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EBUSY)));
        assert!(is_transient(&io::Error::from_raw_os_error(libc::EAGAIN)));
        assert!(!is_transient(&io::Error::from_raw_os_error(libc::ENOSPC)));
    }
}
