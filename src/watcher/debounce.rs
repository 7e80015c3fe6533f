//! Debounce state machine for notification-driven detection.
//!
//! Driven by discrete inputs so ordering and cancellation can be tested
//! without real timers: change events refresh the deadline, ticks past the
//! deadline fire once, cancellation always returns to idle.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Debouncing { deadline: Instant },
    /// Fired on the previous input; the next tick returns to idle.
    Fired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceInput {
    Change { at: Instant, window: Duration },
    Tick { at: Instant },
    Cancel,
}

#[derive(Debug)]
pub struct Debouncer {
    state: DebounceState,
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Apply one input. Returns `true` exactly when detection should run.
    pub fn step(&mut self, input: DebounceInput) -> bool {
        let (next, fire) = match (self.state, input) {
            (_, DebounceInput::Cancel) => (DebounceState::Idle, false),
            (_, DebounceInput::Change { at, window }) => (
                DebounceState::Debouncing {
                    deadline: at + window,
                },
                false,
            ),
            (DebounceState::Debouncing { deadline }, DebounceInput::Tick { at }) => {
                if at >= deadline {
                    (DebounceState::Fired, true)
                } else {
                    (self.state, false)
                }
            }
            (DebounceState::Fired, DebounceInput::Tick { .. }) => (DebounceState::Idle, false),
            (DebounceState::Idle, DebounceInput::Tick { .. }) => (DebounceState::Idle, false),
        };
        self.state = next;
        fire
    }

    /// Time left before a pending debounce fires.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        match self.state {
            DebounceState::Debouncing { deadline } => Some(deadline.saturating_duration_since(now)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(500);

    fn change(at: Instant) -> DebounceInput {
        DebounceInput::Change { at, window: WINDOW }
    }

    #[test]
    fn fires_once_after_quiet_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.step(change(start)));
        assert!(!debouncer.step(DebounceInput::Tick {
            at: start + Duration::from_millis(499)
        }));
        assert!(debouncer.step(DebounceInput::Tick { at: start + WINDOW }));
        assert_eq!(debouncer.state(), DebounceState::Fired);
        assert!(!debouncer.step(DebounceInput::Tick {
            at: start + Duration::from_secs(5)
        }));
        assert_eq!(debouncer.state(), DebounceState::Idle);
    }

    #[test]
    fn burst_of_changes_extends_deadline() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        for offset in [0, 100, 200, 300] {
            debouncer.step(change(start + Duration::from_millis(offset)));
        }
        assert!(!debouncer.step(DebounceInput::Tick { at: start + WINDOW }));
        assert_eq!(
            debouncer.remaining(start + WINDOW),
            Some(Duration::from_millis(300))
        );
        assert!(debouncer.step(DebounceInput::Tick {
            at: start + Duration::from_millis(800)
        }));
    }

    #[test]
    fn cancel_discards_pending_fire() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.step(change(start));
        assert!(!debouncer.step(DebounceInput::Cancel));
        assert_eq!(debouncer.state(), DebounceState::Idle);
        assert!(!debouncer.step(DebounceInput::Tick {
            at: start + Duration::from_secs(1)
        }));
    }

    #[test]
    fn change_after_fire_rearms() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new();
        debouncer.step(change(start));
        assert!(debouncer.step(DebounceInput::Tick { at: start + WINDOW }));
        debouncer.step(change(start + WINDOW));
        assert!(matches!(
            debouncer.state(),
            DebounceState::Debouncing { .. }
        ));
        assert!(debouncer.step(DebounceInput::Tick {
            at: start + WINDOW * 2
        }));
    }

    #[test]
    fn idle_ticks_never_fire() {
        let mut debouncer = Debouncer::new();
        assert!(!debouncer.step(DebounceInput::Tick { at: Instant::now() }));
        assert_eq!(debouncer.remaining(Instant::now()), None);
    }
}
