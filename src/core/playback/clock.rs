//! Media-time clock backing playback scheduling.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// A monotonic media clock in seconds.
///
/// Playback scheduling is computed against this clock, never the wall
/// clock. `suspend` freezes media time (pause); `resume` lets it run again.
pub trait MediaClock: Send + Sync {
    /// Current media time in seconds. Monotonic; does not advance while
    /// suspended.
    fn now(&self) -> f64;

    /// Freeze media time.
    fn suspend(&self);

    /// Unfreeze media time.
    fn resume(&self);

    fn is_suspended(&self) -> bool;
}

/// Default clock over [`Instant`], with suspension accounting.
pub struct MonotonicClock {
    origin: Instant,
    state: Mutex<ClockState>,
}

struct ClockState {
    suspended_at: Option<Instant>,
    suspended_total: Duration,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            state: Mutex::new(ClockState {
                suspended_at: None,
                suspended_total: Duration::ZERO,
            }),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaClock for MonotonicClock {
    fn now(&self) -> f64 {
        let state = self.state.lock();
        let effective = state.suspended_at.unwrap_or_else(Instant::now);
        (effective - self.origin - state.suspended_total).as_secs_f64()
    }

    fn suspend(&self) {
        let mut state = self.state.lock();
        if state.suspended_at.is_none() {
            state.suspended_at = Some(Instant::now());
        }
    }

    fn resume(&self) {
        let mut state = self.state.lock();
        if let Some(suspended_at) = state.suspended_at.take() {
            state.suspended_total += suspended_at.elapsed();
        }
    }

    fn is_suspended(&self) -> bool {
        self.state.lock().suspended_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = MonotonicClock::new();
        let t0 = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        assert!(clock.now() > t0);
    }

    #[test]
    fn test_suspend_freezes_time() {
        let clock = MonotonicClock::new();
        clock.suspend();
        assert!(clock.is_suspended());
        let frozen = clock.now();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(clock.now(), frozen);
    }

    #[test]
    fn test_resume_excludes_suspended_interval() {
        let clock = MonotonicClock::new();
        std::thread::sleep(Duration::from_millis(10));
        clock.suspend();
        let frozen = clock.now();
        std::thread::sleep(Duration::from_millis(30));
        clock.resume();
        assert!(!clock.is_suspended());

        // Time resumes from where it stopped, not from wall time.
        let after = clock.now();
        assert!(after >= frozen);
        assert!(after < frozen + 0.02);
    }

    #[test]
    fn test_double_suspend_is_noop() {
        let clock = MonotonicClock::new();
        clock.suspend();
        let frozen = clock.now();
        clock.suspend();
        assert_eq!(clock.now(), frozen);
        clock.resume();
        clock.resume();
        assert!(!clock.is_suspended());
    }
}
