//! Early completion signalling for a playback cycle.

use std::time::Duration;

/// Default lead time before the end of playback at which the early signal
/// fires.
pub const DEFAULT_LEAD_TIME: Duration = Duration::from_millis(1000);

/// Decision returned by the tracker when remaining playback time is
/// re-evaluated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerAction {
    /// Remaining time is already inside the lead window; signal now.
    EmitNow,
    /// Arm a timer for `remaining - lead` seconds.
    ArmTimer(f64),
    /// Latched or nothing to do.
    Nothing,
}

/// Tracks when the `AboutToComplete` signal should fire.
///
/// Evaluated at two trigger points: when the stream is marked complete, and
/// when another buffer is enqueued after that mark. The signal is latched:
/// at most one emission per cycle, cleared only by `reset`.
#[derive(Debug)]
pub struct CompletionTracker {
    lead: Duration,
    latched: bool,
    timer_armed: bool,
}

impl CompletionTracker {
    pub fn new(lead: Duration) -> Self {
        Self {
            lead,
            latched: false,
            timer_armed: false,
        }
    }

    /// Re-evaluate with the current remaining audible time in seconds.
    pub fn evaluate(&mut self, remaining_secs: f64) -> TrackerAction {
        if self.latched {
            return TrackerAction::Nothing;
        }
        let lead = self.lead.as_secs_f64();
        if remaining_secs <= lead {
            self.latched = true;
            self.timer_armed = false;
            TrackerAction::EmitNow
        } else {
            self.timer_armed = true;
            TrackerAction::ArmTimer(remaining_secs - lead)
        }
    }

    /// Latch from an armed timer firing. Returns whether the signal should
    /// actually be emitted (false when something latched it first).
    pub fn fire(&mut self) -> bool {
        if self.latched || !self.timer_armed {
            return false;
        }
        self.latched = true;
        self.timer_armed = false;
        true
    }

    pub fn is_latched(&self) -> bool {
        self.latched
    }

    /// Clear the latch and forget any armed timer.
    pub fn reset(&mut self) {
        self.latched = false;
        self.timer_armed = false;
    }
}

impl Default for CompletionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_LEAD_TIME)
    }
}
