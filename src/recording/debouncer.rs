//! Hysteresis over a per-frame presence signal.
//!
//! Callers report every frame as either observed or not observed. The debouncer
//! turns that jittery stream into start/stop edges: a start is honored only once
//! more than `hysteresis` has passed since the last stop. A stop is honored only
//! once more than `hysteresis` has passed both since the last start and since the
//! signal was last observed, so a short gap in detections never ends a recording.

use crate::control::{ControlHandle, DeferredCall};
use std::time::Duration;

/// Receiver of debounced edges. Implementations must not block.
pub trait PresenceSink {
    fn on_start(&mut self, now: Duration);
    fn on_stop(&mut self, now: Duration);
}

impl PresenceSink for ControlHandle {
    fn on_start(&mut self, now: Duration) {
        self.schedule(DeferredCall::StartRecording { at: now });
    }

    fn on_stop(&mut self, now: Duration) {
        self.schedule(DeferredCall::StopRecording { at: now });
    }
}

/// Edge emitted by [`PresenceDebouncer::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceEdge {
    Start,
    Stop,
}

/// Tracking state for one monitored signal.
///
/// `None` timestamps stand for "never", which compares as infinitely far in the
/// past, so the first start is never suppressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionState {
    /// Stream time of the most recent frame, present or not.
    pub last_observation: Option<Duration>,
    /// Stream time of the most recent frame on which the signal was present.
    pub last_present_time: Option<Duration>,
    pub present: bool,
    pub recording: bool,
    pub last_start_time: Option<Duration>,
    pub last_stop_time: Option<Duration>,
}

#[derive(Debug)]
pub struct PresenceDebouncer<S> {
    hysteresis: Duration,
    state: DetectionState,
    sink: S,
}

impl<S: PresenceSink> PresenceDebouncer<S> {
    pub fn new(hysteresis: Duration, sink: S) -> Self {
        Self {
            hysteresis,
            state: DetectionState::default(),
            sink,
        }
    }

    pub fn hysteresis(&self) -> Duration {
        self.hysteresis
    }

    pub fn state(&self) -> &DetectionState {
        &self.state
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn is_recording(&self) -> bool {
        self.state.recording
    }

    /// Record one frame's observation at stream time `now`.
    pub fn observe(&mut self, present: bool, now: Duration) -> Option<PresenceEdge> {
        self.state.present = present;
        self.state.last_observation = Some(now);

        if present {
            self.state.last_present_time = Some(now);
            if !self.state.recording && self.exceeds(self.state.last_stop_time, now) {
                self.state.recording = true;
                self.state.last_start_time = Some(now);
                self.sink.on_start(now);
                return Some(PresenceEdge::Start);
            }
        } else if self.state.recording
            && self.exceeds(self.state.last_start_time, now)
            && self.exceeds(self.state.last_present_time, now)
        {
            self.state.recording = false;
            self.state.last_stop_time = Some(now);
            self.sink.on_stop(now);
            return Some(PresenceEdge::Stop);
        }
        None
    }

    pub fn observed(&mut self, now: Duration) -> Option<PresenceEdge> {
        self.observe(true, now)
    }

    pub fn not_observed(&mut self, now: Duration) -> Option<PresenceEdge> {
        self.observe(false, now)
    }

    fn exceeds(&self, since: Option<Duration>, now: Duration) -> bool {
        match since {
            None => true,
            Some(t) => now.saturating_sub(t) > self.hysteresis,
        }
    }
}
