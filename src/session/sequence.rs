//! Timed start/stop sequence that drives recordings without detections

use crate::control::{ControlHandle, DeferredCall};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde::{Deserialize, Serialize};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceAction {
    Start,
    Stop,
}

/// One step of a sequence. `after_ms` counts from the previous step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    pub after_ms: u64,
    pub action: SequenceAction,
}

impl SequenceStep {
    pub fn new(after_ms: u64, action: SequenceAction) -> Self {
        Self { after_ms, action }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedSequence {
    steps: Vec<SequenceStep>,
}

impl ScriptedSequence {
    pub fn new(steps: Vec<SequenceStep>) -> Self {
        Self { steps }
    }

    /// Start, stop, start, stop with `interval` between each.
    pub fn alternating(interval: Duration, recordings: usize) -> Self {
        let after_ms = interval.as_millis() as u64;
        let steps = (0..recordings * 2)
            .map(|i| {
                let action = if i % 2 == 0 {
                    SequenceAction::Start
                } else {
                    SequenceAction::Stop
                };
                SequenceStep::new(after_ms, action)
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[SequenceStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run the sequence on its own thread, scheduling each step into `control`.
    pub fn spawn(self, control: ControlHandle) -> std::io::Result<SequenceHandle> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let thread = std::thread::Builder::new()
            .name("sequence".to_string())
            .spawn(move || {
                let started = Instant::now();
                for step in self.steps {
                    match stop_rx.recv_timeout(Duration::from_millis(step.after_ms)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                    let at = started.elapsed();
                    tracing::info!("Sequence: {:?} at {:?}", step.action, at);
                    let call = match step.action {
                        SequenceAction::Start => DeferredCall::StartRecording { at },
                        SequenceAction::Stop => DeferredCall::StopRecording { at },
                    };
                    if !control.schedule(call) {
                        return;
                    }
                }
                tracing::debug!("Sequence finished");
            })?;

        Ok(SequenceHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

/// Running sequence. Dropping it stops the remaining steps and joins the thread.
#[derive(Debug)]
pub struct SequenceHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl SequenceHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("Sequence thread panicked");
            }
        }
    }
}

impl Drop for SequenceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
