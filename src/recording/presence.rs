//! Per-frame presence sampling.
//!
//! A `DataPass` hook on the detector output reads each frame's regions and
//! reports exactly one observation per frame to the debouncer, using the frame's
//! presentation timestamp as the clock.

use crate::engine::{Buffer, DataItem, EngineResult, GraphEngine, HookId, HookKind, HookReturn, PortId};
use crate::recording::debouncer::{PresenceDebouncer, PresenceEdge, PresenceSink};

/// Label matcher plus the debouncer it feeds. Owned by the streaming thread
/// once installed.
#[derive(Debug)]
pub struct PresenceSampler<S> {
    label: String,
    debouncer: PresenceDebouncer<S>,
}

impl<S: PresenceSink> PresenceSampler<S> {
    pub fn new(label: impl Into<String>, debouncer: PresenceDebouncer<S>) -> Self {
        Self {
            label: label.into(),
            debouncer,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn debouncer(&self) -> &PresenceDebouncer<S> {
        &self.debouncer
    }

    /// Observe one frame.
    pub fn sample(&mut self, frame: &Buffer) -> Option<PresenceEdge> {
        let present = frame.has_label(&self.label);
        if present {
            tracing::trace!("{} detected at PTS {:?}", self.label, frame.pts);
        }
        let edge = self.debouncer.observe(present, frame.pts);
        if let Some(edge) = edge {
            tracing::debug!("Presence of '{}' {:?} at {:?}", self.label, edge, frame.pts);
        }
        edge
    }
}

/// Install `sampler` on `port`. The sampler moves into the hook and lives on
/// whichever thread pushes through the port.
pub fn install_presence_hook<S>(
    engine: &dyn GraphEngine,
    port: PortId,
    mut sampler: PresenceSampler<S>,
) -> EngineResult<HookId>
where
    S: PresenceSink + Send + 'static,
{
    engine.add_hook(
        port,
        HookKind::DataPass,
        Box::new(move |info| {
            if let DataItem::Buffer(frame) = info.item {
                sampler.sample(frame);
            }
            HookReturn::Pass
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{control_channel, DeferredCall};
    use crate::engine::sim::{DetectionPipeline, DetectionWindow, SimEngine, SourceScript};
    use crate::engine::{Region, RunState};
    use std::time::Duration;

    #[test]
    fn test_sample_matches_label_only() {
        let (control, queue) = control_channel();
        let mut sampler = PresenceSampler::new(
            "vehicle",
            PresenceDebouncer::new(Duration::from_secs(1), control),
        );

        let person = Buffer::new(Duration::ZERO).with_region(Region::new("person", 0.9));
        assert_eq!(sampler.sample(&person), None);
        let car = Buffer::new(Duration::from_millis(40)).with_region(Region::new("vehicle", 0.8));
        assert_eq!(sampler.sample(&car), Some(PresenceEdge::Start));

        assert!(matches!(
            queue.try_next(),
            Some(DeferredCall::StartRecording { at }) if at == Duration::from_millis(40)
        ));
    }

    #[test]
    fn test_hook_samples_every_frame() {
        let engine = SimEngine::new();
        let script = SourceScript {
            frame_count: Some(100),
            frame_duration_ms: 40,
            frame_interval_ms: 0,
            detections: vec![DetectionWindow::new("vehicle", 400, 2000)],
        };
        let graph = DetectionPipeline::build(&engine, "pipeline0", Some(script)).unwrap();
        let (control, queue) = control_channel();
        let sampler = PresenceSampler::new(
            "vehicle",
            PresenceDebouncer::new(Duration::from_secs(1), control),
        );
        install_presence_hook(engine.as_ref(), graph.detector_out, sampler).unwrap();
        engine.set_run_state(graph.pipeline, RunState::Playing).unwrap();

        let mut calls = Vec::new();
        while calls.len() < 2 {
            match queue.next_timeout(Duration::from_secs(2)) {
                Some(DeferredCall::StartRecording { at }) => calls.push(("start", at)),
                Some(DeferredCall::StopRecording { at }) => calls.push(("stop", at)),
                Some(_) => {}
                None => panic!("timed out after {:?}", calls),
            }
        }
        // Last detection at 1960 ms; stop needs more than a second of absence.
        assert_eq!(
            calls,
            vec![
                ("start", Duration::from_millis(400)),
                ("stop", Duration::from_millis(3000)),
            ]
        );
        engine.set_run_state(graph.pipeline, RunState::Null).unwrap();
    }
}
