//! Recording session: the control thread of one pipeline.
//!
//! A session owns the control queue, the branch factory, the lifecycle
//! controller for one tap point and the bus router. [`RecordingSession::run`]
//! sets the pipeline to Playing, drains deferred calls until the router
//! escalates or a `Quit` arrives, then sets the pipeline back to Null.
//!
//! Sessions share nothing; several can run side by side, each on its own
//! thread and engine.

pub mod sequence;

pub use sequence::{ScriptedSequence, SequenceAction, SequenceHandle, SequenceStep};

use crate::config::{AppConfig, BranchConfig};
use crate::control::{control_channel, ControlHandle, ControlQueue, DeferredCall};
use crate::engine::sim::{DetectionPipeline, SimEngine};
use crate::engine::{BusMessage, GraphEngine, HookId, PortId, RunState, StageId};
use crate::error::{Result, ResultExt};
use crate::events::{GraphEventRouter, Routed};
use crate::recording::{
    install_presence_hook, AttachOutcome, Branch, BranchFactory, BranchLifecycleController,
    PresenceDebouncer, PresenceSampler, TapPoint,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// Files of every branch that reached Removed, in order.
    pub recordings: Vec<PathBuf>,
    /// The bus message that ended the run, if it was not a `Quit`.
    pub fatal: Option<BusMessage>,
}

pub struct RecordingSession {
    name: String,
    engine: Arc<dyn GraphEngine>,
    pipeline: StageId,
    factory: BranchFactory,
    controller: BranchLifecycleController,
    router: GraphEventRouter,
    control: ControlHandle,
    queue: ControlQueue,
    running: Arc<AtomicBool>,
    branch_config: BranchConfig,
    poll_interval: Duration,
    used_destinations: HashSet<PathBuf>,
    recordings: Vec<PathBuf>,
}

impl RecordingSession {
    /// Wire a session for `pipeline`, recording from `tap`.
    pub fn new(
        name: impl Into<String>,
        engine: Arc<dyn GraphEngine>,
        pipeline: StageId,
        tap: TapPoint,
        config: &AppConfig,
    ) -> Result<Self> {
        let name = name.into();
        std::fs::create_dir_all(&config.branch.output_dir).with_context(|| {
            format!(
                "Failed to create output directory {}",
                config.branch.output_dir.display()
            )
        })?;

        let (control, queue) = control_channel();
        let running = Arc::new(AtomicBool::new(true));
        let factory = BranchFactory::new(
            engine.clone(),
            config.branch.template.clone(),
            control.clone(),
        );
        let controller = BranchLifecycleController::new(
            engine.clone(),
            control.clone(),
            tap,
            config.lifecycle.attach_policy,
        )
        .with_dot_dir(config.debug.dot_dir.clone());
        let router = GraphEventRouter::new(engine.clone(), pipeline, control.clone(), running.clone());

        tracing::debug!("Configured session {}", name);
        Ok(Self {
            name,
            engine,
            pipeline,
            factory,
            controller,
            router,
            control,
            queue,
            running,
            branch_config: config.branch.clone(),
            poll_interval: config.control.poll_interval(),
            used_destinations: HashSet::new(),
            recordings: Vec::new(),
        })
    }

    /// Session over a simulated detection graph, tapping its tee. Presence
    /// sampling is installed unless `config.source.sequence` drives recordings.
    pub fn for_detection_pipeline(
        name: impl Into<String>,
        engine: &Arc<SimEngine>,
        graph: &DetectionPipeline,
        config: &AppConfig,
    ) -> Result<Self> {
        let name = name.into();
        let tap = TapPoint::new(format!("{}:tee", name), graph.pipeline, graph.tee);
        let session = Self::new(name, engine.clone(), graph.pipeline, tap, config)?;
        if config.source.sequence.is_empty() {
            session.install_presence(graph.detector_out, config)?;
        }
        Ok(session)
    }

    /// Feed detections seen on `port` into a debouncer that schedules
    /// start/stop calls on this session.
    pub fn install_presence(&self, port: PortId, config: &AppConfig) -> Result<HookId> {
        let sampler = PresenceSampler::new(
            config.detection.label.clone(),
            PresenceDebouncer::new(config.detection.hysteresis(), self.control.clone()),
        );
        install_presence_hook(self.engine.as_ref(), port, sampler)
            .context("Failed to install presence hook")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pipeline(&self) -> StageId {
        self.pipeline
    }

    /// Handle for scheduling work onto this session from any thread.
    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    /// Cleared when the session should stop.
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        self.running.clone()
    }

    pub fn controller(&self) -> &BranchLifecycleController {
        &self.controller
    }

    /// Run the pipeline until a fatal bus message or `Quit`.
    pub fn run(&mut self) -> Result<SessionReport> {
        tracing::info!("Pipeline {} requesting state-change to PLAYING", self.name);
        self.engine
            .set_run_state(self.pipeline, RunState::Playing)
            .with_context(|| format!("Failed to start pipeline {}", self.name))?;

        while self.running.load(Ordering::SeqCst) {
            let Some(call) = self.queue.next_timeout(self.poll_interval) else {
                continue;
            };
            if !self.dispatch(call) {
                break;
            }
        }

        tracing::info!("Pipeline {} requesting state-change to NULL", self.name);
        self.engine
            .set_run_state(self.pipeline, RunState::Null)
            .with_context(|| format!("Failed to stop pipeline {}", self.name))?;

        if let Some(active) = self.controller.active() {
            tracing::warn!(branch = %active.id(), "Session ended while {} was still recording", active.name());
        }

        Ok(SessionReport {
            recordings: std::mem::take(&mut self.recordings),
            fatal: self.router.fatal().cloned(),
        })
    }

    /// Handle one deferred call. Returns `false` when the loop should end.
    pub fn dispatch(&mut self, call: DeferredCall) -> bool {
        match call {
            DeferredCall::StartRecording { at } => self.start_recording(at),
            DeferredCall::StopRecording { at } => self.stop_recording(at),
            DeferredCall::BranchBlocked { branch } => match self.controller.on_blocked(branch) {
                Ok(removed) => self.collect(removed),
                Err(e) => tracing::warn!(branch = %branch, "Block notification: {}", e),
            },
            DeferredCall::SinkEos { branch } => match self.controller.on_sink_eos(branch) {
                Ok(removed) => self.collect(removed),
                Err(e) => tracing::warn!(branch = %branch, "Sink end-of-stream: {}", e),
            },
            DeferredCall::Bus(msg) => {
                if self.router.handle(&msg) == Routed::Fatal {
                    self.running.store(false, Ordering::SeqCst);
                }
            }
            DeferredCall::Invoke(f) => f(),
            DeferredCall::Quit => {
                tracing::debug!("Session {} received quit", self.name);
                return false;
            }
        }
        true
    }

    fn start_recording(&mut self, at: Duration) {
        let destination = self.next_destination();
        tracing::info!("Start recording to {} (stream time {:?})", destination.display(), at);

        let branch = match self.factory.build(&destination) {
            Ok(branch) => branch,
            Err(e) => {
                tracing::error!("Failed to build recording branch: {}", e);
                return;
            }
        };
        match self.controller.attach(branch) {
            Ok(AttachOutcome::Attached(id)) => tracing::debug!(branch = %id, "Recording"),
            Ok(AttachOutcome::Queued(id)) => tracing::debug!(branch = %id, "Recording queued"),
            Err(rejected) => {
                let id = rejected.branch.id();
                if let Err(e) = self.factory.discard(*rejected.branch) {
                    tracing::warn!(branch = %id, "Failed to free rejected branch: {}", e);
                }
            }
        }
    }

    fn stop_recording(&mut self, at: Duration) {
        tracing::info!("Stop recording (stream time {:?})", at);
        match self.controller.request_detach_active() {
            Ok(Some(id)) => tracing::debug!(branch = %id, "Detach requested"),
            Ok(None) => tracing::debug!("Nothing is recording"),
            Err(e) => tracing::warn!("Stop ignored: {}", e),
        }
    }

    fn collect(&mut self, removed: Option<Branch>) {
        if let Some(branch) = removed {
            tracing::info!(branch = %branch.id(), "Finished {}", branch.destination().display());
            self.recordings.push(branch.destination().to_path_buf());
        }
    }

    /// Timestamped destination, suffixed when the same second is used twice.
    fn next_destination(&mut self) -> PathBuf {
        let base = self.branch_config.next_destination();
        let mut candidate = base.clone();
        let mut n = 1;
        while self.used_destinations.contains(&candidate) || candidate.exists() {
            let stem = base
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            candidate = base.with_file_name(format!(
                "{}-{}.{}",
                stem, n, self.branch_config.file_extension
            ));
            n += 1;
        }
        self.used_destinations.insert(candidate.clone());
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sim::ArtifactReport;
    use crate::recording::BranchState;

    fn config(dir: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.branch.output_dir = dir.to_path_buf();
        config.control.poll_interval_ms = 10;
        config
    }

    #[test]
    fn test_quit_stops_pipeline() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let mut session =
            RecordingSession::for_detection_pipeline("pipe", &engine, &graph, &config(dir.path()))
                .unwrap();

        session.control().schedule(DeferredCall::Quit);
        let report = session.run().unwrap();
        assert!(report.recordings.is_empty());
        assert!(report.fatal.is_none());
        assert_eq!(engine.run_state(graph.pipeline), Some(RunState::Null));
    }

    #[test]
    fn test_manual_start_stop_produces_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let mut session =
            RecordingSession::for_detection_pipeline("pipe", &engine, &graph, &config(dir.path()))
                .unwrap();
        engine.set_run_state(graph.pipeline, RunState::Playing).unwrap();

        session.dispatch(DeferredCall::StartRecording { at: Duration::ZERO });
        let id = session.controller().active().unwrap().id();
        for i in 0..5 {
            engine.push_frame(
                graph.source,
                crate::engine::Buffer::new(Duration::from_millis(i * 40)).with_payload("f"),
            );
        }
        session.dispatch(DeferredCall::StopRecording { at: Duration::ZERO });
        // The block hook fires on the next frame through the tap.
        engine.push_frame(graph.source, crate::engine::Buffer::new(Duration::from_millis(200)));

        while session.controller().state_of(id) != Some(BranchState::Removed) {
            let call = session
                .queue
                .next_timeout(Duration::from_secs(2))
                .expect("teardown stalled");
            session.dispatch(call);
        }

        let recordings = std::mem::take(&mut session.recordings);
        assert_eq!(recordings.len(), 1);
        let report = ArtifactReport::read(&recordings[0]).unwrap();
        assert!(report.is_well_formed());
        assert_eq!(report.frames, 5);
        engine.set_run_state(graph.pipeline, RunState::Null).unwrap();
    }

    #[test]
    fn test_rejected_start_is_freed_and_stop_hits_recording() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let mut session =
            RecordingSession::for_detection_pipeline("pipe", &engine, &graph, &config(dir.path()))
                .unwrap();
        engine.set_run_state(graph.pipeline, RunState::Playing).unwrap();

        session.dispatch(DeferredCall::StartRecording { at: Duration::ZERO });
        let id = session.controller().active().unwrap().id();
        let stages = engine.stage_count();
        session.dispatch(DeferredCall::StartRecording { at: Duration::ZERO });
        assert_eq!(engine.stage_count(), stages);
        assert_eq!(session.controller().active().map(|b| b.id()), Some(id));

        session.dispatch(DeferredCall::StopRecording { at: Duration::ZERO });
        assert_eq!(
            session.controller().state_of(id),
            Some(BranchState::DetachRequested)
        );
        engine.push_frame(graph.source, crate::engine::Buffer::new(Duration::ZERO));
        while session.controller().state_of(id) != Some(BranchState::Removed) {
            let call = session
                .queue
                .next_timeout(Duration::from_secs(2))
                .expect("teardown stalled");
            session.dispatch(call);
        }
        assert_eq!(engine.stage_count(), stages - 6);
        engine.set_run_state(graph.pipeline, RunState::Null).unwrap();
    }

    #[test]
    fn test_destinations_are_unique_within_a_second() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let mut session =
            RecordingSession::for_detection_pipeline("pipe", &engine, &graph, &config(dir.path()))
                .unwrap();

        let a = session.next_destination();
        let b = session.next_destination();
        assert_ne!(a, b);
        assert!(b.to_string_lossy().ends_with(".mp4"));
        assert!(a.starts_with(dir.path()));
    }
}
