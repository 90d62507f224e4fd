//! Bus reader for one pipeline.
//!
//! The router is the only subscriber to the engine bus on behalf of a session.
//! Bus callbacks run on engine threads, so they only forward the message into the
//! control queue; [`GraphEventRouter::handle`] then runs on the control thread.
//!
//! Errors raised inside the pipeline and end-of-stream of the pipeline itself are
//! fatal: the pipeline is set to Null, the running flag is cleared and the
//! control loop is told to quit. State changes are only logged.

use crate::control::{ControlHandle, DeferredCall};
use crate::engine::{BusMessage, BusMessageKind, GraphEngine, RunState, StageId, SubscriptionId};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Invoked once, on the control thread, with the message that ended the run.
pub type FatalHandler = Box<dyn FnMut(&BusMessage) + Send>;

/// What [`GraphEventRouter::handle`] made of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    /// Logged only.
    Observed,
    /// Not ours: a detached branch or another pipeline on the same engine.
    Ignored,
    /// Escalated to the fatal handler.
    Fatal,
}

pub struct GraphEventRouter {
    engine: Arc<dyn GraphEngine>,
    pipeline: StageId,
    running: Arc<AtomicBool>,
    control: ControlHandle,
    subscriptions: Vec<SubscriptionId>,
    on_fatal: Option<FatalHandler>,
    fatal: Option<BusMessage>,
}

impl GraphEventRouter {
    /// Subscribe to errors, end-of-stream and state changes on behalf of `pipeline`.
    pub fn new(
        engine: Arc<dyn GraphEngine>,
        pipeline: StageId,
        control: ControlHandle,
        running: Arc<AtomicBool>,
    ) -> Self {
        let subscriptions = [
            BusMessageKind::Error,
            BusMessageKind::EndOfStream,
            BusMessageKind::StateChanged,
        ]
        .into_iter()
        .map(|kind| {
            let control = control.clone();
            engine.subscribe(
                kind,
                Box::new(move |msg| {
                    control.schedule(DeferredCall::Bus(msg.clone()));
                }),
            )
        })
        .collect();

        Self {
            engine,
            pipeline,
            running,
            control,
            subscriptions,
            on_fatal: None,
            fatal: None,
        }
    }

    /// Replace the default escalation (pipeline to Null, stop the loop).
    pub fn with_fatal_handler(mut self, handler: FatalHandler) -> Self {
        self.on_fatal = Some(handler);
        self
    }

    pub fn pipeline(&self) -> StageId {
        self.pipeline
    }

    /// The message that ended the run, if any.
    pub fn fatal(&self) -> Option<&BusMessage> {
        self.fatal.as_ref()
    }

    /// Process one forwarded bus message. Control thread only.
    pub fn handle(&mut self, msg: &BusMessage) -> Routed {
        match msg {
            BusMessage::StateChanged {
                source,
                source_name,
                old,
                new,
                pending,
            } => {
                if *source == self.pipeline {
                    tracing::info!("{} state changed {} -> {} (pending {:?})", source_name, old, new, pending);
                } else {
                    tracing::debug!("{} state changed {} -> {}", source_name, old, new);
                }
                Routed::Observed
            }
            BusMessage::EndOfStream { source, source_name } => {
                if *source != self.pipeline {
                    tracing::debug!("Ignoring end-of-stream from {}", source_name);
                    return Routed::Ignored;
                }
                tracing::info!("End of stream on {}", source_name);
                self.escalate(msg);
                Routed::Fatal
            }
            BusMessage::Error {
                source,
                source_name,
                message,
                debug,
            } => {
                if !self.engine.snapshot(self.pipeline).contains(*source) {
                    tracing::warn!("Error from {} outside the pipeline: {}", source_name, message);
                    return Routed::Ignored;
                }
                let detail = debug.as_deref().unwrap_or("no debug info");
                tracing::error!("Error from {}: {} ({})", source_name, message, detail);
                self.escalate(msg);
                Routed::Fatal
            }
        }
    }

    fn escalate(&mut self, msg: &BusMessage) {
        if self.fatal.is_some() {
            tracing::debug!("Already shutting down, ignoring {:?}", msg.kind());
            return;
        }
        self.fatal = Some(msg.clone());
        match self.on_fatal.as_mut() {
            Some(handler) => handler(msg),
            None => {
                if let Err(e) = self.engine.set_run_state(self.pipeline, RunState::Null) {
                    tracing::warn!("Failed to stop pipeline: {}", e);
                }
                self.running.store(false, Ordering::SeqCst);
                self.control.schedule(DeferredCall::Quit);
            }
        }
    }

    /// Drop every bus subscription. Called on drop as well.
    pub fn close(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.engine.unsubscribe(id);
        }
    }
}

impl Drop for GraphEventRouter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{control_channel, ControlQueue};
    use crate::engine::sim::{DetectionPipeline, SimEngine};
    use std::sync::Mutex;
    use std::time::Duration;

    fn drain(queue: &ControlQueue) -> Vec<BusMessage> {
        let mut out = Vec::new();
        while let Some(call) = queue.try_next() {
            if let DeferredCall::Bus(msg) = call {
                out.push(msg);
            }
        }
        out
    }

    fn setup() -> (Arc<SimEngine>, DetectionPipeline, GraphEventRouter, ControlQueue, Arc<AtomicBool>) {
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let (control, queue) = control_channel();
        let running = Arc::new(AtomicBool::new(true));
        let router = GraphEventRouter::new(engine.clone(), graph.pipeline, control, running.clone());
        (engine, graph, router, queue, running)
    }

    #[test]
    fn test_state_changes_are_observed_only() {
        let (engine, graph, mut router, queue, running) = setup();
        engine.set_run_state(graph.pipeline, RunState::Paused).unwrap();

        let msgs = drain(&queue);
        assert!(!msgs.is_empty());
        for msg in &msgs {
            assert_eq!(msg.kind(), BusMessageKind::StateChanged);
            assert_eq!(router.handle(msg), Routed::Observed);
        }
        assert!(running.load(Ordering::SeqCst));
        assert!(router.fatal().is_none());
        engine.set_run_state(graph.pipeline, RunState::Null).unwrap();
    }

    #[test]
    fn test_error_inside_pipeline_is_fatal() {
        let (engine, graph, mut router, queue, running) = setup();
        engine.set_run_state(graph.pipeline, RunState::Paused).unwrap();
        drain(&queue);

        engine.post_error(graph.source, "decoder exploded");
        let msgs = drain(&queue);
        assert_eq!(msgs.len(), 1);
        assert_eq!(router.handle(&msgs[0]), Routed::Fatal);

        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(engine.run_state(graph.pipeline), Some(RunState::Null));
        let mut saw_quit = false;
        while let Some(call) = queue.try_next() {
            saw_quit |= matches!(call, DeferredCall::Quit);
        }
        assert!(saw_quit);
    }

    #[test]
    fn test_error_with_debug_detail_is_fatal() {
        let (engine, graph, mut router, _queue, running) = setup();
        let msg = BusMessage::Error {
            source: graph.source,
            source_name: "filesrc".to_string(),
            message: "Internal data stream error".to_string(),
            debug: Some("streaming stopped, reason not-negotiated".to_string()),
        };
        assert_eq!(router.handle(&msg), Routed::Fatal);
        assert_eq!(router.fatal(), Some(&msg));
        assert!(!running.load(Ordering::SeqCst));
        assert_eq!(engine.run_state(graph.pipeline), Some(RunState::Null));
    }

    #[test]
    fn test_foreign_messages_are_ignored() {
        let (engine, _graph, mut router, queue, running) = setup();
        let stray = engine.create_container("orphan-bin").unwrap();
        drain(&queue);

        engine.post_error(stray, "late failure");
        let eos = BusMessage::EndOfStream {
            source: stray,
            source_name: "orphan-bin".to_string(),
        };
        let msgs = drain(&queue);
        assert_eq!(router.handle(&msgs[0]), Routed::Ignored);
        assert_eq!(router.handle(&eos), Routed::Ignored);
        assert!(running.load(Ordering::SeqCst));
    }

    #[test]
    fn test_pipeline_eos_escalates_once() {
        let (_engine, graph, router, _queue, _running) = setup();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let mut router = router.with_fatal_handler(Box::new(move |msg| {
            assert_eq!(msg.kind(), BusMessageKind::EndOfStream);
            *counter.lock().unwrap() += 1;
        }));

        let eos = BusMessage::EndOfStream {
            source: graph.pipeline,
            source_name: "pipeline0".to_string(),
        };
        assert_eq!(router.handle(&eos), Routed::Fatal);
        assert_eq!(router.handle(&eos), Routed::Fatal);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let engine = SimEngine::new();
        let graph = DetectionPipeline::build(&engine, "pipeline0", None).unwrap();
        let (control, queue) = control_channel();
        let router = GraphEventRouter::new(
            engine.clone(),
            graph.pipeline,
            control.clone(),
            Arc::new(AtomicBool::new(true)),
        );
        drop(router);
        engine.set_run_state(graph.pipeline, RunState::Paused).unwrap();
        assert!(queue.next_timeout(Duration::from_millis(50)).is_none());
        engine.set_run_state(graph.pipeline, RunState::Null).unwrap();
    }
}
