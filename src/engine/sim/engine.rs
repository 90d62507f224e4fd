//! `SimEngine` — an in-process `GraphEngine` with real streaming threads.
//!
//! Locking discipline: one mutex guards the whole graph. It is never held while a
//! hook callback, a bus callback, or a downstream push runs, so hooks may call the
//! port-local engine operations (`unlink_ports`, `inject_event`, `remove_hook`)
//! without deadlocking.

use crate::engine::buffer::{Buffer, DataItem, StreamEvent};
use crate::engine::bus::{BusCallback, BusMessage, BusMessageKind, RunState};
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::id::{HookId, PortId, StageId, SubscriptionId};
use crate::engine::port::{HookFn, HookInfo, HookKind, HookReturn, MediaFormat, PortDirection};
use crate::engine::sim::artifact::{HEADER, TRAILER};
use crate::engine::sim::journal::{Journal, JournalEntry};
use crate::engine::sim::registry::{StageKind, StageRegistry};
use crate::engine::sim::source::SourceScript;
use crate::engine::snapshot::{LinkSnapshot, StageSnapshot, TopologySnapshot};
use crate::engine::traits::{GraphEngine, PropertyValue};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;

/// Outcome of pushing an item through a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowReturn {
    Ok,
    NotLinked,
    /// The receiving stage is not streaming or no longer exists.
    Flushing,
    /// A hook swallowed the item.
    Dropped,
    Error,
}

/// Counters kept by sink stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub buffers: u64,
    pub eos_count: u32,
    pub bytes: u64,
    pub location: Option<String>,
}

struct HookRec {
    id: HookId,
    kind: HookKind,
    callback: Arc<Mutex<HookFn>>,
}

struct PortRec {
    stage: StageId,
    name: String,
    direction: PortDirection,
    format: MediaFormat,
    peer: Option<PortId>,
    ghost_target: Option<PortId>,
    request: bool,
    hooks: Vec<HookRec>,
}

#[derive(Default)]
struct SinkState {
    buffers: u64,
    eos_count: u32,
    bytes: u64,
    at_eos: bool,
    file: Option<File>,
}

enum Runtime {
    Idle,
    Source {
        script: Option<SourceScript>,
        stop: Option<Arc<AtomicBool>>,
    },
    Queue {
        tx: Option<Sender<DataItem>>,
    },
    Muxer {
        header_written: bool,
    },
    Sink(SinkState),
    Container {
        eos_posted: bool,
    },
}

struct StageRec {
    name: String,
    type_name: String,
    /// `None` for containers.
    kind: Option<StageKind>,
    parent: Option<StageId>,
    children: Vec<StageId>,
    state: RunState,
    ports: Vec<PortId>,
    next_request: u32,
    props: HashMap<String, PropertyValue>,
    runtime: Runtime,
}

#[derive(Default)]
struct Graph {
    stages: HashMap<StageId, StageRec>,
    ports: HashMap<PortId, PortRec>,
    next_stage: u32,
    next_port: u32,
    next_hook: u64,
}

impl Graph {
    fn alloc_stage(&mut self) -> StageId {
        let id = StageId(self.next_stage);
        self.next_stage += 1;
        id
    }

    fn add_port(
        &mut self,
        stage: StageId,
        name: String,
        direction: PortDirection,
        format: MediaFormat,
        ghost_target: Option<PortId>,
        request: bool,
    ) -> PortId {
        let id = PortId(self.next_port);
        self.next_port += 1;
        self.ports.insert(
            id,
            PortRec {
                stage,
                name,
                direction,
                format,
                peer: None,
                ghost_target,
                request,
                hooks: Vec::new(),
            },
        );
        if let Some(rec) = self.stages.get_mut(&stage) {
            rec.ports.push(id);
        }
        id
    }

    /// `root` followed by all its descendants, depth first.
    fn subtree(&self, root: StageId) -> Vec<StageId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if let Some(rec) = self.stages.get(&id) {
                out.push(id);
                stack.extend(rec.children.iter().rev().copied());
            }
        }
        out
    }

    fn top_of(&self, mut id: StageId) -> StageId {
        while let Some(parent) = self.stages.get(&id).and_then(|r| r.parent) {
            id = parent;
        }
        id
    }

    fn is_ancestor(&self, ancestor: StageId, mut id: StageId) -> bool {
        while let Some(parent) = self.stages.get(&id).and_then(|r| r.parent) {
            if parent == ancestor {
                return true;
            }
            id = parent;
        }
        false
    }

    fn outputs(&self, stage: StageId) -> Vec<PortId> {
        self.stages
            .get(&stage)
            .map(|rec| {
                rec.ports
                    .iter()
                    .copied()
                    .filter(|p| {
                        self.ports
                            .get(p)
                            .is_some_and(|port| port.direction == PortDirection::Output)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn effective_format(&self, port: PortId) -> MediaFormat {
        let mut current = port;
        while let Some(rec) = self.ports.get(&current) {
            match rec.ghost_target {
                Some(target) => current = target,
                None => return rec.format,
            }
        }
        MediaFormat::Any
    }

    fn hook_installed(&self, port: PortId, hook: HookId) -> bool {
        self.ports
            .get(&port)
            .is_some_and(|p| p.hooks.iter().any(|h| h.id == hook))
    }

    fn port_streaming(&self, port: PortId) -> bool {
        self.ports
            .get(&port)
            .and_then(|p| self.stages.get(&p.stage))
            .is_some_and(|s| s.state.is_streaming())
    }

    /// Break the link on `port`, if any. Returns `(src, sink)`.
    fn unlink_port(&mut self, port: PortId) -> Option<(PortId, PortId)> {
        let (peer, direction) = {
            let rec = self.ports.get_mut(&port)?;
            (rec.peer.take()?, rec.direction)
        };
        if let Some(peer_rec) = self.ports.get_mut(&peer) {
            peer_rec.peer = None;
        }
        match direction {
            PortDirection::Output => Some((port, peer)),
            PortDirection::Input => Some((peer, port)),
        }
    }

    fn all_sinks_at_eos(&self, top: StageId) -> bool {
        let mut any = false;
        for id in self.subtree(top) {
            let Some(rec) = self.stages.get(&id) else {
                continue;
            };
            if let Runtime::Sink(sink) = &rec.runtime {
                any = true;
                if !sink.at_eos {
                    return false;
                }
            }
        }
        any
    }
}

enum Action {
    Push(PortId, DataItem),
    Post(BusMessage),
}

enum Spawn {
    Source {
        name: String,
        port: PortId,
        script: SourceScript,
        stop: Arc<AtomicBool>,
    },
    Queue {
        name: String,
        stage: StageId,
        port: PortId,
        rx: Receiver<DataItem>,
    },
}

enum HookVerdict {
    Continue,
    Dropped,
    Gone,
}

type Subscriber = (SubscriptionId, BusMessageKind, Arc<BusCallback>);

/// In-process graph engine.
pub struct SimEngine {
    me: Weak<SimEngine>,
    registry: StageRegistry,
    graph: Mutex<Graph>,
    unblocked: Condvar,
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscription: AtomicU64,
    journal: Journal,
}

impl SimEngine {
    pub fn new() -> Arc<Self> {
        Self::with_registry(StageRegistry::default())
    }

    pub fn with_registry(registry: StageRegistry) -> Arc<Self> {
        Arc::new_cyclic(|me| SimEngine {
            me: me.clone(),
            registry,
            graph: Mutex::new(Graph::default()),
            unblocked: Condvar::new(),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            journal: Journal::default(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Give a source stage a script; it starts producing when set to Playing.
    pub fn set_source_script(&self, stage: StageId, script: SourceScript) -> EngineResult<()> {
        let mut g = self.lock();
        let rec = g
            .stages
            .get_mut(&stage)
            .ok_or(EngineError::UnknownStage(stage))?;
        match &mut rec.runtime {
            Runtime::Source { script: slot, .. } => {
                *slot = Some(script);
                Ok(())
            }
            _ => Err(EngineError::InvalidOperation(format!(
                "'{}' is not a source",
                rec.name
            ))),
        }
    }

    /// Push one frame out of `source` on the calling thread, which acts as the
    /// source's streaming thread.
    pub fn push_frame(&self, source: StageId, buffer: Buffer) -> FlowReturn {
        self.push_from_source(source, DataItem::Buffer(buffer))
    }

    /// Push end-of-stream out of `source` on the calling thread.
    pub fn end_stream(&self, source: StageId) -> FlowReturn {
        self.push_from_source(source, DataItem::Event(StreamEvent::EndOfStream))
    }

    fn push_from_source(&self, source: StageId, item: DataItem) -> FlowReturn {
        let port = {
            let g = self.lock();
            match g.stages.get(&source) {
                Some(rec) if rec.state == RunState::Playing => g.outputs(source).first().copied(),
                _ => None,
            }
        };
        match port {
            Some(port) => self.push(port, item),
            None => FlowReturn::Flushing,
        }
    }

    /// Post an error on behalf of `stage`, as a failing element would.
    pub fn post_error(&self, stage: StageId, message: impl Into<String>) {
        let source_name = self.stage_name(stage).unwrap_or_default();
        self.post(BusMessage::Error {
            source: stage,
            source_name,
            message: message.into(),
            debug: None,
        });
    }

    pub fn sink_report(&self, stage: StageId) -> Option<SinkReport> {
        let g = self.lock();
        let rec = g.stages.get(&stage)?;
        match &rec.runtime {
            Runtime::Sink(sink) => Some(SinkReport {
                buffers: sink.buffers,
                eos_count: sink.eos_count,
                bytes: sink.bytes,
                location: rec
                    .props
                    .get("location")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
            }),
            _ => None,
        }
    }

    pub fn parent_of(&self, stage: StageId) -> Option<StageId> {
        self.lock().stages.get(&stage).and_then(|r| r.parent)
    }

    /// Stages alive in the engine, attached to a graph or not.
    pub fn stage_count(&self) -> usize {
        self.lock().stages.len()
    }

    pub fn hook_count(&self, port: PortId) -> usize {
        self.lock().ports.get(&port).map_or(0, |p| p.hooks.len())
    }

    pub fn port_exists(&self, port: PortId) -> bool {
        self.lock().ports.contains_key(&port)
    }

    pub fn port_name(&self, port: PortId) -> Option<String> {
        self.lock().ports.get(&port).map(|p| p.name.clone())
    }

    // ── Data flow ──

    /// Push `item` out of the output port `src`.
    pub fn push(&self, src: PortId, item: DataItem) -> FlowReturn {
        match self.run_hooks(src, &item) {
            HookVerdict::Continue => {}
            HookVerdict::Dropped => return FlowReturn::Dropped,
            HookVerdict::Gone => return FlowReturn::Flushing,
        }
        let peer = match self.lock().ports.get(&src) {
            Some(rec) => rec.peer,
            None => return FlowReturn::Flushing,
        };
        match peer {
            Some(sink) => self.deliver(sink, item),
            None => FlowReturn::NotLinked,
        }
    }

    fn deliver(&self, port: PortId, item: DataItem) -> FlowReturn {
        if let DataItem::Event(event) = &item {
            self.journal.record(JournalEntry::EventArrived {
                port,
                event: *event,
            });
        }
        match self.run_hooks(port, &item) {
            HookVerdict::Continue => {}
            HookVerdict::Dropped => return FlowReturn::Dropped,
            HookVerdict::Gone => return FlowReturn::Flushing,
        }
        let (stage, target) = match self.lock().ports.get(&port) {
            Some(rec) => (rec.stage, rec.ghost_target),
            None => return FlowReturn::Flushing,
        };
        match target {
            Some(target) => self.deliver(target, item),
            None => self.chain(stage, item),
        }
    }

    fn run_hooks(&self, port: PortId, item: &DataItem) -> HookVerdict {
        let hooks: Vec<(HookId, HookKind, Arc<Mutex<HookFn>>)> = {
            let g = self.lock();
            match g.ports.get(&port) {
                Some(rec) => rec
                    .hooks
                    .iter()
                    .filter(|h| h.kind.matches(item))
                    .map(|h| (h.id, h.kind, h.callback.clone()))
                    .collect(),
                None => return HookVerdict::Gone,
            }
        };

        for (id, kind, callback) in hooks {
            // An earlier hook in this pass may have removed this one.
            if !self.lock().hook_installed(port, id) {
                continue;
            }
            let ret = {
                let mut guard = callback.lock().unwrap_or_else(PoisonError::into_inner);
                let f = &mut *guard;
                f(&HookInfo { port, item })
            };
            match ret {
                HookReturn::Remove => {
                    self.remove_hook(port, id);
                }
                HookReturn::Drop => return HookVerdict::Dropped,
                HookReturn::Pass => {
                    if kind == HookKind::Block {
                        self.wait_while_blocked(port, id);
                    }
                }
            }
        }
        HookVerdict::Continue
    }

    fn wait_while_blocked(&self, port: PortId, hook: HookId) {
        let mut g = self.lock();
        while g.hook_installed(port, hook) && g.port_streaming(port) {
            g = self
                .unblocked
                .wait(g)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn chain(&self, stage: StageId, item: DataItem) -> FlowReturn {
        let mut actions = Vec::new();
        let mut fan_out = false;
        let flow = {
            let mut g = self.lock();
            let outputs = g.outputs(stage);
            let Some(rec) = g.stages.get_mut(&stage) else {
                return FlowReturn::Flushing;
            };
            if !rec.state.is_streaming() {
                return FlowReturn::Flushing;
            }
            let Some(kind) = rec.kind else {
                return FlowReturn::Error;
            };
            let first_out = outputs.first().copied();

            match kind {
                StageKind::Source => FlowReturn::Error,
                StageKind::Passthrough | StageKind::Parser => match first_out {
                    Some(out) => {
                        actions.push(Action::Push(out, item));
                        FlowReturn::Ok
                    }
                    None => FlowReturn::NotLinked,
                },
                StageKind::Encoder => match first_out {
                    Some(out) => {
                        let item = match item {
                            DataItem::Buffer(mut buf) => {
                                let mut payload = b"h264:".to_vec();
                                payload.extend_from_slice(&buf.payload);
                                buf.payload = payload;
                                DataItem::Buffer(buf)
                            }
                            other => other,
                        };
                        actions.push(Action::Push(out, item));
                        FlowReturn::Ok
                    }
                    None => FlowReturn::NotLinked,
                },
                StageKind::Tee => {
                    fan_out = true;
                    for out in &outputs {
                        actions.push(Action::Push(*out, item.clone()));
                    }
                    FlowReturn::Ok
                }
                StageKind::Queue => match &rec.runtime {
                    Runtime::Queue { tx: Some(tx) } => {
                        if tx.send(item).is_ok() {
                            FlowReturn::Ok
                        } else {
                            FlowReturn::Flushing
                        }
                    }
                    _ => FlowReturn::Flushing,
                },
                StageKind::Muxer => {
                    let Some(out) = first_out else {
                        return FlowReturn::NotLinked;
                    };
                    let Runtime::Muxer { header_written } = &mut rec.runtime else {
                        return FlowReturn::Error;
                    };
                    match item {
                        DataItem::Buffer(buf) => {
                            if !*header_written {
                                *header_written = true;
                                actions.push(Action::Push(
                                    out,
                                    DataItem::Buffer(Buffer::new(buf.pts).with_payload(HEADER)),
                                ));
                            }
                            actions.push(Action::Push(out, DataItem::Buffer(buf)));
                        }
                        DataItem::Event(StreamEvent::EndOfStream) => {
                            if *header_written {
                                actions.push(Action::Push(
                                    out,
                                    DataItem::Buffer(Buffer::default().with_payload(TRAILER)),
                                ));
                            }
                            actions.push(Action::Push(out, item));
                        }
                        other => actions.push(Action::Push(out, other)),
                    }
                    FlowReturn::Ok
                }
                StageKind::FileSink | StageKind::FakeSink => {
                    Self::render(&mut g, stage, item, &mut actions)
                }
            }
        };

        let mut results = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Push(port, item) => results.push(self.push(port, item)),
                Action::Post(msg) => self.post(msg),
            }
        }

        if fan_out {
            // A tee only fails if no branch accepted the item.
            if results.is_empty() || results.contains(&FlowReturn::Ok) {
                FlowReturn::Ok
            } else {
                FlowReturn::NotLinked
            }
        } else {
            results
                .into_iter()
                .find(|r| *r != FlowReturn::Ok)
                .unwrap_or(flow)
        }
    }

    fn render(
        g: &mut Graph,
        stage: StageId,
        item: DataItem,
        actions: &mut Vec<Action>,
    ) -> FlowReturn {
        let (name, reached_eos) = {
            let Some(rec) = g.stages.get_mut(&stage) else {
                return FlowReturn::Flushing;
            };
            let name = rec.name.clone();
            let Runtime::Sink(sink) = &mut rec.runtime else {
                return FlowReturn::Error;
            };
            match item {
                DataItem::Buffer(buf) => {
                    sink.buffers += 1;
                    sink.bytes += buf.payload.len() as u64 + 1;
                    if let Some(file) = sink.file.as_mut() {
                        let written = file
                            .write_all(&buf.payload)
                            .and_then(|_| file.write_all(b"\n"));
                        if let Err(e) = written {
                            actions.push(Action::Post(BusMessage::Error {
                                source: stage,
                                source_name: name,
                                message: "Could not write to resource".to_string(),
                                debug: Some(e.to_string()),
                            }));
                            return FlowReturn::Error;
                        }
                    }
                    (name, false)
                }
                DataItem::Event(StreamEvent::EndOfStream) => {
                    sink.eos_count += 1;
                    sink.at_eos = true;
                    if let Some(file) = sink.file.as_mut() {
                        let _ = file.flush();
                    }
                    (name, true)
                }
                DataItem::Event(_) => (name, false),
            }
        };

        if reached_eos {
            let top = g.top_of(stage);
            if top != stage && g.all_sinks_at_eos(top) {
                if let Some(top_rec) = g.stages.get_mut(&top) {
                    if let Runtime::Container { eos_posted } = &mut top_rec.runtime {
                        if !*eos_posted {
                            *eos_posted = true;
                            tracing::debug!("All sinks under '{}' drained (last: '{}')", top_rec.name, name);
                            actions.push(Action::Post(BusMessage::EndOfStream {
                                source: top,
                                source_name: top_rec.name.clone(),
                            }));
                        }
                    }
                }
            }
        }
        FlowReturn::Ok
    }

    fn post(&self, msg: BusMessage) {
        let callbacks: Vec<Arc<BusCallback>> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, kind, _)| *kind == msg.kind())
            .map(|(_, _, cb)| cb.clone())
            .collect();
        for callback in callbacks {
            (callback.as_ref())(&msg);
        }
    }

    fn is_streaming(&self, stage: StageId) -> bool {
        self.lock()
            .stages
            .get(&stage)
            .is_some_and(|r| r.state.is_streaming())
    }

    fn spawn(&self, spawn: Spawn) {
        let weak = self.me.clone();
        let result = match spawn {
            Spawn::Source {
                name,
                port,
                script,
                stop,
            } => thread::Builder::new()
                .name(format!("{}:src", name))
                .spawn(move || run_source(weak, port, script, stop)),
            Spawn::Queue {
                name,
                stage,
                port,
                rx,
            } => thread::Builder::new()
                .name(format!("{}:src", name))
                .spawn(move || run_queue(weak, stage, port, rx)),
        };
        if let Err(e) = result {
            tracing::warn!("Failed to spawn streaming thread: {}", e);
        }
    }
}

fn run_source(weak: Weak<SimEngine>, port: PortId, script: SourceScript, stop: Arc<AtomicBool>) {
    let mut index = 0u64;
    while !stop.load(Ordering::Relaxed) {
        let Some(engine) = weak.upgrade() else {
            break;
        };
        if script.is_finished(index) {
            engine.push(port, DataItem::Event(StreamEvent::EndOfStream));
            break;
        }
        let flow = engine.push(port, DataItem::Buffer(script.frame(index)));
        drop(engine);
        if flow == FlowReturn::Flushing || flow == FlowReturn::Error {
            tracing::debug!("Source on {:?} stopping: {:?}", port, flow);
            break;
        }
        index += 1;
        let interval = script.frame_interval();
        if !interval.is_zero() {
            thread::sleep(interval);
        }
    }
}

fn run_queue(weak: Weak<SimEngine>, stage: StageId, port: PortId, rx: Receiver<DataItem>) {
    for item in rx.iter() {
        let Some(engine) = weak.upgrade() else {
            break;
        };
        if !engine.is_streaming(stage) {
            continue;
        }
        engine.push(port, item);
    }
}

impl GraphEngine for SimEngine {
    fn create_stage(&self, type_name: &str, instance_name: &str) -> EngineResult<StageId> {
        let Some(ty) = self.registry.lookup(type_name).cloned() else {
            return Err(EngineError::StageCreation {
                type_name: type_name.to_string(),
                instance: instance_name.to_string(),
            });
        };
        let mut g = self.lock();
        let id = g.alloc_stage();
        let runtime = match ty.kind {
            StageKind::Source => Runtime::Source {
                script: None,
                stop: None,
            },
            StageKind::Queue => Runtime::Queue { tx: None },
            StageKind::Muxer => Runtime::Muxer {
                header_written: false,
            },
            StageKind::FileSink | StageKind::FakeSink => Runtime::Sink(SinkState::default()),
            _ => Runtime::Idle,
        };
        g.stages.insert(
            id,
            StageRec {
                name: instance_name.to_string(),
                type_name: type_name.to_string(),
                kind: Some(ty.kind),
                parent: None,
                children: Vec::new(),
                state: RunState::Null,
                ports: Vec::new(),
                next_request: 0,
                props: HashMap::new(),
                runtime,
            },
        );
        for desc in ty.ports {
            g.add_port(
                id,
                desc.name.to_string(),
                desc.direction,
                desc.format,
                None,
                false,
            );
        }
        tracing::trace!("Created {} '{}' as {:?}", type_name, instance_name, id);
        Ok(id)
    }

    fn create_container(&self, name: &str) -> EngineResult<StageId> {
        let mut g = self.lock();
        let id = g.alloc_stage();
        g.stages.insert(
            id,
            StageRec {
                name: name.to_string(),
                type_name: "bin".to_string(),
                kind: None,
                parent: None,
                children: Vec::new(),
                state: RunState::Null,
                ports: Vec::new(),
                next_request: 0,
                props: HashMap::new(),
                runtime: Runtime::Container { eos_posted: false },
            },
        );
        Ok(id)
    }

    fn stage_name(&self, stage: StageId) -> Option<String> {
        self.lock().stages.get(&stage).map(|r| r.name.clone())
    }

    fn set_property(&self, stage: StageId, key: &str, value: PropertyValue) -> EngineResult<()> {
        let mut g = self.lock();
        let rec = g
            .stages
            .get_mut(&stage)
            .ok_or(EngineError::UnknownStage(stage))?;
        rec.props.insert(key.to_string(), value);
        Ok(())
    }

    fn static_port(&self, stage: StageId, name: &str) -> Option<PortId> {
        let g = self.lock();
        let rec = g.stages.get(&stage)?;
        rec.ports.iter().copied().find(|p| {
            g.ports
                .get(p)
                .is_some_and(|port| port.name == name && !port.request)
        })
    }

    fn add_ghost_port(
        &self,
        container: StageId,
        name: &str,
        target: PortId,
    ) -> EngineResult<PortId> {
        let mut g = self.lock();
        match g.stages.get(&container) {
            Some(rec) if rec.kind.is_none() => {}
            Some(rec) => {
                return Err(EngineError::InvalidOperation(format!(
                    "'{}' is not a container",
                    rec.name
                )))
            }
            None => return Err(EngineError::UnknownStage(container)),
        }
        let (owner, direction, format) = match g.ports.get(&target) {
            Some(rec) => (rec.stage, rec.direction, rec.format),
            None => return Err(EngineError::UnknownPort(target)),
        };
        if !g.is_ancestor(container, owner) {
            return Err(EngineError::InvalidOperation(format!(
                "{:?} is not inside the container",
                target
            )));
        }
        Ok(g.add_port(
            container,
            name.to_string(),
            direction,
            format,
            Some(target),
            false,
        ))
    }

    fn request_port(&self, stage: StageId) -> EngineResult<PortId> {
        let mut g = self.lock();
        let rec = g
            .stages
            .get_mut(&stage)
            .ok_or(EngineError::UnknownStage(stage))?;
        if rec.kind != Some(StageKind::Tee) {
            return Err(EngineError::InvalidOperation(format!(
                "'{}' has no request ports",
                rec.name
            )));
        }
        let name = format!("src_{}", rec.next_request);
        rec.next_request += 1;
        Ok(g.add_port(
            stage,
            name,
            PortDirection::Output,
            MediaFormat::Any,
            None,
            true,
        ))
    }

    fn release_request_port(&self, stage: StageId, port: PortId) -> EngineResult<()> {
        {
            let mut g = self.lock();
            match g.ports.get(&port) {
                Some(rec) if rec.stage == stage && rec.request => {}
                Some(_) => {
                    return Err(EngineError::InvalidOperation(format!(
                        "{:?} is not a request port of {:?}",
                        port, stage
                    )))
                }
                None => return Err(EngineError::UnknownPort(port)),
            }
            if let Some((src, sink)) = g.unlink_port(port) {
                self.journal.record(JournalEntry::Unlinked { src, sink });
            }
            g.ports.remove(&port);
            if let Some(rec) = g.stages.get_mut(&stage) {
                rec.ports.retain(|p| *p != port);
            }
        }
        self.unblocked.notify_all();
        Ok(())
    }

    fn link_ports(&self, src: PortId, sink: PortId) -> EngineResult<()> {
        let mut g = self.lock();
        let link_err = |reason: String| EngineError::Link { src, sink, reason };
        let (src_stage, src_dir, src_peer) = match g.ports.get(&src) {
            Some(rec) => (rec.stage, rec.direction, rec.peer),
            None => return Err(EngineError::UnknownPort(src)),
        };
        let (sink_stage, sink_dir, sink_peer) = match g.ports.get(&sink) {
            Some(rec) => (rec.stage, rec.direction, rec.peer),
            None => return Err(EngineError::UnknownPort(sink)),
        };
        if src_dir != PortDirection::Output || sink_dir != PortDirection::Input {
            return Err(link_err("wrong port direction".to_string()));
        }
        if src_peer.is_some() || sink_peer.is_some() {
            return Err(link_err("port already linked".to_string()));
        }
        let (src_fmt, sink_fmt) = (g.effective_format(src), g.effective_format(sink));
        if !src_fmt.can_feed(sink_fmt) {
            return Err(link_err(format!(
                "{:?} output cannot feed {:?} input",
                src_fmt, sink_fmt
            )));
        }
        let src_parent = g.stages.get(&src_stage).and_then(|r| r.parent);
        let sink_parent = g.stages.get(&sink_stage).and_then(|r| r.parent);
        if src_parent != sink_parent {
            return Err(link_err("stages are in different containers".to_string()));
        }
        if let Some(rec) = g.ports.get_mut(&src) {
            rec.peer = Some(sink);
        }
        if let Some(rec) = g.ports.get_mut(&sink) {
            rec.peer = Some(src);
        }
        self.journal.record(JournalEntry::Linked { src, sink });
        Ok(())
    }

    fn unlink_ports(&self, src: PortId, sink: PortId) -> EngineResult<()> {
        let mut g = self.lock();
        match g.ports.get(&src) {
            Some(rec) if rec.peer == Some(sink) => {}
            Some(_) => return Err(EngineError::NotLinked(src)),
            None => return Err(EngineError::UnknownPort(src)),
        }
        g.unlink_port(src);
        self.journal.record(JournalEntry::Unlinked { src, sink });
        Ok(())
    }

    fn peer(&self, port: PortId) -> Option<PortId> {
        self.lock().ports.get(&port).and_then(|p| p.peer)
    }

    fn add_to_container(&self, container: StageId, element: StageId) -> EngineResult<()> {
        let mut g = self.lock();
        if container == element || g.is_ancestor(element, container) {
            return Err(EngineError::InvalidOperation(
                "cannot add a container to itself".to_string(),
            ));
        }
        let name = match g.stages.get(&element) {
            Some(rec) if rec.parent.is_some() => {
                return Err(EngineError::InvalidOperation(format!(
                    "'{}' already has a parent",
                    rec.name
                )))
            }
            Some(rec) => rec.name.clone(),
            None => return Err(EngineError::UnknownStage(element)),
        };
        let clash = match g.stages.get(&container) {
            Some(rec) if rec.kind.is_none() => rec
                .children
                .iter()
                .any(|c| g.stages.get(c).is_some_and(|r| r.name == name)),
            Some(rec) => {
                return Err(EngineError::InvalidOperation(format!(
                    "'{}' is not a container",
                    rec.name
                )))
            }
            None => return Err(EngineError::UnknownStage(container)),
        };
        if clash {
            return Err(EngineError::InvalidOperation(format!(
                "name '{}' is not unique in container",
                name
            )));
        }
        if let Some(rec) = g.stages.get_mut(&element) {
            rec.parent = Some(container);
        }
        if let Some(rec) = g.stages.get_mut(&container) {
            rec.children.push(element);
        }
        self.journal
            .record(JournalEntry::Added { container, element });
        Ok(())
    }

    fn remove_from_container(&self, container: StageId, element: StageId) -> EngineResult<()> {
        {
            let mut g = self.lock();
            match g.stages.get(&element) {
                Some(rec) if rec.parent == Some(container) => {}
                Some(rec) => {
                    return Err(EngineError::InvalidOperation(format!(
                        "'{}' is not a child of {:?}",
                        rec.name, container
                    )))
                }
                None => return Err(EngineError::UnknownStage(element)),
            }
            let ports = g
                .stages
                .get(&element)
                .map(|r| r.ports.clone())
                .unwrap_or_default();
            for port in ports {
                if let Some((src, sink)) = g.unlink_port(port) {
                    self.journal.record(JournalEntry::Unlinked { src, sink });
                }
            }
            if let Some(rec) = g.stages.get_mut(&element) {
                rec.parent = None;
            }
            if let Some(rec) = g.stages.get_mut(&container) {
                rec.children.retain(|c| *c != element);
            }
            self.journal
                .record(JournalEntry::Removed { container, element });
        }
        self.unblocked.notify_all();
        Ok(())
    }

    fn dispose(&self, element: StageId) -> EngineResult<()> {
        match self.lock().stages.get(&element) {
            Some(rec) if rec.parent.is_some() => {
                return Err(EngineError::InvalidOperation(format!(
                    "'{}' is still inside a container",
                    rec.name
                )))
            }
            Some(_) => {}
            None => return Err(EngineError::UnknownStage(element)),
        }
        self.set_run_state(element, RunState::Null)?;

        // Hook closures are dropped after the lock is released.
        let mut freed_ports = Vec::new();
        let mut freed_stages = Vec::new();
        {
            let mut g = self.lock();
            for id in g.subtree(element) {
                let ports = g.stages.get(&id).map(|r| r.ports.clone()).unwrap_or_default();
                for port in ports {
                    if let Some((src, sink)) = g.unlink_port(port) {
                        self.journal.record(JournalEntry::Unlinked { src, sink });
                    }
                    freed_ports.extend(g.ports.remove(&port));
                }
                freed_stages.extend(g.stages.remove(&id));
            }
        }
        self.unblocked.notify_all();
        tracing::trace!(
            "Disposed {:?}: {} stages, {} ports",
            element,
            freed_stages.len(),
            freed_ports.len()
        );
        Ok(())
    }

    fn sync_run_state_with_parent(&self, element: StageId) -> EngineResult<()> {
        let parent_state = {
            let g = self.lock();
            let rec = g
                .stages
                .get(&element)
                .ok_or(EngineError::UnknownStage(element))?;
            let parent = rec.parent.ok_or_else(|| {
                EngineError::InvalidOperation(format!("'{}' has no parent", rec.name))
            })?;
            g.stages
                .get(&parent)
                .map(|p| p.state)
                .ok_or(EngineError::UnknownStage(parent))?
        };
        self.set_run_state(element, parent_state)
    }

    fn set_run_state(&self, element: StageId, state: RunState) -> EngineResult<()> {
        let mut messages = Vec::new();
        let mut spawns = Vec::new();
        let mut failure = None;
        {
            let mut g = self.lock();
            if !g.stages.contains_key(&element) {
                return Err(EngineError::UnknownStage(element));
            }
            for id in g.subtree(element) {
                let outputs = g.outputs(id);
                let Some(rec) = g.stages.get_mut(&id) else {
                    continue;
                };
                let old = rec.state;
                if old == state {
                    continue;
                }
                rec.state = state;
                let name = rec.name.clone();
                let kind = rec.kind;
                let location = rec
                    .props
                    .get("location")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                messages.push(BusMessage::StateChanged {
                    source: id,
                    source_name: name.clone(),
                    old,
                    new: state,
                    pending: None,
                });

                match &mut rec.runtime {
                    Runtime::Source { script, stop } => {
                        if state == RunState::Playing {
                            if let (Some(script), None) = (script.clone(), stop.as_ref()) {
                                if let Some(port) = outputs.first() {
                                    let flag = Arc::new(AtomicBool::new(false));
                                    *stop = Some(flag.clone());
                                    spawns.push(Spawn::Source {
                                        name,
                                        port: *port,
                                        script,
                                        stop: flag,
                                    });
                                }
                            }
                        } else if let Some(flag) = stop.take() {
                            flag.store(true, Ordering::Relaxed);
                        }
                    }
                    Runtime::Queue { tx } => {
                        if state.is_streaming() {
                            if tx.is_none() {
                                if let Some(port) = outputs.first() {
                                    let (sender, rx) = unbounded();
                                    *tx = Some(sender);
                                    spawns.push(Spawn::Queue {
                                        name,
                                        stage: id,
                                        port: *port,
                                        rx,
                                    });
                                }
                            }
                        } else {
                            *tx = None;
                        }
                    }
                    Runtime::Muxer { header_written } => {
                        if state == RunState::Null {
                            *header_written = false;
                        }
                    }
                    Runtime::Sink(sink) => {
                        if state == RunState::Null {
                            sink.file = None;
                            sink.at_eos = false;
                        } else if old == RunState::Null && kind == Some(StageKind::FileSink) {
                            match location.as_deref().map(File::create) {
                                Some(Ok(file)) => sink.file = Some(file),
                                Some(Err(e)) => {
                                    messages.push(BusMessage::Error {
                                        source: id,
                                        source_name: name.clone(),
                                        message: "Could not open file for writing".to_string(),
                                        debug: Some(e.to_string()),
                                    });
                                    failure.get_or_insert(EngineError::InvalidOperation(
                                        format!("'{}' cannot open its location: {}", name, e),
                                    ));
                                }
                                None => {
                                    messages.push(BusMessage::Error {
                                        source: id,
                                        source_name: name.clone(),
                                        message: "No file name specified for writing".to_string(),
                                        debug: None,
                                    });
                                    failure.get_or_insert(EngineError::InvalidOperation(
                                        format!("'{}' has no location", name),
                                    ));
                                }
                            }
                        }
                    }
                    Runtime::Container { eos_posted } => {
                        if state == RunState::Null {
                            *eos_posted = false;
                        }
                    }
                    Runtime::Idle => {}
                }
            }
        }

        self.unblocked.notify_all();
        for spawn in spawns {
            self.spawn(spawn);
        }
        for msg in messages {
            self.post(msg);
        }
        failure.map_or(Ok(()), Err)
    }

    fn run_state(&self, element: StageId) -> Option<RunState> {
        self.lock().stages.get(&element).map(|r| r.state)
    }

    fn add_hook(&self, port: PortId, kind: HookKind, callback: HookFn) -> EngineResult<HookId> {
        let mut g = self.lock();
        let id = HookId(g.next_hook);
        g.next_hook += 1;
        let rec = g
            .ports
            .get_mut(&port)
            .ok_or(EngineError::UnknownPort(port))?;
        rec.hooks.push(HookRec {
            id,
            kind,
            callback: Arc::new(Mutex::new(callback)),
        });
        Ok(id)
    }

    fn remove_hook(&self, port: PortId, hook: HookId) -> bool {
        let removed = {
            let mut g = self.lock();
            match g.ports.get_mut(&port) {
                Some(rec) => {
                    let before = rec.hooks.len();
                    rec.hooks.retain(|h| h.id != hook);
                    rec.hooks.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.unblocked.notify_all();
        }
        removed
    }

    fn inject_event(&self, port: PortId, event: StreamEvent) -> bool {
        let direction = match self.lock().ports.get(&port) {
            Some(rec) => rec.direction,
            None => return false,
        };
        self.journal
            .record(JournalEntry::EventInjected { port, event });
        let flow = match direction {
            PortDirection::Input => self.deliver(port, DataItem::Event(event)),
            PortDirection::Output => self.push(port, DataItem::Event(event)),
        };
        flow == FlowReturn::Ok
    }

    fn subscribe(&self, kind: BusMessageKind, callback: BusCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, kind, Arc::new(callback)));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|(sid, _, _)| *sid != id);
        subs.len() != before
    }

    fn snapshot(&self, container: StageId) -> TopologySnapshot {
        let g = self.lock();
        let ids = g.subtree(container);
        let stages = ids
            .iter()
            .filter_map(|id| {
                g.stages.get(id).map(|rec| StageSnapshot {
                    id: *id,
                    name: rec.name.clone(),
                    type_name: rec.type_name.clone(),
                    parent: rec.parent,
                    state: rec.state,
                })
            })
            .collect();
        let mut links = Vec::new();
        for id in &ids {
            let Some(rec) = g.stages.get(id) else {
                continue;
            };
            for port in &rec.ports {
                let Some(port_rec) = g.ports.get(port) else {
                    continue;
                };
                if port_rec.direction != PortDirection::Output {
                    continue;
                }
                let Some(peer) = port_rec.peer else {
                    continue;
                };
                let Some(peer_stage) = g.ports.get(&peer).map(|p| p.stage) else {
                    continue;
                };
                if ids.contains(&peer_stage) {
                    links.push(LinkSnapshot {
                        src_stage: *id,
                        src_port: *port,
                        sink_stage: peer_stage,
                        sink_port: peer,
                    });
                }
            }
        }
        TopologySnapshot { stages, links }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn linked_pair(engine: &SimEngine, a: &str, b: &str) -> (StageId, StageId) {
        let pipeline = engine.create_container("pipeline").unwrap();
        let first = engine.create_stage(a, "first").unwrap();
        let second = engine.create_stage(b, "second").unwrap();
        engine.add_to_container(pipeline, first).unwrap();
        engine.add_to_container(pipeline, second).unwrap();
        let src = engine.static_port(first, "src").unwrap();
        let sink = engine.static_port(second, "sink").unwrap();
        engine.link_ports(src, sink).unwrap();
        (first, second)
    }

    #[test]
    fn test_unknown_type_fails() {
        let engine = SimEngine::new();
        let err = engine.create_stage("nvh264enc", "enc").unwrap_err();
        assert!(matches!(err, EngineError::StageCreation { .. }));
    }

    #[test]
    fn test_link_rejects_incompatible_formats() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let mux = engine.create_stage("mp4mux", "mux").unwrap();
        let parse = engine.create_stage("h264parse", "parse").unwrap();
        engine.add_to_container(pipeline, mux).unwrap();
        engine.add_to_container(pipeline, parse).unwrap();

        let err = engine
            .link_ports(
                engine.static_port(mux, "src").unwrap(),
                engine.static_port(parse, "sink").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Link { .. }));
    }

    #[test]
    fn test_link_requires_same_container() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let src = engine.create_stage("videotestsrc", "src").unwrap();
        let sink = engine.create_stage("fakesink", "sink").unwrap();
        engine.add_to_container(pipeline, src).unwrap();

        let err = engine
            .link_ports(
                engine.static_port(src, "src").unwrap(),
                engine.static_port(sink, "sink").unwrap(),
            )
            .unwrap_err();
        assert!(matches!(err, EngineError::Link { .. }));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let a = engine.create_container("filesink-bin").unwrap();
        let b = engine.create_container("filesink-bin").unwrap();
        engine.add_to_container(pipeline, a).unwrap();
        assert!(engine.add_to_container(pipeline, b).is_err());
    }

    #[test]
    fn test_manual_push_reaches_sink_and_posts_top_level_eos() {
        let engine = SimEngine::new();
        let (src, sink) = linked_pair(&engine, "videotestsrc", "fakesink");
        let pipeline = engine.parent_of(src).unwrap();

        let (tx, rx) = mpsc::channel();
        engine.subscribe(
            BusMessageKind::EndOfStream,
            Box::new(move |msg| {
                let _ = tx.send(msg.source());
            }),
        );

        engine.set_run_state(pipeline, RunState::Playing).unwrap();
        assert_eq!(
            engine.push_frame(src, Buffer::new(Duration::ZERO)),
            FlowReturn::Ok
        );
        assert_eq!(engine.end_stream(src), FlowReturn::Ok);

        let report = engine.sink_report(sink).unwrap();
        assert_eq!(report.buffers, 1);
        assert_eq!(report.eos_count, 1);
        assert_eq!(rx.try_recv().unwrap(), pipeline);
    }

    #[test]
    fn test_tee_ignores_unlinked_outputs() {
        let engine = SimEngine::new();
        let (src, tee) = linked_pair(&engine, "videotestsrc", "tee");
        let pipeline = engine.parent_of(src).unwrap();
        let sink = engine.create_stage("fakesink", "sink").unwrap();
        engine.add_to_container(pipeline, sink).unwrap();

        let linked = engine.request_port(tee).unwrap();
        let _dangling = engine.request_port(tee).unwrap();
        engine
            .link_ports(linked, engine.static_port(sink, "sink").unwrap())
            .unwrap();
        engine.set_run_state(pipeline, RunState::Playing).unwrap();

        assert_eq!(
            engine.push_frame(src, Buffer::new(Duration::ZERO)),
            FlowReturn::Ok
        );
        assert_eq!(engine.sink_report(sink).unwrap().buffers, 1);
    }

    #[test]
    fn test_block_hook_holds_thread_until_removed() {
        let engine = SimEngine::new();
        let (src, sink) = linked_pair(&engine, "videotestsrc", "fakesink");
        let pipeline = engine.parent_of(src).unwrap();
        engine.set_run_state(pipeline, RunState::Playing).unwrap();

        let port = engine.static_port(src, "src").unwrap();
        let (fired_tx, fired_rx) = mpsc::channel();
        let hook = engine
            .add_hook(
                port,
                HookKind::Block,
                Box::new(move |_| {
                    let _ = fired_tx.send(());
                    HookReturn::Pass
                }),
            )
            .unwrap();

        let pusher = {
            let engine = engine.clone();
            thread::spawn(move || engine.push_frame(src, Buffer::new(Duration::ZERO)))
        };

        fired_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(engine.sink_report(sink).unwrap().buffers, 0);

        assert!(engine.remove_hook(port, hook));
        assert_eq!(pusher.join().unwrap(), FlowReturn::Ok);
        assert_eq!(engine.sink_report(sink).unwrap().buffers, 1);
    }

    #[test]
    fn test_queue_crosses_threads() {
        let engine = SimEngine::new();
        let (src, queue) = linked_pair(&engine, "videotestsrc", "queue");
        let pipeline = engine.parent_of(src).unwrap();
        let sink = engine.create_stage("fakesink", "sink").unwrap();
        engine.add_to_container(pipeline, sink).unwrap();
        engine
            .link_ports(
                engine.static_port(queue, "src").unwrap(),
                engine.static_port(sink, "sink").unwrap(),
            )
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        engine
            .add_hook(
                engine.static_port(sink, "sink").unwrap(),
                HookKind::DataPass,
                Box::new(move |_| {
                    let _ = tx.send(thread::current().id() != caller);
                    HookReturn::Pass
                }),
            )
            .unwrap();

        engine.set_run_state(pipeline, RunState::Playing).unwrap();
        engine.push_frame(src, Buffer::new(Duration::ZERO));
        assert!(rx.recv_timeout(Duration::from_secs(2)).unwrap());
    }

    #[test]
    fn test_scripted_source_runs_to_eos() {
        let engine = SimEngine::new();
        let (src, sink) = linked_pair(&engine, "videotestsrc", "fakesink");
        let pipeline = engine.parent_of(src).unwrap();
        engine
            .set_source_script(
                src,
                SourceScript {
                    frame_count: Some(5),
                    frame_interval_ms: 0,
                    ..Default::default()
                },
            )
            .unwrap();

        let (tx, rx) = mpsc::channel();
        engine.subscribe(
            BusMessageKind::EndOfStream,
            Box::new(move |_| {
                let _ = tx.send(());
            }),
        );
        engine.set_run_state(pipeline, RunState::Playing).unwrap();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(engine.sink_report(sink).unwrap().buffers, 5);
    }

    #[test]
    fn test_filesink_without_location_fails_state_change() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let sink = engine.create_stage("filesink", "filesink").unwrap();
        engine.add_to_container(pipeline, sink).unwrap();

        let (tx, rx) = mpsc::channel();
        engine.subscribe(
            BusMessageKind::Error,
            Box::new(move |msg| {
                let _ = tx.send(msg.clone());
            }),
        );
        assert!(engine.set_run_state(pipeline, RunState::Playing).is_err());
        assert!(matches!(rx.try_recv().unwrap(), BusMessage::Error { .. }));
    }

    #[test]
    fn test_release_request_port_unlinks() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let tee = engine.create_stage("tee", "tee").unwrap();
        let sink = engine.create_stage("fakesink", "sink").unwrap();
        engine.add_to_container(pipeline, tee).unwrap();
        engine.add_to_container(pipeline, sink).unwrap();
        let port = engine.request_port(tee).unwrap();
        let sink_port = engine.static_port(sink, "sink").unwrap();
        engine.link_ports(port, sink_port).unwrap();

        engine.release_request_port(tee, port).unwrap();
        assert!(!engine.port_exists(port));
        assert_eq!(engine.peer(sink_port), None);
    }

    #[test]
    fn test_dispose_frees_subtree_ports_and_hooks() {
        let engine = SimEngine::new();
        let pipeline = engine.create_container("pipeline").unwrap();
        let bin = engine.create_container("bin").unwrap();
        let queue = engine.create_stage("queue", "queue").unwrap();
        let sink = engine.create_stage("fakesink", "sink").unwrap();
        engine.add_to_container(bin, queue).unwrap();
        engine.add_to_container(bin, sink).unwrap();
        let queue_src = engine.static_port(queue, "src").unwrap();
        let sink_port = engine.static_port(sink, "sink").unwrap();
        engine.link_ports(queue_src, sink_port).unwrap();
        let ghost = engine
            .add_ghost_port(bin, "sink", engine.static_port(queue, "sink").unwrap())
            .unwrap();

        let captured = Arc::new(());
        let held = captured.clone();
        engine
            .add_hook(
                sink_port,
                HookKind::EventDownstream,
                Box::new(move |_| {
                    let _ = &held;
                    HookReturn::Pass
                }),
            )
            .unwrap();
        assert_eq!(Arc::strong_count(&captured), 2);

        engine.add_to_container(pipeline, bin).unwrap();
        assert!(matches!(
            engine.dispose(bin),
            Err(EngineError::InvalidOperation(_))
        ));
        engine.remove_from_container(pipeline, bin).unwrap();
        engine.dispose(bin).unwrap();

        for stage in [bin, queue, sink] {
            assert_eq!(engine.stage_name(stage), None);
        }
        for port in [queue_src, sink_port, ghost] {
            assert!(!engine.port_exists(port));
        }
        assert_eq!(engine.stage_count(), 1);
        assert_eq!(Arc::strong_count(&captured), 1);
        assert_eq!(engine.snapshot(pipeline).stages.len(), 1);
        assert_eq!(engine.dispose(bin), Err(EngineError::UnknownStage(bin)));
    }

    #[test]
    fn test_snapshot_lists_links() {
        let engine = SimEngine::new();
        let (src, _) = linked_pair(&engine, "videotestsrc", "fakesink");
        let pipeline = engine.parent_of(src).unwrap();
        let snap = engine.snapshot(pipeline);
        assert_eq!(snap.stages.len(), 3);
        assert_eq!(snap.links.len(), 1);
        assert_eq!(snap.links[0].src_stage, src);
    }
}
