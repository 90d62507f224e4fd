//! Recording branches and the factory that builds them.
//!
//! A branch is a container holding `queue -> encoder -> parser -> muxer -> sink`,
//! exposing the queue's input as a ghost port named `sink`. The factory only
//! constructs; nothing touches the live graph until the lifecycle controller
//! takes ownership.

use crate::control::{ControlHandle, DeferredCall};
use crate::engine::{
    EngineError, GraphEngine, HookId, HookKind, HookReturn, PortId, PropertyValue, StageId,
};
use crate::recording::error::{BranchError, BranchResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identity of a branch, unique per factory.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BranchId(pub u32);

impl fmt::Debug for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BranchId({})", self.0)
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch-{}", self.0)
    }
}

/// Lifecycle state of a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BranchState {
    Constructed,
    Attached,
    DetachRequested,
    Blocked,
    FlushPending,
    Removed,
}

impl BranchState {
    /// Whether a detach sequence has started and can no longer be aborted.
    pub fn is_detaching(self) -> bool {
        self >= BranchState::DetachRequested && self != BranchState::Removed
    }
}

/// Stage types and naming used to build branches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BranchTemplate {
    /// Base name of the branch container.
    pub name: String,
    pub queue: String,
    pub encoder: String,
    pub parser: String,
    pub muxer: String,
    pub sink: String,
    /// Sink property that receives the destination path.
    pub location_property: String,
    /// Install the end-of-stream hook on the sink input.
    pub track_eos: bool,
}

impl Default for BranchTemplate {
    fn default() -> Self {
        Self {
            name: "filesink-bin".to_string(),
            queue: "queue".to_string(),
            encoder: "vaapih264enc".to_string(),
            parser: "h264parse".to_string(),
            muxer: "mp4mux".to_string(),
            sink: "filesink".to_string(),
            location_property: "location".to_string(),
            track_eos: true,
        }
    }
}

/// A detachable recording subgraph.
#[derive(Debug)]
pub struct Branch {
    id: BranchId,
    name: String,
    destination: PathBuf,
    container: StageId,
    stages: Vec<StageId>,
    input: PortId,
    sink: StageId,
    eos_hook: Option<HookId>,
    pub(crate) tap_port: Option<PortId>,
    pub(crate) state: BranchState,
}

impl Branch {
    pub fn id(&self) -> BranchId {
        self.id
    }

    /// Name of the branch container.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn container(&self) -> StageId {
        self.container
    }

    /// Member stages in data-flow order.
    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    /// The single external input (a ghost port on the container).
    pub fn input(&self) -> PortId {
        self.input
    }

    pub fn sink(&self) -> StageId {
        self.sink
    }

    /// Whether sink-side end-of-stream is reported back to the control thread.
    pub fn tracks_eos(&self) -> bool {
        self.eos_hook.is_some()
    }

    /// Junction output feeding this branch while attached.
    pub fn tap_port(&self) -> Option<PortId> {
        self.tap_port
    }

    pub fn state(&self) -> BranchState {
        self.state
    }
}

/// Builds detached branches from a [`BranchTemplate`].
pub struct BranchFactory {
    engine: Arc<dyn GraphEngine>,
    template: BranchTemplate,
    control: ControlHandle,
    next_id: u32,
}

impl BranchFactory {
    pub fn new(engine: Arc<dyn GraphEngine>, template: BranchTemplate, control: ControlHandle) -> Self {
        Self {
            engine,
            template,
            control,
            next_id: 0,
        }
    }

    pub fn template(&self) -> &BranchTemplate {
        &self.template
    }

    /// Construct a branch writing to `destination`. The live graph is untouched,
    /// on success and on failure.
    pub fn build(&mut self, destination: impl Into<PathBuf>) -> BranchResult<Branch> {
        let destination = destination.into();
        let id = BranchId(self.next_id);
        self.next_id += 1;
        let t = self.template.clone();
        tracing::info!(branch = %id, "Creating {} for {}", t.name, destination.display());

        // Create every stage before anything else so a missing type fails fast.
        let queue = self.create(&t.queue, "queue")?;
        let encoder = self.create(&t.encoder, "encoder")?;
        let parser = self.create(&t.parser, "parser")?;
        let muxer = self.create(&t.muxer, "muxer")?;
        let sink = self.create(&t.sink, "sink")?;
        let stages = vec![queue, encoder, parser, muxer, sink];

        let name = format!("{}-{}", t.name, id.0);
        let container = self.engine.create_container(&name)?;
        for stage in &stages {
            self.engine.add_to_container(container, *stage)?;
        }
        self.engine.set_property(
            sink,
            &t.location_property,
            PropertyValue::from(destination.to_string_lossy().into_owned()),
        )?;

        self.link("queue", queue, "encoder", encoder)?;
        self.link("encoder", encoder, "parser", parser)?;
        self.link("parser", parser, "muxer", muxer)?;
        self.link("muxer", muxer, "sink", sink)?;

        let queue_input = self.port(queue, "sink", "queue")?;
        let input = self.engine.add_ghost_port(container, "sink", queue_input)?;

        let eos_hook = if t.track_eos {
            Some(self.install_eos_hook(id, sink)?)
        } else {
            None
        };
        tracing::debug!(branch = %id, "Built {} with {} stages", name, stages.len());

        Ok(Branch {
            id,
            name,
            destination,
            container,
            stages,
            input,
            sink,
            eos_hook,
            tap_port: None,
            state: BranchState::Constructed,
        })
    }

    /// Free a branch that never made it into the graph, such as a rejected attach.
    pub fn discard(&self, branch: Branch) -> BranchResult<()> {
        if branch.state() != BranchState::Constructed {
            return Err(BranchError::InvalidTransition {
                state: branch.state(),
                event: crate::recording::LifecycleEvent::Finalized,
            });
        }
        tracing::debug!(branch = %branch.id(), "Discarding {}", branch.name());
        self.engine.dispose(branch.container())?;
        Ok(())
    }

    fn create(&self, type_name: &str, role: &str) -> BranchResult<StageId> {
        self.engine
            .create_stage(type_name, role)
            .map_err(|e| match e {
                EngineError::StageCreation {
                    type_name,
                    instance,
                } => BranchError::StageCreation {
                    type_name,
                    instance,
                },
                other => BranchError::Engine(other),
            })
    }

    fn port(&self, stage: StageId, name: &str, role: &str) -> BranchResult<PortId> {
        self.engine
            .static_port(stage, name)
            .ok_or_else(|| BranchError::Link {
                from: role.to_string(),
                to: role.to_string(),
                reason: format!("no '{}' port", name),
            })
    }

    fn link(&self, from: &str, src: StageId, to: &str, sink: StageId) -> BranchResult<()> {
        let link_err = |reason: String| BranchError::Link {
            from: from.to_string(),
            to: to.to_string(),
            reason,
        };
        let out = self
            .engine
            .static_port(src, "src")
            .ok_or_else(|| link_err("no 'src' port".to_string()))?;
        let input = self
            .engine
            .static_port(sink, "sink")
            .ok_or_else(|| link_err("no 'sink' port".to_string()))?;
        self.engine.link_ports(out, input).map_err(|e| match e {
            EngineError::Link { reason, .. } => link_err(reason),
            other => BranchError::Engine(other),
        })
    }

    fn install_eos_hook(&self, id: BranchId, sink: StageId) -> BranchResult<HookId> {
        let port = self.port(sink, "sink", "sink")?;
        let control = self.control.clone();
        let hook = self.engine.add_hook(
            port,
            HookKind::EventDownstream,
            Box::new(move |info| {
                if info.item.is_eos() {
                    tracing::info!(branch = %id, "Sink received end-of-stream, scheduling removal");
                    control.schedule(DeferredCall::SinkEos { branch: id });
                }
                HookReturn::Pass
            }),
        )?;
        Ok(hook)
    }
}
