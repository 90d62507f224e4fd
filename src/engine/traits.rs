//! GraphEngine trait: the narrow capability contract this crate needs from a
//! media graph engine.
//!
//! Everything structural (create/add/remove/link, run-state changes) is meant to be
//! called from the control thread. Port-local operations (`unlink_ports`,
//! `inject_event`, `remove_hook`) are safe to call from inside an interception hook.

use crate::engine::bus::{BusCallback, BusMessageKind, RunState};
use crate::engine::buffer::StreamEvent;
use crate::engine::error::EngineResult;
use crate::engine::id::{HookId, PortId, StageId, SubscriptionId};
use crate::engine::port::{HookFn, HookKind};
use crate::engine::snapshot::TopologySnapshot;
use serde::{Deserialize, Serialize};

/// A stage property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

/// Capability contract of the external graph engine.
#[cfg_attr(test, mockall::automock)]
pub trait GraphEngine: Send + Sync {
    /// Instantiate a stage of a registered type. Fails if the type is unavailable.
    fn create_stage(&self, type_name: &str, instance_name: &str) -> EngineResult<StageId>;

    /// Create an empty container that can hold stages and expose ghost ports.
    fn create_container(&self, name: &str) -> EngineResult<StageId>;

    fn stage_name(&self, stage: StageId) -> Option<String>;

    fn set_property(&self, stage: StageId, key: &str, value: PropertyValue) -> EngineResult<()>;

    /// Look up an always-present port by name (e.g. `"sink"`, `"src"`).
    fn static_port(&self, stage: StageId, name: &str) -> Option<PortId>;

    /// Expose `target` (a port of a child) as a port of `container`.
    fn add_ghost_port(&self, container: StageId, name: &str, target: PortId)
        -> EngineResult<PortId>;

    /// Request a new output port from a junction stage.
    fn request_port(&self, stage: StageId) -> EngineResult<PortId>;

    fn release_request_port(&self, stage: StageId, port: PortId) -> EngineResult<()>;

    fn link_ports(&self, src: PortId, sink: PortId) -> EngineResult<()>;

    /// Port-local; safe from inside a hook.
    fn unlink_ports(&self, src: PortId, sink: PortId) -> EngineResult<()>;

    fn peer(&self, port: PortId) -> Option<PortId>;

    fn add_to_container(&self, container: StageId, element: StageId) -> EngineResult<()>;

    fn remove_from_container(&self, container: StageId, element: StageId) -> EngineResult<()>;

    /// Free `element` and everything under it: stages, ports and the hooks on
    /// them. The element must not be inside a container; it is set to Null first.
    fn dispose(&self, element: StageId) -> EngineResult<()>;

    fn sync_run_state_with_parent(&self, element: StageId) -> EngineResult<()>;

    fn set_run_state(&self, element: StageId, state: RunState) -> EngineResult<()>;

    fn run_state(&self, element: StageId) -> Option<RunState>;

    fn add_hook(&self, port: PortId, kind: HookKind, callback: HookFn) -> EngineResult<HookId>;

    /// Port-local; safe from inside a hook.
    fn remove_hook(&self, port: PortId, hook: HookId) -> bool;

    /// Push `event` into `port` as if it had arrived from upstream. Port-local;
    /// safe from inside a hook. Returns whether the event was accepted.
    fn inject_event(&self, port: PortId, event: StreamEvent) -> bool;

    fn subscribe(&self, kind: BusMessageKind, callback: BusCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    fn snapshot(&self, container: StageId) -> TopologySnapshot;
}
