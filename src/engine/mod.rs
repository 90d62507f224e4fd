//! Graph engine capability contract.
//!
//! The recording core never touches a media framework directly. It drives a
//! [`GraphEngine`]: stages with ports, containers with ghost ports, request
//! ports on junctions, interception hooks, run states, and a global bus.
//!
//! # Threading
//!
//! ```text
//! streaming threads ──hooks──► DeferredCall queue ──► control thread
//! engine bus        ──────────►        │
//!                                      └─► graph mutations (add/remove/state)
//! ```
//!
//! Hooks run inline on whichever thread is pushing. Only port-local operations
//! are allowed from inside a hook; everything else is deferred.

pub mod buffer;
pub mod bus;
pub mod error;
pub mod id;
pub mod port;
pub mod sim;
pub mod snapshot;
pub mod traits;

pub use buffer::{Buffer, DataItem, Region, StreamEvent};
pub use bus::{BusCallback, BusMessage, BusMessageKind, RunState};
pub use error::{EngineError, EngineResult};
pub use id::{HookId, PortId, StageId, SubscriptionId};
pub use port::{
    HookFn, HookInfo, HookKind, HookReturn, MediaFormat, PortDescriptor, PortDirection,
};
pub use snapshot::{LinkSnapshot, StageSnapshot, TopologySnapshot};
pub use traits::{GraphEngine, PropertyValue};

#[cfg(test)]
pub use traits::MockGraphEngine;
