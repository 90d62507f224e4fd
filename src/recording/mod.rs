//! Recording core: presence debouncing and branch attach/detach.
//!
//! ```text
//! detector hook ──► PresenceSampler ──► PresenceDebouncer ──► DeferredCall
//!                                                              │
//!                     BranchFactory ──Branch──► BranchLifecycleController ──► engine
//! ```

pub mod branch;
pub mod debouncer;
pub mod error;
pub mod lifecycle;
pub mod presence;
pub mod tap;

pub use branch::{Branch, BranchFactory, BranchId, BranchState, BranchTemplate};
pub use debouncer::{DetectionState, PresenceDebouncer, PresenceEdge, PresenceSink};
pub use error::{BranchError, BranchResult};
pub use lifecycle::{
    AttachOutcome, AttachPolicy, AttachRejected, BranchLifecycleController, Effect, LifecycleEvent,
    LOG_CAPACITY,
};
pub use presence::{install_presence_hook, PresenceSampler};
pub use tap::TapPoint;
