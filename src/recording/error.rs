//! Branch construction and lifecycle errors.

use crate::engine::EngineError;
use crate::recording::branch::{BranchId, BranchState};
use crate::recording::lifecycle::LifecycleEvent;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BranchError {
    /// A stage type the branch needs is not available.
    #[error("Cannot create '{type_name}' stage for {instance}")]
    StageCreation { type_name: String, instance: String },

    /// Adjacent stages cannot be linked.
    #[error("Cannot link {from} -> {to}: {reason}")]
    Link {
        from: String,
        to: String,
        reason: String,
    },

    /// The tap point cannot take another branch right now.
    #[error("Cannot attach to tap '{tap}': {reason}")]
    Attach { tap: String, reason: String },

    #[error("Detach of {branch} is already in progress")]
    DetachInProgress { branch: BranchId },

    #[error("{branch} is not attached")]
    NotAttached { branch: BranchId },

    #[error("Unknown branch {0}")]
    UnknownBranch(BranchId),

    #[error("{event:?} is not valid in state {state:?}")]
    InvalidTransition {
        state: BranchState,
        event: LifecycleEvent,
    },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type BranchResult<T> = std::result::Result<T, BranchError>;
