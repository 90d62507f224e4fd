//! Engine-specific error types.

use crate::engine::id::{PortId, StageId};
use thiserror::Error;

/// Errors reported by a `GraphEngine` implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("No stage type '{type_name}' available for '{instance}'")]
    StageCreation { type_name: String, instance: String },

    #[error("Cannot link {src:?} -> {sink:?}: {reason}")]
    Link {
        src: PortId,
        sink: PortId,
        reason: String,
    },

    #[error("Unknown stage {0:?}")]
    UnknownStage(StageId),

    #[error("Unknown port {0:?}")]
    UnknownPort(PortId),

    #[error("Port {0:?} is not linked")]
    NotLinked(PortId),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
