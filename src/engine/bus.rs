//! Global event bus types and run states.

use crate::engine::id::StageId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Run state of a stage or container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunState {
    /// Inert: no resources held, no threads running.
    Null,
    Ready,
    Paused,
    Playing,
}

impl RunState {
    /// Whether data is allowed to flow in this state.
    pub fn is_streaming(self) -> bool {
        matches!(self, RunState::Paused | RunState::Playing)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Null => "NULL",
            RunState::Ready => "READY",
            RunState::Paused => "PAUSED",
            RunState::Playing => "PLAYING",
        };
        f.write_str(s)
    }
}

/// Messages posted on the engine's global bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// A stage failed; the graph is no longer trustworthy.
    Error {
        source: StageId,
        source_name: String,
        message: String,
        debug: Option<String>,
    },
    /// Every sink under the top-level container has drained.
    EndOfStream { source: StageId, source_name: String },
    StateChanged {
        source: StageId,
        source_name: String,
        old: RunState,
        new: RunState,
        pending: Option<RunState>,
    },
}

impl BusMessage {
    pub fn kind(&self) -> BusMessageKind {
        match self {
            BusMessage::Error { .. } => BusMessageKind::Error,
            BusMessage::EndOfStream { .. } => BusMessageKind::EndOfStream,
            BusMessage::StateChanged { .. } => BusMessageKind::StateChanged,
        }
    }

    pub fn source(&self) -> StageId {
        match self {
            BusMessage::Error { source, .. }
            | BusMessage::EndOfStream { source, .. }
            | BusMessage::StateChanged { source, .. } => *source,
        }
    }
}

/// Bus subscription filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusMessageKind {
    Error,
    EndOfStream,
    StateChanged,
}

/// Bus callback, invoked synchronously on the posting thread.
pub type BusCallback = Box<dyn Fn(&BusMessage) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_ordering() {
        assert!(RunState::Null < RunState::Playing);
        assert!(RunState::Paused.is_streaming());
        assert!(!RunState::Ready.is_streaming());
        assert_eq!(RunState::Playing.to_string(), "PLAYING");
    }

    #[test]
    fn test_message_kind() {
        let msg = BusMessage::EndOfStream {
            source: StageId(1),
            source_name: "pipeline0".to_string(),
        };
        assert_eq!(msg.kind(), BusMessageKind::EndOfStream);
        assert_eq!(msg.source(), StageId(1));
    }
}
