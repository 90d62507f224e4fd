//! Port descriptors and interception hooks.
//!
//! Each stage declares its ports with a direction and a media format. The engine
//! uses the formats to validate links and invokes hooks inline on whichever
//! thread is pushing through the port.

use crate::engine::buffer::DataItem;
use crate::engine::id::PortId;
use serde::{Deserialize, Serialize};

/// Whether a port consumes or produces data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    /// Receives data from upstream (a "sink" pad).
    Input,
    /// Produces data for downstream (a "src" pad).
    Output,
}

/// Media format negotiated on a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaFormat {
    /// Accepts or produces whatever its peer does.
    Any,
    RawVideo,
    H264,
    Mp4,
}

impl MediaFormat {
    /// Whether an output of format `self` may feed an input of format `input`.
    pub fn can_feed(self, input: MediaFormat) -> bool {
        self == MediaFormat::Any || input == MediaFormat::Any || self == input
    }
}

/// Static descriptor for a stage's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortDescriptor {
    pub name: &'static str,
    pub direction: PortDirection,
    pub format: MediaFormat,
}

impl PortDescriptor {
    pub const fn input(name: &'static str, format: MediaFormat) -> Self {
        Self {
            name,
            direction: PortDirection::Input,
            format,
        }
    }

    pub const fn output(name: &'static str, format: MediaFormat) -> Self {
        Self {
            name,
            direction: PortDirection::Output,
            format,
        }
    }
}

/// Which traffic an interception hook observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Every buffer passing the port.
    DataPass,
    /// Fires on the next item of any kind; the pushing thread is held until the
    /// callback returns, and stays held while the hook remains installed.
    Block,
    /// Every downstream event passing the port.
    EventDownstream,
}

impl HookKind {
    /// Whether this hook kind is interested in `item`.
    pub fn matches(self, item: &DataItem) -> bool {
        match self {
            HookKind::Block => true,
            HookKind::DataPass => matches!(item, DataItem::Buffer(_)),
            HookKind::EventDownstream => matches!(item, DataItem::Event(_)),
        }
    }
}

/// Directive returned by a hook callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookReturn {
    /// Let the item continue. For `Block` hooks this keeps the port blocked.
    Pass,
    /// Swallow the item.
    Drop,
    /// Uninstall this hook and let the item continue.
    Remove,
}

/// What a hook callback sees.
#[derive(Debug)]
pub struct HookInfo<'a> {
    pub port: PortId,
    pub item: &'a DataItem,
}

/// Hook callback, invoked on an engine data thread.
pub type HookFn = Box<dyn FnMut(&HookInfo<'_>) -> HookReturn + Send>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::buffer::{Buffer, StreamEvent};
    use std::time::Duration;

    #[test]
    fn test_format_compatibility() {
        assert!(MediaFormat::Any.can_feed(MediaFormat::H264));
        assert!(MediaFormat::RawVideo.can_feed(MediaFormat::Any));
        assert!(MediaFormat::H264.can_feed(MediaFormat::H264));
        assert!(!MediaFormat::Mp4.can_feed(MediaFormat::H264));
        assert!(!MediaFormat::RawVideo.can_feed(MediaFormat::H264));
    }

    #[test]
    fn test_hook_kind_matching() {
        let buf = DataItem::Buffer(Buffer::new(Duration::ZERO));
        let eos = DataItem::Event(StreamEvent::EndOfStream);
        assert!(HookKind::Block.matches(&buf));
        assert!(HookKind::Block.matches(&eos));
        assert!(HookKind::DataPass.matches(&buf));
        assert!(!HookKind::DataPass.matches(&eos));
        assert!(HookKind::EventDownstream.matches(&eos));
        assert!(!HookKind::EventDownstream.matches(&buf));
    }
}
