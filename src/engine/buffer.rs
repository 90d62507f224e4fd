//! Data units that travel through ports.
//!
//! A `Buffer` is one media frame plus the region-of-interest metadata attached by
//! upstream detector stages. A `StreamEvent` is an in-band control marker.

use std::time::Duration;

/// One detected region on a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub label: String,
    pub confidence: f32,
}

impl Region {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// A media buffer. Payload bytes are opaque to this crate; only the presentation
/// timestamp and region metadata are inspected.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buffer {
    /// Presentation timestamp relative to stream start.
    pub pts: Duration,
    pub payload: Vec<u8>,
    pub regions: Vec<Region>,
}

impl Buffer {
    pub fn new(pts: Duration) -> Self {
        Self {
            pts,
            payload: Vec::new(),
            regions: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_region(mut self, region: Region) -> Self {
        self.regions.push(region);
        self
    }

    /// Whether any region on this frame carries `label`.
    pub fn has_label(&self, label: &str) -> bool {
        self.regions.iter().any(|r| r.label == label)
    }
}

/// In-band control events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Start of a stream segment.
    StreamStart,
    /// No further data will arrive on this path.
    EndOfStream,
    /// Discard queued data.
    FlushStart,
    FlushStop,
}

/// What is crossing a port: data or an event.
#[derive(Debug, Clone, PartialEq)]
pub enum DataItem {
    Buffer(Buffer),
    Event(StreamEvent),
}

impl DataItem {
    pub fn is_eos(&self) -> bool {
        matches!(self, DataItem::Event(StreamEvent::EndOfStream))
    }

    pub fn as_buffer(&self) -> Option<&Buffer> {
        match self {
            DataItem::Buffer(b) => Some(b),
            DataItem::Event(_) => None,
        }
    }

    pub fn as_event(&self) -> Option<StreamEvent> {
        match self {
            DataItem::Event(e) => Some(*e),
            DataItem::Buffer(_) => None,
        }
    }
}
