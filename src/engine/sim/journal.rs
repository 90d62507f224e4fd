//! Sequence-numbered record of structural and event activity.
//!
//! Tests use the journal to assert orderings that cross threads, e.g. that a
//! branch's sink saw end-of-stream only after the tap was unlinked.

use crate::engine::buffer::StreamEvent;
use crate::engine::id::{PortId, StageId};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, PartialEq)]
pub enum JournalEntry {
    Linked { src: PortId, sink: PortId },
    Unlinked { src: PortId, sink: PortId },
    Added { container: StageId, element: StageId },
    Removed { container: StageId, element: StageId },
    /// An event was pushed into a port out-of-band.
    EventInjected { port: PortId, event: StreamEvent },
    /// An event reached an input port.
    EventArrived { port: PortId, event: StreamEvent },
}

#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<JournalEntry>>,
}

impl Journal {
    pub fn record(&self, entry: JournalEntry) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    pub fn entries(&self) -> Vec<JournalEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sequence number of the first entry matching `pred`.
    pub fn position(&self, pred: impl Fn(&JournalEntry) -> bool) -> Option<usize> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .position(pred)
    }

    pub fn count(&self, pred: impl Fn(&JournalEntry) -> bool) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| pred(e))
            .count()
    }
}
