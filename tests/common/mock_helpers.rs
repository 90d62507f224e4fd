//! Recording sinks and control-queue pumps

use std::sync::{Arc, Mutex};
use std::time::Duration;
use taprec::control::{ControlQueue, DeferredCall};
use taprec::recording::{Branch, BranchId, BranchLifecycleController, PresenceEdge, PresenceSink};

/// Presence sink that remembers every edge. Clones share the log.
#[derive(Debug, Clone, Default)]
pub struct EdgeRecorder {
    edges: Arc<Mutex<Vec<(PresenceEdge, Duration)>>>,
}

impl EdgeRecorder {
    pub fn edges(&self) -> Vec<(PresenceEdge, Duration)> {
        self.edges.lock().unwrap().clone()
    }
}

impl PresenceSink for EdgeRecorder {
    fn on_start(&mut self, now: Duration) {
        self.edges.lock().unwrap().push((PresenceEdge::Start, now));
    }

    fn on_stop(&mut self, now: Duration) {
        self.edges.lock().unwrap().push((PresenceEdge::Stop, now));
    }
}

/// Deliver block and sink notifications to `controller` until `branch` is removed
pub fn pump_until_removed(
    controller: &mut BranchLifecycleController,
    queue: &ControlQueue,
    branch: BranchId,
) -> Branch {
    loop {
        let call = queue
            .next_timeout(super::test_timeout())
            .unwrap_or_else(|| panic!("Timed out waiting for {} to be removed", branch));
        let removed = match call {
            DeferredCall::BranchBlocked { branch: id } => controller.on_blocked(id).unwrap(),
            DeferredCall::SinkEos { branch: id } => controller.on_sink_eos(id).unwrap(),
            _ => None,
        };
        if let Some(removed) = removed.filter(|b| b.id() == branch) {
            return removed;
        }
    }
}
