//! Branch lifecycle: attach to a live tap point, then detach without tearing data.
//!
//! ```text
//! Constructed --attach--> Attached --request_detach--> DetachRequested
//!     --block hook fires--> Blocked --sink sees EOS--> FlushPending --> Removed
//! ```
//!
//! Transitions are computed by the pure [`BranchState::on_event`]; the controller
//! executes the returned effects against the engine. Only the block hook body
//! runs off the control thread, and it restricts itself to port-local calls.

use crate::control::{ControlHandle, DeferredCall};
use crate::engine::{GraphEngine, HookKind, HookReturn, PortId, RunState, StreamEvent};
use crate::recording::branch::{Branch, BranchId, BranchState};
use crate::recording::error::{BranchError, BranchResult};
use crate::recording::tap::TapPoint;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use thiserror::Error;

/// Inputs to the branch state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Attach,
    RequestDetach,
    BlockFired,
    SinkEos,
    Finalized,
}

/// Side effects a transition asks the controller to perform, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    AddToGraph,
    SyncRunState,
    LinkTap,
    InstallBlockHook,
    SetIdle,
    RemoveFromGraph,
    ReleaseTapPort,
    Dispose,
}

impl BranchState {
    /// Next state and effects for `event`, or the error to hand back to the caller.
    pub fn on_event(
        self,
        branch: BranchId,
        event: LifecycleEvent,
    ) -> BranchResult<(BranchState, Vec<Effect>)> {
        use BranchState::*;
        use LifecycleEvent::*;

        match (self, event) {
            (Constructed, Attach) => Ok((
                Attached,
                vec![Effect::AddToGraph, Effect::SyncRunState, Effect::LinkTap],
            )),
            (Attached, RequestDetach) => Ok((DetachRequested, vec![Effect::InstallBlockHook])),
            (DetachRequested | Blocked | FlushPending, RequestDetach) => {
                Err(BranchError::DetachInProgress { branch })
            }
            (Constructed | Removed, RequestDetach) => Err(BranchError::NotAttached { branch }),
            (DetachRequested, BlockFired) => Ok((Blocked, Vec::new())),
            (Blocked, SinkEos) => Ok((
                FlushPending,
                vec![
                    Effect::SetIdle,
                    Effect::RemoveFromGraph,
                    Effect::ReleaseTapPort,
                    Effect::Dispose,
                ],
            )),
            (FlushPending, Finalized) => Ok((Removed, Vec::new())),
            (state, event) => Err(BranchError::InvalidTransition { state, event }),
        }
    }

    /// States recorded in the transition log.
    pub fn is_milestone(self) -> bool {
        matches!(
            self,
            BranchState::Attached
                | BranchState::Blocked
                | BranchState::FlushPending
                | BranchState::Removed
        )
    }
}

/// What to do with an attach while the tap point's slot is busy detaching.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachPolicy {
    /// Refuse with an attach error; the caller gets the branch back.
    #[default]
    Reject,
    /// Hold one branch and attach it as soon as the slot reaches Removed.
    /// Further attaches while a branch is held are refused.
    Queue,
}

/// Outcome of a successful `attach` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachOutcome {
    Attached(BranchId),
    Queued(BranchId),
}

impl AttachOutcome {
    pub fn branch(self) -> BranchId {
        match self {
            AttachOutcome::Attached(id) | AttachOutcome::Queued(id) => id,
        }
    }
}

/// A refused attach. Ownership of the branch returns to the caller.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct AttachRejected {
    pub branch: Box<Branch>,
    #[source]
    pub error: BranchError,
}

/// Milestones kept in the transition log; older entries are dropped first.
pub const LOG_CAPACITY: usize = 256;

/// Drives one branch slot on a tap point.
pub struct BranchLifecycleController {
    engine: Arc<dyn GraphEngine>,
    control: ControlHandle,
    tap: TapPoint,
    policy: AttachPolicy,
    active: Option<Branch>,
    pending: Option<Branch>,
    log: VecDeque<(BranchId, BranchState)>,
    dot_dir: Option<PathBuf>,
}

impl BranchLifecycleController {
    pub fn new(
        engine: Arc<dyn GraphEngine>,
        control: ControlHandle,
        tap: TapPoint,
        policy: AttachPolicy,
    ) -> Self {
        Self {
            engine,
            control,
            tap,
            policy,
            active: None,
            pending: None,
            log: VecDeque::with_capacity(LOG_CAPACITY),
            dot_dir: None,
        }
    }

    /// Write a DOT snapshot of the tap's container around each graph change.
    pub fn with_dot_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dot_dir = dir;
        self
    }

    pub fn tap(&self) -> &TapPoint {
        &self.tap
    }

    pub fn policy(&self) -> AttachPolicy {
        self.policy
    }

    pub fn active(&self) -> Option<&Branch> {
        self.active.as_ref()
    }

    /// The branch waiting for the slot, if any.
    pub fn pending(&self) -> Option<&Branch> {
        self.pending.as_ref()
    }

    /// Most recent milestones, oldest first. At most [`LOG_CAPACITY`] entries.
    pub fn transition_log(&self) -> impl Iterator<Item = (BranchId, BranchState)> + '_ {
        self.log.iter().copied()
    }

    /// Milestones of one branch.
    pub fn history(&self, branch: BranchId) -> Vec<BranchState> {
        self.log
            .iter()
            .filter(|(id, _)| *id == branch)
            .map(|(_, state)| *state)
            .collect()
    }

    pub fn state_of(&self, branch: BranchId) -> Option<BranchState> {
        if let Some(active) = self.active.as_ref().filter(|b| b.id() == branch) {
            return Some(active.state());
        }
        if self.pending.as_ref().is_some_and(|b| b.id() == branch) {
            return Some(BranchState::Constructed);
        }
        self.log
            .iter()
            .rev()
            .find(|(id, _)| *id == branch)
            .map(|(_, state)| *state)
    }

    /// Attach `branch` to the tap point.
    ///
    /// An occupied slot rejects the attach. A slot that is mid-detach rejects or
    /// queues depending on the policy; only one branch can be queued.
    pub fn attach(&mut self, branch: Branch) -> Result<AttachOutcome, AttachRejected> {
        if let Err(error) = branch.state().on_event(branch.id(), LifecycleEvent::Attach) {
            return Err(self.reject(branch, error));
        }

        match self.active.as_ref().map(|b| (b.id(), b.state())) {
            None => self.attach_now(branch).map(AttachOutcome::Attached),
            Some((current, state)) if state.is_detaching() => match self.policy {
                AttachPolicy::Reject => {
                    let error = BranchError::Attach {
                        tap: self.tap.name().to_string(),
                        reason: format!("detach of {} in progress", current),
                    };
                    Err(self.reject(branch, error))
                }
                AttachPolicy::Queue => {
                    if let Some(queued) = &self.pending {
                        let error = BranchError::Attach {
                            tap: self.tap.name().to_string(),
                            reason: format!("{} is already queued", queued.id()),
                        };
                        return Err(self.reject(branch, error));
                    }
                    let id = branch.id();
                    tracing::info!(branch = %id, tap = %self.tap.name(), "Queued until {} is removed", current);
                    self.pending = Some(branch);
                    Ok(AttachOutcome::Queued(id))
                }
            },
            Some((current, _)) => {
                let error = BranchError::Attach {
                    tap: self.tap.name().to_string(),
                    reason: format!("{} is attached", current),
                };
                Err(self.reject(branch, error))
            }
        }
    }

    fn reject(&self, branch: Branch, error: BranchError) -> AttachRejected {
        tracing::warn!(branch = %branch.id(), tap = %self.tap.name(), "Attach rejected: {}", error);
        AttachRejected {
            branch: Box::new(branch),
            error,
        }
    }

    fn attach_now(&mut self, mut branch: Branch) -> Result<BranchId, AttachRejected> {
        let id = branch.id();
        let (next, effects) = match branch.state().on_event(id, LifecycleEvent::Attach) {
            Ok(t) => t,
            Err(error) => return Err(self.reject(branch, error)),
        };
        self.dump_dot("add_branch_before");
        tracing::info!(branch = %id, tap = %self.tap.name(), "Attaching {}", branch.name());

        let tap_port = match self.engine.request_port(self.tap.junction()) {
            Ok(port) => port,
            Err(e) => {
                let error = BranchError::Attach {
                    tap: self.tap.name().to_string(),
                    reason: e.to_string(),
                };
                return Err(self.reject(branch, error));
            }
        };

        let mut done = Vec::with_capacity(effects.len());
        for effect in effects {
            let result = match effect {
                Effect::AddToGraph => self
                    .engine
                    .add_to_container(self.tap.container(), branch.container()),
                Effect::SyncRunState => self.engine.sync_run_state_with_parent(branch.container()),
                Effect::LinkTap => self.engine.link_ports(tap_port, branch.input()),
                other => {
                    tracing::warn!(branch = %id, "Unexpected attach effect {:?}", other);
                    Ok(())
                }
            };
            if let Err(e) = result {
                self.roll_back_attach(&branch, tap_port, &done);
                let error = match e {
                    crate::engine::EngineError::Link { reason, .. } => BranchError::Link {
                        from: self.tap.name().to_string(),
                        to: branch.name().to_string(),
                        reason,
                    },
                    other => BranchError::Attach {
                        tap: self.tap.name().to_string(),
                        reason: other.to_string(),
                    },
                };
                return Err(self.reject(branch, error));
            }
            done.push(effect);
        }

        branch.tap_port = Some(tap_port);
        branch.state = next;
        self.record(id, next);
        self.active = Some(branch);
        self.dump_dot("add_branch_after");
        Ok(id)
    }

    fn roll_back_attach(&self, branch: &Branch, tap_port: PortId, done: &[Effect]) {
        if done.contains(&Effect::SyncRunState) {
            if let Err(e) = self.engine.set_run_state(branch.container(), RunState::Null) {
                tracing::warn!(branch = %branch.id(), "Rollback: {}", e);
            }
        }
        if done.contains(&Effect::AddToGraph) {
            if let Err(e) = self
                .engine
                .remove_from_container(self.tap.container(), branch.container())
            {
                tracing::warn!(branch = %branch.id(), "Rollback: {}", e);
            }
        }
        if let Err(e) = self
            .engine
            .release_request_port(self.tap.junction(), tap_port)
        {
            tracing::warn!(branch = %branch.id(), "Rollback: {}", e);
        }
    }

    /// Start detaching `branch`. Completion is asynchronous: the controller
    /// reaches Removed after [`on_blocked`](Self::on_blocked) and
    /// [`on_sink_eos`](Self::on_sink_eos) have been delivered by the control loop.
    pub fn request_detach(&mut self, branch: BranchId) -> BranchResult<()> {
        if self.pending.as_ref().is_some_and(|b| b.id() == branch) {
            if let Some(queued) = self.pending.take() {
                tracing::info!(branch = %branch, "Cancelled queued attach");
                self.dispose(&queued);
            }
            return Ok(());
        }
        let Some(active) = self.active.as_mut().filter(|b| b.id() == branch) else {
            return match self.state_of(branch) {
                Some(BranchState::Removed) => Err(BranchError::NotAttached { branch }),
                _ => Err(BranchError::UnknownBranch(branch)),
            };
        };

        let (next, effects) = active.state().on_event(branch, LifecycleEvent::RequestDetach)?;
        let tap_port = active
            .tap_port()
            .ok_or(BranchError::NotAttached { branch })?;
        let input = active.input();

        for effect in effects {
            if effect == Effect::InstallBlockHook {
                self.engine.add_hook(
                    tap_port,
                    HookKind::Block,
                    block_hook(
                        Arc::downgrade(&self.engine),
                        self.control.clone(),
                        branch,
                        input,
                    ),
                )?;
            }
        }

        if let Some(active) = self.active.as_mut() {
            active.state = next;
        }
        self.dump_dot("stop_branch_before");
        tracing::info!(branch = %branch, tap = %self.tap.name(), "Detach requested, blocking tap port");
        Ok(())
    }

    /// Stop whatever is recording or about to record.
    ///
    /// An attached branch is detached. While the active branch is already
    /// detaching, a queued branch is cancelled instead.
    pub fn request_detach_active(&mut self) -> BranchResult<Option<BranchId>> {
        let attached = self
            .active
            .as_ref()
            .filter(|b| b.state() == BranchState::Attached)
            .map(Branch::id);
        let target = attached
            .or_else(|| self.pending.as_ref().map(Branch::id))
            .or_else(|| self.active.as_ref().map(Branch::id));
        match target {
            Some(id) => self.request_detach(id).map(|()| Some(id)),
            None => Ok(None),
        }
    }

    /// The block hook for `branch` fired and cut it off the tap point.
    pub fn on_blocked(&mut self, branch: BranchId) -> BranchResult<Option<Branch>> {
        let active = self
            .active
            .as_mut()
            .filter(|b| b.id() == branch)
            .ok_or(BranchError::UnknownBranch(branch))?;
        let (next, _) = active.state().on_event(branch, LifecycleEvent::BlockFired)?;
        active.state = next;
        let tracks_eos = active.tracks_eos();
        self.record(branch, next);
        tracing::info!(branch = %branch, "Tap port blocked, branch unlinked and draining");

        if tracks_eos {
            Ok(None)
        } else {
            // Nothing will report the drain; tear down now.
            self.on_sink_eos(branch)
        }
    }

    /// End-of-stream reached the sink of `branch`. Tears the branch down and
    /// returns it once Removed; its stages have been freed by then.
    pub fn on_sink_eos(&mut self, branch: BranchId) -> BranchResult<Option<Branch>> {
        let active = self
            .active
            .as_mut()
            .filter(|b| b.id() == branch)
            .ok_or(BranchError::UnknownBranch(branch))?;
        if active.state() == BranchState::Attached {
            // Stream end passing through a branch that is still attached.
            tracing::warn!(branch = %branch, "Sink end-of-stream while attached, ignoring");
            return Ok(None);
        }
        let (next, effects) = active.state().on_event(branch, LifecycleEvent::SinkEos)?;
        active.state = next;
        let container = active.container();
        let tap_port = active.tap_port();
        self.record(branch, next);

        for effect in effects {
            let result = match effect {
                Effect::SetIdle => self.engine.set_run_state(container, RunState::Null),
                Effect::RemoveFromGraph => self
                    .engine
                    .remove_from_container(self.tap.container(), container),
                Effect::ReleaseTapPort => match tap_port {
                    Some(port) => self
                        .engine
                        .release_request_port(self.tap.junction(), port),
                    None => Ok(()),
                },
                Effect::Dispose => self.engine.dispose(container),
                _ => Ok(()),
            };
            // No rollback past DetachRequested; log and keep going.
            if let Err(e) = result {
                tracing::warn!(branch = %branch, "{:?} failed during teardown: {}", effect, e);
            }
        }

        let mut removed = self
            .active
            .take()
            .ok_or(BranchError::UnknownBranch(branch))?;
        let (next, _) = removed.state().on_event(branch, LifecycleEvent::Finalized)?;
        removed.state = next;
        removed.tap_port = None;
        self.record(branch, next);
        self.dump_dot("remove_branch");
        tracing::info!(branch = %branch, "Removed {} from {}", removed.name(), self.tap.name());

        if let Some(next_branch) = self.pending.take() {
            let next_id = next_branch.id();
            if let Err(rejected) = self.attach_now(next_branch) {
                tracing::error!(branch = %next_id, "Queued attach failed: {}", rejected.error);
                self.dispose(&rejected.branch);
            }
        }
        Ok(Some(removed))
    }

    /// Free a branch that is not in the graph.
    fn dispose(&self, branch: &Branch) {
        if let Err(e) = self.engine.dispose(branch.container()) {
            tracing::warn!(branch = %branch.id(), "Failed to free branch: {}", e);
        }
    }

    fn record(&mut self, branch: BranchId, state: BranchState) {
        if state.is_milestone() {
            if self.log.len() == LOG_CAPACITY {
                self.log.pop_front();
            }
            self.log.push_back((branch, state));
        }
    }

    fn dump_dot(&self, label: &str) {
        let Some(dir) = &self.dot_dir else {
            return;
        };
        let stamp = chrono::Local::now().format("%H.%M.%S%.6f");
        let path = dir.join(format!("{}-{}.dot", stamp, label));
        let dot = self
            .engine
            .snapshot(self.tap.container())
            .to_dot(label);
        if let Err(e) = std::fs::create_dir_all(dir).and_then(|_| std::fs::write(&path, dot)) {
            tracing::warn!("Failed to write {}: {}", path.display(), e);
        } else {
            tracing::debug!("Wrote {}", path.display());
        }
    }
}

/// Body of the blocking hook on the tap port. Runs once on the streaming thread
/// that next pushes through the port.
fn block_hook(
    engine: Weak<dyn GraphEngine>,
    control: ControlHandle,
    branch: BranchId,
    input: PortId,
) -> crate::engine::HookFn {
    let mut fired = false;
    Box::new(move |info| {
        if fired {
            return HookReturn::Remove;
        }
        fired = true;
        let Some(engine) = engine.upgrade() else {
            return HookReturn::Remove;
        };
        tracing::info!(branch = %branch, "Unlinking branch input");
        if let Err(e) = engine.unlink_ports(info.port, input) {
            tracing::warn!(branch = %branch, "Unlink failed: {}", e);
        }
        // Enqueued before the EOS below can reach the sink hook.
        control.schedule(DeferredCall::BranchBlocked { branch });
        tracing::info!(branch = %branch, "Sending end-of-stream to branch input");
        if !engine.inject_event(input, StreamEvent::EndOfStream) {
            tracing::warn!(branch = %branch, "Branch input refused end-of-stream");
        }
        HookReturn::Remove
    })
}
