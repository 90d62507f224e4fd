//! Thread boundary between engine threads and the control thread.
//!
//! Hooks and bus callbacks run on engine-owned threads and may not mutate the
//! graph. They enqueue a [`DeferredCall`] through a cloneable [`ControlHandle`];
//! the single [`ControlQueue`] is drained by the control loop, which is the only
//! place graph structure changes.

use crate::engine::BusMessage;
use crate::recording::BranchId;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::fmt;
use std::time::Duration;

/// Work that must run on the control thread.
pub enum DeferredCall {
    /// Presence began; `at` is the stream time of the triggering frame.
    StartRecording { at: Duration },
    /// Presence ended.
    StopRecording { at: Duration },
    /// The blocking hook for `branch` fired and cut the branch off its tap.
    BranchBlocked { branch: BranchId },
    /// End-of-stream reached the sink of `branch`.
    SinkEos { branch: BranchId },
    /// A message from the engine bus.
    Bus(BusMessage),
    /// Arbitrary closure, e.g. from a scripted sequence.
    Invoke(Box<dyn FnOnce() + Send>),
    /// Leave the control loop.
    Quit,
}

impl fmt::Debug for DeferredCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeferredCall::StartRecording { at } => {
                f.debug_struct("StartRecording").field("at", at).finish()
            }
            DeferredCall::StopRecording { at } => {
                f.debug_struct("StopRecording").field("at", at).finish()
            }
            DeferredCall::BranchBlocked { branch } => {
                f.debug_struct("BranchBlocked").field("branch", branch).finish()
            }
            DeferredCall::SinkEos { branch } => {
                f.debug_struct("SinkEos").field("branch", branch).finish()
            }
            DeferredCall::Bus(msg) => f.debug_tuple("Bus").field(msg).finish(),
            DeferredCall::Invoke(_) => f.write_str("Invoke(..)"),
            DeferredCall::Quit => f.write_str("Quit"),
        }
    }
}

/// Create a connected handle/queue pair.
pub fn control_channel() -> (ControlHandle, ControlQueue) {
    let (tx, rx) = unbounded();
    (ControlHandle { tx }, ControlQueue { rx })
}

/// Producer side. Cheap to clone; safe to use from any thread, including inside hooks.
#[derive(Clone)]
pub struct ControlHandle {
    tx: Sender<DeferredCall>,
}

impl ControlHandle {
    /// Enqueue `call` without blocking. Returns `false` once the queue is gone.
    pub fn schedule(&self, call: DeferredCall) -> bool {
        match self.tx.send(call) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Control queue closed, dropping {:?}", e.into_inner());
                false
            }
        }
    }

    /// Run `f` on the control thread at the next opportunity.
    pub fn schedule_fn(&self, f: impl FnOnce() + Send + 'static) -> bool {
        self.schedule(DeferredCall::Invoke(Box::new(f)))
    }
}

impl fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControlHandle")
            .field("pending", &self.tx.len())
            .finish()
    }
}

/// Consumer side, owned by the control loop.
pub struct ControlQueue {
    rx: Receiver<DeferredCall>,
}

impl ControlQueue {
    /// Wait up to `timeout` for the next call. `None` on timeout or when every
    /// handle has been dropped.
    pub fn next_timeout(&self, timeout: Duration) -> Option<DeferredCall> {
        match self.rx.recv_timeout(timeout) {
            Ok(call) => Some(call),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_next(&self) -> Option<DeferredCall> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_fifo_per_producer() {
        let (handle, queue) = control_channel();
        let producer = {
            let handle = handle.clone();
            std::thread::spawn(move || {
                for i in 0..100u64 {
                    handle.schedule(DeferredCall::StartRecording {
                        at: Duration::from_millis(i),
                    });
                }
            })
        };
        producer.join().unwrap();

        let mut last = None;
        while let Some(call) = queue.try_next() {
            let DeferredCall::StartRecording { at } = call else {
                panic!("unexpected call");
            };
            assert!(last.map_or(true, |prev| prev < at));
            last = Some(at);
        }
        assert_eq!(last, Some(Duration::from_millis(99)));
    }

    #[test]
    fn test_schedule_fn_runs_when_drained() {
        let (handle, queue) = control_channel();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        assert!(handle.schedule_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        match queue.next_timeout(Duration::from_millis(100)) {
            Some(DeferredCall::Invoke(f)) => f(),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_schedule_after_queue_dropped() {
        let (handle, queue) = control_channel();
        drop(queue);
        assert!(!handle.schedule(DeferredCall::Quit));
    }
}
