//! Shared run state: node state machine, cancellation flag and the
//! first-error slot.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Error;

/// `Idle → Running → (Finished | Error | Cancelled)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeState {
    #[default]
    Idle,
    Running,
    Finished,
    Error,
    Cancelled,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }
}

/// Clonable handle for cancelling a pipeline from another thread and
/// observing its state.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
    state: Arc<Mutex<NodeState>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> NodeState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == NodeState::Running
    }

    pub(crate) fn set_state(&self, state: NodeState) {
        *self.state.lock() = state;
    }

    /// Clears the flag so the pipeline can run again.
    pub(crate) fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

/// Holds the first error raised by any stage; later errors are dropped.
#[derive(Debug, Default)]
pub(crate) struct ErrorSlot {
    set: AtomicBool,
    error: Mutex<Option<Error>>,
}

impl ErrorSlot {
    /// Returns false when an earlier error already occupies the slot.
    pub fn set(&self, error: Error) -> bool {
        let mut slot = self.error.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(error);
        self.set.store(true, Ordering::SeqCst);
        true
    }

    pub fn is_set(&self) -> bool {
        self.set.load(Ordering::SeqCst)
    }

    pub fn take(&self) -> Option<Error> {
        self.error.lock().take()
    }
}
