//! Local event bus
//!
//! Decouples the notification channel from the update fetch protocol inside
//! one client. The channel half publishes a signal when a build differs from
//! the last one it saw; the fetch half drains signals on its own turn. An
//! explicit single-consumer queue, not a shared emitter.

use crate::artifact::BuildId;
use std::cell::RefCell;
use std::collections::VecDeque;

/// Signal that the server announced a build newer than the client's current
/// one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSignal {
    pub version: BuildId,
}

/// Single-consumer FIFO of update signals.
#[derive(Debug, Default)]
pub struct UpdateBus {
    queue: RefCell<VecDeque<UpdateSignal>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, signal: UpdateSignal) {
        self.queue.borrow_mut().push_back(signal);
    }

    /// Take the oldest pending signal.
    pub fn next(&self) -> Option<UpdateSignal> {
        self.queue.borrow_mut().pop_front()
    }

    /// Take everything pending, oldest first.
    pub fn drain(&self) -> Vec<UpdateSignal> {
        self.queue.borrow_mut().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }
}
