//! Thread-safe FIFO connecting two pipeline stages.
//!
//! Wraps an unbounded crossbeam channel and adds the explicit lifecycle the
//! workers need: `close` wakes every waiter by dropping the producer side,
//! after which receivers drain whatever is still buffered and then observe
//! `None`; `reset` discards pending events without closing.

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, unbounded};

pub struct Channel<T> {
    sender: RwLock<Option<Sender<T>>>,
    receiver: Receiver<T>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender: RwLock::new(Some(sender)),
            receiver,
        }
    }

    /// Non-blocking enqueue. Returns false iff the channel is closed.
    pub fn send(&self, event: T) -> bool {
        let guard = self
            .sender
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(sender) => sender.send(event).is_ok(),
            None => false,
        }
    }

    /// Block until an event arrives or the channel closes and drains.
    pub fn receive(&self) -> Option<T> {
        self.receiver.recv().ok()
    }

    /// As [`receive`](Self::receive), giving up at `deadline`.
    pub fn receive_deadline(&self, deadline: Instant) -> Option<T> {
        self.receiver.recv_deadline(deadline).ok()
    }

    /// Take one event if immediately available.
    pub fn try_receive(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Drop all pending events.
    pub fn reset(&self) {
        while self.receiver.try_recv().is_ok() {}
    }

    /// Idempotent. Subsequent sends fail; receivers drain the remaining
    /// buffer and then return `None`.
    pub fn close(&self) {
        let mut guard = self
            .sender
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard.take();
    }

    pub fn is_closed(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}
