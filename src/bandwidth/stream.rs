//! The "stream" contract a bandwidth-throttled socket adapter exposes to
//! the controller (§4.4, §4.5), and the opaque registration handle.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use super::controller::ControllerHandle;

/// A consumer registered with the bandwidth controller. Implemented by
/// `throttle::Throttle`.
pub trait Stream {
    /// Sets the maximum number of bytes the stream will buffer before
    /// pausing its underlying socket. Called once, at registration, with
    /// `4 * limit`.
    fn set_buffer(&mut self, max: usize);

    /// Bytes currently queued and ready to be handed to the consumer.
    fn available(&self) -> usize;

    /// Delivers up to `n` bytes to the consumer. Implementations must not
    /// call back into the controller from within `transfer` — only a
    /// freshly-arrived read is allowed to trigger a new
    /// `schedule_transfer` (§5 re-entrancy rule).
    fn transfer(&mut self, n: usize);
}

/// Opaque handle returned by the controller at registration time. The
/// controller's own bookkeeping holds only a [`Weak`] reference to the
/// stream (so it never extends the stream's lifetime); this handle is kept
/// by the stream itself and used to deregister on `close()`.
#[derive(Debug, Clone)]
pub struct StreamRegistration {
    pub(super) controller: ControllerHandle,
    pub(super) key: usize,
}

impl StreamRegistration {
    /// Removes the stream's slot from the controller. Idempotent: calling
    /// this more than once (or after the controller has already dropped
    /// the slot) is a no-op, matching the spec's "constant-time handle
    /// invalidation" removal semantics.
    pub fn deregister(&self) {
        self.controller.remove(self.key);
    }
}

/// Wraps a concrete [`Stream`] so the controller can hold a weak reference
/// to it without caring about the stream's ownership model.
pub type SharedStream = Rc<RefCell<dyn Stream>>;

/// A weak handle to a registered stream, as stored in the controller's
/// slot map.
pub type WeakStream = Weak<RefCell<dyn Stream>>;
