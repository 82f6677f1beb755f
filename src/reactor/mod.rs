//! The event-source contract both state machines are driven by.
//!
//! The pool and the handshake controller never block; they register interest
//! with a [`Reactor`] and advance from its callbacks. The contract is small:
//! persistent readability watchers, re-armable one-shot timers, and watcher
//! lifecycle control.
//!
//! Implementations must uphold two rules the callers depend on:
//!
//! - Registration (`on_readable`/`once`) never invokes the callback
//!   synchronously.
//! - No reactor-internal lock is held while a callback runs, so callbacks may
//!   freely call back into the reactor (typically to `cancel` themselves).

use crate::socket::stream::SharedSocket;
use std::time::Duration;

pub mod runtime;

/// Handle to a registered watcher.
pub type WatcherId = u64;

/// Watcher callback. Readability callbacks fire on every readiness edge;
/// timer callbacks fire once per armed period.
pub type WatcherCallback = Box<dyn FnMut() + Send + 'static>;

pub trait Reactor: Send + Sync + 'static {
    /// Invoke `callback` whenever `socket` becomes readable, until the
    /// watcher is cancelled.
    fn on_readable(&self, socket: &SharedSocket, callback: WatcherCallback) -> WatcherId;

    /// One-shot timer firing after `delay`. The watcher survives its fire in
    /// a disabled state: [`enable`](Reactor::enable) re-arms it with the full
    /// delay, so a pool slot can reuse one timer across checkin cycles.
    fn once(&self, delay: Duration, callback: WatcherCallback) -> WatcherId;

    /// Pause a watcher without discarding it.
    fn disable(&self, id: WatcherId);

    /// Resume (for timers: re-arm) a disabled watcher.
    fn enable(&self, id: WatcherId);

    /// Discard a watcher. Cancelling an already-fired or already-cancelled
    /// watcher is a no-op.
    fn cancel(&self, id: WatcherId);
}
