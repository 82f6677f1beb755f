//! Tokio-backed [`Reactor`].
//!
//! Each watcher is one spawned task. Readability watchers wrap the socket's
//! descriptor in an [`AsyncFd`] and clear readiness before every callback, so
//! a callback that reads until `WouldBlock` arms the next edge. Timers race
//! `tokio::time::sleep` against a [`Notify`] that carries disable/enable/
//! cancel signals; a fire leaves the timer disabled and `enable` re-arms the
//! full delay.

use super::{Reactor, WatcherCallback, WatcherId};
use crate::socket::stream::SharedSocket;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;
use tokio::sync::Notify;

struct WatcherState {
    enabled: AtomicBool,
    cancelled: AtomicBool,
    notify: Notify,
}

impl WatcherState {
    fn new() -> Arc<Self> {
        Arc::new(WatcherState {
            enabled: AtomicBool::new(true),
            cancelled: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

pub struct TokioReactor {
    handle: tokio::runtime::Handle,
    next_id: AtomicU64,
    watchers: Mutex<HashMap<WatcherId, Arc<WatcherState>>>,
}

impl TokioReactor {
    /// Bind to the current runtime. Panics outside a tokio context.
    pub fn new() -> Self {
        Self::with_handle(tokio::runtime::Handle::current())
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        TokioReactor { handle, next_id: AtomicU64::new(1), watchers: Mutex::new(HashMap::new()) }
    }

    fn register(&self) -> (WatcherId, Arc<WatcherState>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = WatcherState::new();
        self.watchers.lock().unwrap().insert(id, Arc::clone(&state));
        (id, state)
    }

    fn state_of(&self, id: WatcherId) -> Option<Arc<WatcherState>> {
        self.watchers.lock().unwrap().get(&id).cloned()
    }
}

impl Reactor for TokioReactor {
    fn on_readable(&self, socket: &SharedSocket, mut callback: WatcherCallback) -> WatcherId {
        let (id, state) = self.register();
        let Some(fd) = socket.raw_fd() else {
            tracing::warn!(
                socket_id = socket.id(),
                "socket exposes no descriptor; readability watcher is inert"
            );
            return id;
        };
        self.handle.spawn(async move {
            let async_fd = match AsyncFd::with_interest(fd, Interest::READABLE) {
                Ok(async_fd) => async_fd,
                Err(error) => {
                    tracing::warn!(%error, "failed to register descriptor with the reactor");
                    return;
                }
            };
            loop {
                if state.is_cancelled() {
                    break;
                }
                tokio::select! {
                    ready = async_fd.readable() => {
                        match ready {
                            Ok(mut guard) => guard.clear_ready(),
                            Err(_) => break,
                        }
                        if state.is_cancelled() {
                            break;
                        }
                        if state.is_enabled() {
                            callback();
                        }
                    }
                    _ = state.notify.notified() => {}
                }
            }
        });
        id
    }

    fn once(&self, delay: Duration, mut callback: WatcherCallback) -> WatcherId {
        let (id, state) = self.register();
        self.handle.spawn(async move {
            loop {
                if state.is_cancelled() {
                    break;
                }
                if !state.is_enabled() {
                    state.notify.notified().await;
                    continue;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {
                        if state.is_cancelled() {
                            break;
                        }
                        if state.enabled.swap(false, Ordering::SeqCst) {
                            callback();
                        }
                    }
                    _ = state.notify.notified() => {}
                }
            }
        });
        id
    }

    fn disable(&self, id: WatcherId) {
        if let Some(state) = self.state_of(id) {
            state.enabled.store(false, Ordering::SeqCst);
            state.notify.notify_one();
        }
    }

    fn enable(&self, id: WatcherId) {
        if let Some(state) = self.state_of(id) {
            if !state.is_cancelled() {
                state.enabled.store(true, Ordering::SeqCst);
                state.notify.notify_one();
            }
        }
    }

    fn cancel(&self, id: WatcherId) {
        if let Some(state) = self.watchers.lock().unwrap().remove(&id) {
            state.cancelled.store(true, Ordering::SeqCst);
            state.notify.notify_one();
        }
    }
}
