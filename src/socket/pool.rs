//! Per-authority socket pooling.
//!
//! Sockets are keyed by authority (`host:port`, lowercased; `unix://` paths
//! keep their case). A checkout first scans the authority's slots for an
//! available live socket whose local bind matches, then falls back to a new
//! connection when the per-authority limit allows it, and otherwise queues
//! FIFO until a slot frees up.
//!
//! Idle slots carry a reactor timer that evicts them after the request's
//! idle timeout. Checkout disables the timer rather than cancelling it, so
//! the following checkin re-enables the same watcher.
//!
//! All pool state lives behind one mutex; promises are settled and connects
//! are launched only after the lock is released, so continuation callbacks
//! may re-enter the pool freely.

use crate::base::neterror::NetError;
use crate::base::promise::{promise, Deferred, Promise};
use crate::reactor::{Reactor, WatcherId};
use crate::socket::connect::Connector;
use crate::socket::options::PoolOptions;
use crate::socket::stream::{SharedSocket, SocketId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

struct PoolSlot {
    id: SocketId,
    resource: SharedSocket,
    /// False while a caller holds the socket.
    available: bool,
    /// Reactor timer plus the delay it was created with; kept across
    /// checkouts in a disabled state.
    idle_timer: Option<(WatcherId, Duration)>,
    /// Idle timeout captured from the request that last took this slot.
    idle_timeout: Duration,
}

struct Waiter {
    deferred: Deferred<SharedSocket>,
    options: PoolOptions,
}

#[derive(Default)]
struct PoolState {
    /// Slots per authority, insertion order preserved.
    slots: HashMap<String, Vec<PoolSlot>>,
    /// Reverse index: every pooled socket id maps back to its authority.
    id_to_uri: HashMap<SocketId, String>,
    /// In-flight connects per authority, not yet in `slots`.
    pending: HashMap<String, usize>,
    /// Checkouts blocked on capacity, FIFO per authority.
    queue: HashMap<String, VecDeque<Waiter>>,
}

/// Work computed under the state lock, performed after it is released.
enum Action {
    Settle(Deferred<SharedSocket>, Result<SharedSocket, NetError>),
    Connect(String, PoolOptions, Deferred<SharedSocket>),
}

enum Decision {
    Reused(SharedSocket),
    Connect(Deferred<SharedSocket>, Promise<SharedSocket>),
    Queued(Promise<SharedSocket>),
}

pub struct SocketPool {
    weak: Weak<SocketPool>,
    reactor: Arc<dyn Reactor>,
    connector: Arc<dyn Connector>,
    defaults: PoolOptions,
    state: Mutex<PoolState>,
}

impl SocketPool {
    pub fn new(reactor: Arc<dyn Reactor>, connector: Arc<dyn Connector>) -> Arc<Self> {
        Self::with_options(reactor, connector, PoolOptions::default())
    }

    pub fn with_options(
        reactor: Arc<dyn Reactor>,
        connector: Arc<dyn Connector>,
        defaults: PoolOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| SocketPool {
            weak: weak.clone(),
            reactor,
            connector,
            defaults,
            state: Mutex::new(PoolState::default()),
        })
    }

    /// Default options checkouts are merged over.
    pub fn options(&self) -> PoolOptions {
        self.defaults.clone()
    }

    /// Acquire a socket for `uri` under the pool's default options.
    pub fn checkout(&self, uri: &str) -> Promise<SharedSocket> {
        self.checkout_with_options(uri, self.defaults.clone())
    }

    /// Acquire a socket for `uri`. Resolves synchronously when an idle
    /// matching socket is available, after the connect otherwise, and queues
    /// FIFO when the authority is at its connection limit.
    pub fn checkout_with_options(&self, uri: &str, options: PoolOptions) -> Promise<SharedSocket> {
        let uri = canonicalize(uri);
        let decision = {
            let mut state = self.state.lock().unwrap();
            let (selected, needs_rebind) = self.scan(&mut state, &uri, &options);
            if let Some(socket) = selected {
                tracing::debug!(uri = %uri, id = socket.id(), "reusing pooled socket");
                Decision::Reused(socket)
            } else if capacity_allows(&state, &uri, options.host_connection_limit, needs_rebind) {
                *state.pending.entry(uri.clone()).or_insert(0) += 1;
                let (deferred, pending) = promise();
                Decision::Connect(deferred, pending)
            } else {
                tracing::debug!(uri = %uri, "connection limit reached; queueing checkout");
                let (deferred, pending) = promise();
                state
                    .queue
                    .entry(uri.clone())
                    .or_default()
                    .push_back(Waiter { deferred, options: options.clone() });
                Decision::Queued(pending)
            }
        };
        match decision {
            Decision::Reused(socket) => Promise::resolved(socket),
            Decision::Connect(deferred, pending) => {
                self.start_connect(uri, options, deferred);
                pending
            }
            Decision::Queued(pending) => pending,
        }
    }

    /// Return a socket to the pool. Dead sockets are evicted instead of
    /// idled; a second checkin of an already-idle socket just re-arms its
    /// idle timer.
    pub fn checkin(&self, socket: &SharedSocket) -> Result<(), NetError> {
        let id = socket.id();
        let actions = {
            let mut state = self.state.lock().unwrap();
            let uri = state.id_to_uri.get(&id).cloned().ok_or(NetError::UnknownSocket)?;
            if !socket.is_alive() {
                tracing::debug!(uri = %uri, id, "checked-in socket is dead; evicting");
                self.evict_locked(&mut state, id, &uri)
            } else {
                if let Some(slot) = find_slot(&mut state, &uri, id) {
                    slot.available = true;
                }
                let has_waiters = state.queue.get(&uri).is_some_and(|queue| !queue.is_empty());
                let actions =
                    if has_waiters { self.dispatch_locked(&mut state, &uri) } else { Vec::new() };
                self.arm_idle_timer_locked(&mut state, id, &uri);
                actions
            }
        };
        self.apply(actions);
        Ok(())
    }

    /// Evict a socket unconditionally.
    pub fn clear(&self, socket: &SharedSocket) -> Result<(), NetError> {
        let id = socket.id();
        let actions = {
            let mut state = self.state.lock().unwrap();
            let uri = state.id_to_uri.get(&id).cloned().ok_or(NetError::UnknownSocket)?;
            tracing::debug!(uri = %uri, id, "evicting socket");
            self.evict_locked(&mut state, id, &uri)
        };
        self.apply(actions);
        Ok(())
    }

    /// Number of idle sockets across all authorities.
    pub fn idle_count(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.slots.values().flatten().filter(|slot| slot.available).count()
    }

    /// Number of pooled sockets for one authority, idle or handed out.
    pub fn slot_count(&self, uri: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.slots.get(&canonicalize(uri)).map_or(0, Vec::len)
    }

    /// In-flight connects for one authority.
    pub fn pending_connect_count(&self, uri: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.pending.get(&canonicalize(uri)).copied().unwrap_or(0)
    }

    /// Checkouts queued behind the connection limit for one authority.
    pub fn queued_waiter_count(&self, uri: &str) -> usize {
        let state = self.state.lock().unwrap();
        state.queue.get(&canonicalize(uri)).map_or(0, VecDeque::len)
    }

    /// Whether this pool currently manages the socket.
    pub fn is_tracked(&self, socket: &SharedSocket) -> bool {
        self.state.lock().unwrap().id_to_uri.contains_key(&socket.id())
    }

    /// Reuse scan in slot insertion order. Dead slots are dropped on sight;
    /// a live slot is skipped (latching the rebind signal) when it is pinned
    /// to a different local bind than the request asks for. Selection marks
    /// the slot busy and pauses its idle timer.
    fn scan(
        &self,
        state: &mut PoolState,
        uri: &str,
        options: &PoolOptions,
    ) -> (Option<SharedSocket>, bool) {
        let mut needs_rebind = false;
        let mut selected = None;
        let mut removed = Vec::new();
        if let Some(slots) = state.slots.get_mut(uri) {
            let mut i = 0;
            while i < slots.len() {
                if !slots[i].available {
                    i += 1;
                    continue;
                }
                if !slots[i].resource.is_alive() {
                    let slot = slots.remove(i);
                    if let Some((timer, _)) = slot.idle_timer {
                        self.reactor.cancel(timer);
                    }
                    tracing::debug!(uri = %uri, id = slot.id, "dropping dead pooled socket");
                    removed.push(slot.id);
                    continue;
                }
                let slot_bind = slots[i].resource.bind_address();
                if !slot_bind.is_empty() && slot_bind != options.bindto {
                    needs_rebind = true;
                    i += 1;
                    continue;
                }
                let slot = &mut slots[i];
                slot.available = false;
                slot.idle_timeout = options.idle_timeout;
                if let Some((timer, _)) = slot.idle_timer {
                    self.reactor.disable(timer);
                }
                selected = Some(Arc::clone(&slot.resource));
                break;
            }
            if slots.is_empty() {
                state.slots.remove(uri);
            }
        }
        for id in removed {
            state.id_to_uri.remove(&id);
        }
        (selected, needs_rebind)
    }

    fn start_connect(&self, uri: String, options: PoolOptions, deferred: Deferred<SharedSocket>) {
        tracing::debug!(uri = %uri, "opening new connection");
        let weak = self.weak.clone();
        let done_uri = uri.clone();
        let done_options = options.clone();
        self.connector.connect(
            &uri,
            &options,
            Box::new(move |result| match weak.upgrade() {
                Some(pool) => pool.finish_connect(done_uri, done_options, deferred, result),
                // Pool is gone; dropping the deferred rejects the checkout.
                None => drop(deferred),
            }),
        );
    }

    fn finish_connect(
        &self,
        uri: String,
        options: PoolOptions,
        deferred: Deferred<SharedSocket>,
        result: Result<SharedSocket, NetError>,
    ) {
        let mut followups = Vec::new();
        let settled = {
            let mut state = self.state.lock().unwrap();
            if let Some(pending) = state.pending.get_mut(&uri) {
                *pending -= 1;
                if *pending == 0 {
                    state.pending.remove(&uri);
                }
            }
            match result {
                Ok(socket) => {
                    let id = socket.id();
                    state.slots.entry(uri.clone()).or_default().push(PoolSlot {
                        id,
                        resource: Arc::clone(&socket),
                        available: false,
                        idle_timer: None,
                        idle_timeout: options.idle_timeout,
                    });
                    state.id_to_uri.insert(id, uri.clone());
                    Ok(socket)
                }
                Err(error) => {
                    tracing::debug!(uri = %uri, error = %error, "connect failed");
                    // The failed connect freed capacity; give the head waiter
                    // its chance.
                    followups = self.dispatch_locked(&mut state, &uri);
                    Err(error)
                }
            }
        };
        match settled {
            Ok(socket) => deferred.resolve(socket),
            Err(error) => deferred.reject(error),
        }
        self.apply(followups);
    }

    /// Serve the head waiter if a slot or capacity is now available. Runs
    /// under the lock; returns the work to perform outside it.
    fn dispatch_locked(&self, state: &mut PoolState, uri: &str) -> Vec<Action> {
        let head_options = match state.queue.get(uri).and_then(VecDeque::front) {
            Some(waiter) => waiter.options.clone(),
            None => {
                state.queue.remove(uri);
                return Vec::new();
            }
        };
        let (selected, needs_rebind) = self.scan(state, uri, &head_options);
        if let Some(socket) = selected {
            let waiter = self.pop_waiter(state, uri);
            tracing::debug!(uri = %uri, id = socket.id(), "handing pooled socket to queued waiter");
            return vec![Action::Settle(waiter.deferred, Ok(socket))];
        }
        if capacity_allows(state, uri, head_options.host_connection_limit, needs_rebind) {
            let waiter = self.pop_waiter(state, uri);
            *state.pending.entry(uri.to_string()).or_insert(0) += 1;
            return vec![Action::Connect(uri.to_string(), waiter.options, waiter.deferred)];
        }
        Vec::new()
    }

    fn pop_waiter(&self, state: &mut PoolState, uri: &str) -> Waiter {
        let queue = state.queue.get_mut(uri).expect("dispatch checked the queue head");
        let waiter = queue.pop_front().expect("dispatch checked the queue head");
        if queue.is_empty() {
            state.queue.remove(uri);
        }
        waiter
    }

    fn evict_locked(&self, state: &mut PoolState, id: SocketId, uri: &str) -> Vec<Action> {
        if let Some(slots) = state.slots.get_mut(uri) {
            if let Some(index) = slots.iter().position(|slot| slot.id == id) {
                let slot = slots.remove(index);
                if let Some((timer, _)) = slot.idle_timer {
                    self.reactor.cancel(timer);
                }
            }
            if slots.is_empty() {
                state.slots.remove(uri);
            }
        }
        state.id_to_uri.remove(&id);
        self.dispatch_locked(state, uri)
    }

    /// Arm (or re-enable) the idle timer of a slot that is idle. No-op for
    /// busy, missing, or no-timeout slots.
    fn arm_idle_timer_locked(&self, state: &mut PoolState, id: SocketId, uri: &str) {
        let Some(slot) = find_slot(state, uri, id) else { return };
        if !slot.available {
            return;
        }
        if slot.idle_timeout.is_zero() {
            if let Some((timer, _)) = slot.idle_timer.take() {
                self.reactor.cancel(timer);
            }
            return;
        }
        match slot.idle_timer {
            Some((timer, delay)) if delay == slot.idle_timeout => self.reactor.enable(timer),
            _ => {
                if let Some((stale, _)) = slot.idle_timer.take() {
                    self.reactor.cancel(stale);
                }
                let weak = self.weak.clone();
                let timer = self.reactor.once(
                    slot.idle_timeout,
                    Box::new(move || {
                        if let Some(pool) = weak.upgrade() {
                            pool.idle_expired(id);
                        }
                    }),
                );
                slot.idle_timer = Some((timer, slot.idle_timeout));
            }
        }
    }

    fn idle_expired(&self, id: SocketId) {
        let actions = {
            let mut state = self.state.lock().unwrap();
            let Some(uri) = state.id_to_uri.get(&id).cloned() else { return };
            // A checkout may have raced the fire; only an idle slot expires.
            let still_idle =
                find_slot(&mut state, &uri, id).map_or(false, |slot| slot.available);
            if !still_idle {
                return;
            }
            tracing::debug!(uri = %uri, id, "idle timeout; evicting socket");
            self.evict_locked(&mut state, id, &uri)
        };
        self.apply(actions);
    }

    fn apply(&self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Settle(deferred, Ok(socket)) => deferred.resolve(socket),
                Action::Settle(deferred, Err(error)) => deferred.reject(error),
                Action::Connect(uri, options, deferred) => {
                    self.start_connect(uri, options, deferred)
                }
            }
        }
    }
}

fn find_slot<'a>(state: &'a mut PoolState, uri: &str, id: SocketId) -> Option<&'a mut PoolSlot> {
    state.slots.get_mut(uri)?.iter_mut().find(|slot| slot.id == id)
}

fn capacity_allows(state: &PoolState, uri: &str, limit: i64, needs_rebind: bool) -> bool {
    if limit <= 0 || needs_rebind {
        return true;
    }
    let open = state.slots.get(uri).map_or(0, Vec::len);
    let pending = state.pending.get(uri).copied().unwrap_or(0);
    ((open + pending) as i64) < limit
}

/// Authorities are case-insensitive except for unix socket paths.
fn canonicalize(uri: &str) -> String {
    let is_unix = uri.get(..7).is_some_and(|prefix| prefix.eq_ignore_ascii_case("unix://"));
    if is_unix {
        uri.to_string()
    } else {
        uri.to_ascii_lowercase()
    }
}
