//! Deterministic test doubles: a hand-cranked reactor, a scriptable socket,
//! and a scriptable connector. Timers and readiness never fire on their own;
//! tests fire them explicitly, which makes watcher lifecycles and dispatch
//! ordering observable.

#![allow(dead_code)]

use clientnet::base::neterror::NetError;
use clientnet::reactor::{Reactor, WatcherCallback, WatcherId};
use clientnet::socket::connect::{ConnectCallback, Connector};
use clientnet::socket::options::{CryptoOptions, PoolOptions};
use clientnet::socket::stream::{
    CryptoOp, SharedSocket, SocketId, SocketStream, StepOutcome, StreamKind,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type SharedCallback = Arc<Mutex<WatcherCallback>>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum WatcherKind {
    Readable(SocketId),
    Timer,
}

struct WatcherEntry {
    kind: WatcherKind,
    delay: Option<Duration>,
    callback: SharedCallback,
    enabled: bool,
    cancelled: bool,
    fired: usize,
}

#[derive(Default)]
struct ReactorInner {
    next_id: WatcherId,
    watchers: Vec<(WatcherId, WatcherEntry)>,
}

/// Reactor whose watchers only fire when the test says so.
#[derive(Default)]
pub struct TestReactor {
    inner: Mutex<ReactorInner>,
}

impl TestReactor {
    pub fn new() -> Arc<Self> {
        Arc::new(TestReactor::default())
    }

    fn insert(&self, kind: WatcherKind, delay: Option<Duration>, callback: WatcherCallback) -> WatcherId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.watchers.push((
            id,
            WatcherEntry {
                kind,
                delay,
                callback: Arc::new(Mutex::new(callback)),
                enabled: true,
                cancelled: false,
                fired: 0,
            },
        ));
        id
    }

    fn entry_map<R>(&self, id: WatcherId, f: impl FnOnce(&mut WatcherEntry) -> R) -> Option<R> {
        let mut inner = self.inner.lock().unwrap();
        inner.watchers.iter_mut().find(|(wid, _)| *wid == id).map(|(_, entry)| f(entry))
    }

    /// Fire every enabled readability watcher for `socket_id`; returns how
    /// many ran.
    pub fn fire_readable(&self, socket_id: SocketId) -> usize {
        let callbacks: Vec<SharedCallback> = {
            let mut inner = self.inner.lock().unwrap();
            inner
                .watchers
                .iter_mut()
                .filter(|(_, entry)| {
                    entry.kind == WatcherKind::Readable(socket_id)
                        && entry.enabled
                        && !entry.cancelled
                })
                .map(|(_, entry)| {
                    entry.fired += 1;
                    Arc::clone(&entry.callback)
                })
                .collect()
        };
        for callback in &callbacks {
            let mut callback = callback.lock().unwrap();
            (*callback)();
        }
        callbacks.len()
    }

    /// Fire one timer; a fire leaves it disabled, mirroring the production
    /// reactor. Returns false for cancelled/disabled/unknown watchers.
    pub fn fire_timer(&self, id: WatcherId) -> bool {
        let callback = {
            let mut inner = self.inner.lock().unwrap();
            let Some((_, entry)) =
                inner.watchers.iter_mut().find(|(wid, _)| *wid == id)
            else {
                return false;
            };
            if entry.kind != WatcherKind::Timer || entry.cancelled || !entry.enabled {
                return false;
            }
            entry.enabled = false;
            entry.fired += 1;
            Arc::clone(&entry.callback)
        };
        let mut callback = callback.lock().unwrap();
        (*callback)();
        true
    }

    /// Ids of timers that are still armed.
    pub fn armed_timer_ids(&self) -> Vec<WatcherId> {
        let inner = self.inner.lock().unwrap();
        inner
            .watchers
            .iter()
            .filter(|(_, entry)| {
                entry.kind == WatcherKind::Timer && entry.enabled && !entry.cancelled
            })
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn readable_watcher_for(&self, socket_id: SocketId) -> Option<WatcherId> {
        let inner = self.inner.lock().unwrap();
        inner
            .watchers
            .iter()
            .find(|(_, entry)| entry.kind == WatcherKind::Readable(socket_id) && !entry.cancelled)
            .map(|(id, _)| *id)
    }

    pub fn is_cancelled(&self, id: WatcherId) -> bool {
        self.entry_map(id, |entry| entry.cancelled).unwrap_or(false)
    }

    pub fn is_enabled(&self, id: WatcherId) -> bool {
        self.entry_map(id, |entry| entry.enabled && !entry.cancelled).unwrap_or(false)
    }

    pub fn delay_of(&self, id: WatcherId) -> Option<Duration> {
        self.entry_map(id, |entry| entry.delay).flatten()
    }

    /// Watchers that are neither cancelled nor spent.
    pub fn active_watcher_count(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.watchers.iter().filter(|(_, entry)| !entry.cancelled).count()
    }
}

impl Reactor for TestReactor {
    fn on_readable(&self, socket: &SharedSocket, callback: WatcherCallback) -> WatcherId {
        self.insert(WatcherKind::Readable(socket.id()), None, callback)
    }

    fn once(&self, delay: Duration, callback: WatcherCallback) -> WatcherId {
        self.insert(WatcherKind::Timer, Some(delay), callback)
    }

    fn disable(&self, id: WatcherId) {
        self.entry_map(id, |entry| entry.enabled = false);
    }

    fn enable(&self, id: WatcherId) {
        self.entry_map(id, |entry| {
            if !entry.cancelled {
                entry.enabled = true;
            }
        });
    }

    fn cancel(&self, id: WatcherId) {
        self.entry_map(id, |entry| {
            entry.cancelled = true;
            entry.enabled = false;
        });
    }
}

static NEXT_FAKE_ID: AtomicU64 = AtomicU64::new(1_000_000);

#[derive(Debug, Default)]
struct FakeStreamInner {
    context: CryptoOptions,
    encrypted: bool,
    script: VecDeque<StepOutcome>,
    steps: Vec<CryptoOp>,
    peer_cert: Option<Vec<u8>>,
}

/// Socket whose handshake steps follow a script; an empty script completes
/// every step.
#[derive(Debug)]
pub struct FakeStream {
    id: SocketId,
    kind: StreamKind,
    bindto: String,
    alive: AtomicBool,
    inner: Mutex<FakeStreamInner>,
}

impl FakeStream {
    pub fn new() -> Arc<Self> {
        Self::with_bindto("")
    }

    pub fn with_bindto(bindto: &str) -> Arc<Self> {
        Arc::new(FakeStream {
            id: NEXT_FAKE_ID.fetch_add(1, Ordering::Relaxed),
            kind: StreamKind::Tcp,
            bindto: bindto.to_string(),
            alive: AtomicBool::new(true),
            inner: Mutex::new(FakeStreamInner::default()),
        })
    }

    pub fn with_kind(kind: StreamKind) -> Arc<Self> {
        Arc::new(FakeStream {
            id: NEXT_FAKE_ID.fetch_add(1, Ordering::Relaxed),
            kind,
            bindto: String::new(),
            alive: AtomicBool::new(true),
            inner: Mutex::new(FakeStreamInner::default()),
        })
    }

    pub fn script_steps(&self, outcomes: impl IntoIterator<Item = StepOutcome>) {
        self.inner.lock().unwrap().script.extend(outcomes);
    }

    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn set_peer_cert(&self, der: Vec<u8>) {
        self.inner.lock().unwrap().peer_cert = Some(der);
    }

    /// Pretend a TLS session is already established under `context`.
    pub fn mark_encrypted(&self, context: CryptoOptions) {
        let mut inner = self.inner.lock().unwrap();
        inner.encrypted = true;
        inner.context = context;
    }

    pub fn steps_taken(&self) -> Vec<CryptoOp> {
        self.inner.lock().unwrap().steps.clone()
    }
}

impl SocketStream for FakeStream {
    fn id(&self) -> SocketId {
        self.id
    }

    fn kind(&self) -> StreamKind {
        self.kind
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn is_encrypted(&self) -> bool {
        self.inner.lock().unwrap().encrypted
    }

    fn context(&self) -> CryptoOptions {
        self.inner.lock().unwrap().context.clone()
    }

    fn set_context(&self, options: CryptoOptions) {
        self.inner.lock().unwrap().context = options;
    }

    fn clear_context(&self) {
        self.inner.lock().unwrap().context = CryptoOptions::new();
    }

    fn bind_address(&self) -> String {
        self.bindto.clone()
    }

    fn crypto_step(&self, op: CryptoOp, _options: &CryptoOptions) -> StepOutcome {
        let mut inner = self.inner.lock().unwrap();
        inner.steps.push(op);
        let outcome = inner.script.pop_front().unwrap_or(StepOutcome::Completed);
        if outcome == StepOutcome::Completed {
            inner.encrypted = op == CryptoOp::Enable;
        }
        outcome
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        self.inner.lock().unwrap().peer_cert.clone()
    }
}

#[derive(Default)]
struct FakeConnectorInner {
    connects: usize,
    fail_next: Option<NetError>,
    park_count: usize,
    parked: Vec<(String, String, ConnectCallback)>,
    created: Vec<Arc<FakeStream>>,
}

/// Connector that fabricates [`FakeStream`]s. Completes synchronously unless
/// a connect was parked with [`park_next`](FakeConnector::park_next).
#[derive(Default)]
pub struct FakeConnector {
    inner: Mutex<FakeConnectorInner>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(FakeConnector::default())
    }

    pub fn connect_count(&self) -> usize {
        self.inner.lock().unwrap().connects
    }

    pub fn fail_next(&self, error: NetError) {
        self.inner.lock().unwrap().fail_next = Some(error);
    }

    /// Hold the next connect open until [`release_parked`](Self::release_parked).
    pub fn park_next(&self) {
        self.inner.lock().unwrap().park_count += 1;
    }

    pub fn parked_count(&self) -> usize {
        self.inner.lock().unwrap().parked.len()
    }

    /// Complete every parked connect successfully; returns how many.
    pub fn release_parked(&self) -> usize {
        let parked: Vec<_> = self.inner.lock().unwrap().parked.drain(..).collect();
        let released = parked.len();
        for (_, bindto, on_done) in parked {
            let stream = FakeStream::with_bindto(&bindto);
            self.inner.lock().unwrap().created.push(Arc::clone(&stream));
            let socket: SharedSocket = stream;
            on_done(Ok(socket));
        }
        released
    }

    /// Fail every parked connect; returns how many.
    pub fn fail_parked(&self, error: NetError) -> usize {
        let parked: Vec<_> = self.inner.lock().unwrap().parked.drain(..).collect();
        let failed = parked.len();
        for (_, _, on_done) in parked {
            on_done(Err(error.clone()));
        }
        failed
    }

    /// The most recently fabricated stream, for tests that need to poke its
    /// liveness.
    pub fn last_created(&self) -> Option<Arc<FakeStream>> {
        self.inner.lock().unwrap().created.last().cloned()
    }
}

impl Connector for FakeConnector {
    fn connect(&self, authority: &str, options: &PoolOptions, on_done: ConnectCallback) {
        let mut on_done = Some(on_done);
        let result: Option<Result<SharedSocket, NetError>> = {
            let mut inner = self.inner.lock().unwrap();
            inner.connects += 1;
            if let Some(error) = inner.fail_next.take() {
                Some(Err(error))
            } else if inner.park_count > 0 {
                inner.park_count -= 1;
                inner.parked.push((
                    authority.to_string(),
                    options.bindto.clone(),
                    on_done.take().unwrap(),
                ));
                None
            } else {
                let stream = FakeStream::with_bindto(&options.bindto);
                inner.created.push(Arc::clone(&stream));
                let socket: SharedSocket = stream;
                Some(Ok(socket))
            }
        };
        if let Some(result) = result {
            (on_done.take().unwrap())(result);
        }
    }
}
