//! The TLS handshake controller.
//!
//! [`Encryptor`] transitions sockets between plaintext and encrypted modes.
//! Per socket, at most one operation is in flight; a second `enable` or
//! `disable` while one is pending fails fast with [`NetError::CryptoBusy`]
//! rather than queue.
//!
//! A handshake that cannot finish synchronously is parked as a
//! `HandshakeRecord`: a readability watcher re-runs the step on every
//! readiness edge and a one-shot timer enforces the handshake deadline.
//! Settling the operation (success, failure, or timeout) removes the record
//! and cancels both watchers exactly once.

pub mod verify;

use self::verify::PeerVerifier;
use crate::base::neterror::NetError;
use crate::base::promise::{promise, Deferred, Promise};
use crate::reactor::{Reactor, WatcherId};
use crate::socket::options::{CryptoMethod, CryptoOptions, OptionValue};
use crate::socket::stream::{CryptoOp, SharedSocket, SocketId, StepOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Cipher preference applied in manual-verification (legacy) mode when the
/// caller does not pin its own: modern ECDHE/DHE GCM and SHA suites first,
/// RC4/AES fallbacks after, weak families disabled outright. Peers that pin
/// this list depend on the exact sequence.
pub const DEFAULT_CIPHER_LIST: &str = concat!(
    "ECDHE-RSA-AES128-GCM-SHA256:ECDHE-ECDSA-AES128-GCM-SHA256:",
    "ECDHE-RSA-AES256-GCM-SHA384:ECDHE-ECDSA-AES256-GCM-SHA384:",
    "DHE-RSA-AES128-GCM-SHA256:DHE-DSS-AES128-GCM-SHA256:kEDH+AESGCM:",
    "ECDHE-RSA-AES128-SHA256:ECDHE-ECDSA-AES128-SHA256:",
    "ECDHE-RSA-AES128-SHA:ECDHE-ECDSA-AES128-SHA:",
    "ECDHE-RSA-AES256-SHA384:ECDHE-ECDSA-AES256-SHA384:",
    "ECDHE-RSA-AES256-SHA:ECDHE-ECDSA-AES256-SHA:",
    "DHE-RSA-AES128-SHA256:DHE-RSA-AES128-SHA:DHE-DSS-AES128-SHA256:",
    "DHE-RSA-AES256-SHA256:DHE-DSS-AES256-SHA:DHE-RSA-AES256-SHA:",
    "AES128-GCM-SHA256:AES256-GCM-SHA384:",
    "ECDHE-RSA-RC4-SHA:ECDHE-ECDSA-RC4-SHA:AES128:AES256:RC4-SHA:",
    "HIGH:!aNULL:!eNULL:!EXPORT:!DES:!3DES:!MD5:!PSK"
);

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration captured at construction.
#[derive(Debug, Clone)]
pub struct EncryptorConfig {
    /// Default trust store path injected as `cafile` when a request carries
    /// none.
    pub ca_file: Option<String>,
    /// Default TLS version selection.
    pub crypto_method: CryptoMethod,
    /// Default cipher preference; `None` falls back to
    /// [`DEFAULT_CIPHER_LIST`] in manual mode and the transport's own
    /// defaults otherwise.
    pub ciphers: Option<String>,
    /// Handshake deadline.
    pub handshake_timeout: Duration,
    /// Who verifies peer identity: the transport, or this controller.
    pub verifier: PeerVerifier,
}

impl Default for EncryptorConfig {
    fn default() -> Self {
        EncryptorConfig {
            ca_file: None,
            crypto_method: CryptoMethod::Any,
            ciphers: None,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            verifier: PeerVerifier::Native,
        }
    }
}

/// One in-flight crypto operation on one socket.
struct HandshakeRecord {
    socket: SharedSocket,
    deferred: Deferred<SharedSocket>,
    io_watcher: WatcherId,
    timeout_watcher: WatcherId,
    op: CryptoOp,
    options: CryptoOptions,
}

pub struct Encryptor {
    weak: Weak<Encryptor>,
    reactor: Arc<dyn Reactor>,
    config: EncryptorConfig,
    pending: Mutex<HashMap<SocketId, HandshakeRecord>>,
}

impl Encryptor {
    pub fn new(reactor: Arc<dyn Reactor>) -> Arc<Self> {
        Self::with_config(reactor, EncryptorConfig::default())
    }

    pub fn with_config(reactor: Arc<dyn Reactor>, config: EncryptorConfig) -> Arc<Self> {
        Arc::new_cyclic(|weak| Encryptor {
            weak: weak.clone(),
            reactor,
            config,
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Upgrade `socket` to TLS under `options`.
    ///
    /// Succeeds immediately when the socket's context already matches the
    /// normalized options; renegotiates (disable, then enable) when the
    /// socket is encrypted under a different configuration; otherwise
    /// installs the options and drives the handshake.
    pub fn enable(&self, socket: &SharedSocket, options: CryptoOptions) -> Promise<SharedSocket> {
        let id = socket.id();
        if self.pending.lock().unwrap().contains_key(&id) {
            return Promise::rejected(NetError::CryptoBusy);
        }
        if !socket.kind().supports_crypto() {
            return Promise::rejected(NetError::InvalidStream);
        }
        let options = self.normalize(options);
        if socket.context().matches(&options) {
            return Promise::resolved(Arc::clone(socket));
        }
        if socket.is_encrypted() {
            return self.renegotiate(socket, options);
        }
        let mut installed = options.clone();
        installed.set("sni_nb_hack", OptionValue::Bool(false));
        socket.set_context(installed);
        self.run_step(socket, CryptoOp::Enable, options)
    }

    /// Drop the TLS layer from `socket`. Succeeds immediately when the
    /// socket carries no TLS context options.
    pub fn disable(&self, socket: &SharedSocket) -> Promise<SharedSocket> {
        let id = socket.id();
        if self.pending.lock().unwrap().contains_key(&id) {
            return Promise::rejected(NetError::CryptoBusy);
        }
        if socket.context().is_empty() {
            return Promise::resolved(Arc::clone(socket));
        }
        self.run_step(socket, CryptoOp::Disable, CryptoOptions::new())
    }

    /// Fill in the defaults captured at construction and resolve legacy
    /// aliases. In manual mode the transport's own verification is switched
    /// off and the peer certificate is always captured for our checks.
    fn normalize(&self, mut options: CryptoOptions) -> CryptoOptions {
        if let Some(legacy) = options.remove("CN_match") {
            if !options.contains("peer_name") {
                options.set("peer_name", legacy);
            }
        }
        if !options.contains("cafile") {
            if let Some(path) = &self.config.ca_file {
                options.set("cafile", OptionValue::Str(path.clone()));
            }
        }
        if !options.contains("crypto_method") {
            options.set(
                "crypto_method",
                OptionValue::Str(self.config.crypto_method.as_str().to_string()),
            );
        }
        match self.config.verifier {
            PeerVerifier::Manual => {
                if !options.contains("ciphers") {
                    let ciphers = self
                        .config
                        .ciphers
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CIPHER_LIST.to_string());
                    options.set("ciphers", OptionValue::Str(ciphers));
                }
                options.set("capture_peer_cert", OptionValue::Bool(true));
                options.set("verify_peer", OptionValue::Bool(false));
                options.set("verify_peer_name", OptionValue::Bool(false));
            }
            PeerVerifier::Native => {
                if !options.contains("ciphers") {
                    if let Some(ciphers) = &self.config.ciphers {
                        options.set("ciphers", OptionValue::Str(ciphers.clone()));
                    }
                }
                if !options.contains("verify_peer") {
                    options.set("verify_peer", OptionValue::Bool(true));
                }
                if !options.contains("verify_peer_name") {
                    options.set("verify_peer_name", OptionValue::Bool(true));
                }
            }
        }
        options
    }

    fn renegotiate(&self, socket: &SharedSocket, options: CryptoOptions) -> Promise<SharedSocket> {
        tracing::debug!(id = socket.id(), "context changed on encrypted socket; renegotiating");
        let (deferred, result) = promise();
        let weak = self.weak.clone();
        let socket_for_chain = Arc::clone(socket);
        self.disable(socket).when_settled(move |first| match first {
            Ok(_) => {
                let Some(encryptor) = weak.upgrade() else {
                    return drop(deferred);
                };
                encryptor.enable(&socket_for_chain, options).when_settled(move |second| {
                    match second {
                        Ok(socket) => deferred.resolve(socket),
                        Err(error) => {
                            deferred.reject(NetError::CryptoRenegotiationFailed(Box::new(error)))
                        }
                    }
                });
            }
            Err(error) => {
                deferred.reject(NetError::CryptoRenegotiationFailed(Box::new(error)));
            }
        });
        result
    }

    fn run_step(
        &self,
        socket: &SharedSocket,
        op: CryptoOp,
        options: CryptoOptions,
    ) -> Promise<SharedSocket> {
        match socket.crypto_step(op, &options) {
            StepOutcome::Completed => match self.complete(socket, op, &options) {
                Ok(()) => Promise::resolved(Arc::clone(socket)),
                Err(error) => Promise::rejected(error),
            },
            StepOutcome::Fatal(message) => {
                self.fail_cleanup(socket, op);
                Promise::rejected(NetError::CryptoError(message))
            }
            StepOutcome::WouldBlock => self.watch(socket, op, options),
        }
    }

    /// Park the operation: readability watcher to retry the step, one-shot
    /// timer for the deadline. The pending-map lock is held across watcher
    /// registration so neither callback can observe a missing record.
    fn watch(
        &self,
        socket: &SharedSocket,
        op: CryptoOp,
        options: CryptoOptions,
    ) -> Promise<SharedSocket> {
        let id = socket.id();
        let (deferred, result) = promise();
        let mut pending = self.pending.lock().unwrap();
        let weak = self.weak.clone();
        let io_watcher = self.reactor.on_readable(
            socket,
            Box::new(move || {
                if let Some(encryptor) = weak.upgrade() {
                    encryptor.drive(id);
                }
            }),
        );
        let weak = self.weak.clone();
        let timeout_watcher = self.reactor.once(
            self.config.handshake_timeout,
            Box::new(move || {
                if let Some(encryptor) = weak.upgrade() {
                    encryptor.expire(id);
                }
            }),
        );
        tracing::debug!(id, op = ?op, "handshake would block; watching socket");
        pending.insert(
            id,
            HandshakeRecord {
                socket: Arc::clone(socket),
                deferred,
                io_watcher,
                timeout_watcher,
                op,
                options,
            },
        );
        result
    }

    /// Readability callback: re-run the step and settle on a terminal
    /// outcome.
    fn drive(&self, id: SocketId) {
        let settled = {
            let mut pending = self.pending.lock().unwrap();
            let Some(record) = pending.get(&id) else { return };
            match record.socket.crypto_step(record.op, &record.options) {
                StepOutcome::WouldBlock => None,
                outcome => pending.remove(&id).map(|record| (record, outcome)),
            }
        };
        let Some((record, outcome)) = settled else { return };
        let HandshakeRecord { socket, deferred, io_watcher, timeout_watcher, op, options } = record;
        self.reactor.cancel(io_watcher);
        self.reactor.cancel(timeout_watcher);
        match outcome {
            StepOutcome::Completed => match self.complete(&socket, op, &options) {
                Ok(()) => deferred.resolve(socket),
                Err(error) => deferred.reject(error),
            },
            StepOutcome::Fatal(message) => {
                self.fail_cleanup(&socket, op);
                deferred.reject(NetError::CryptoError(message));
            }
            StepOutcome::WouldBlock => {}
        }
    }

    /// Deadline callback.
    fn expire(&self, id: SocketId) {
        let record = self.pending.lock().unwrap().remove(&id);
        let Some(record) = record else { return };
        self.reactor.cancel(record.io_watcher);
        self.reactor.cancel(record.timeout_watcher);
        tracing::debug!(id, "handshake deadline exceeded");
        record.deferred.reject(NetError::CryptoTimeout);
    }

    /// Post-step duties once the transport reports completion: peer identity
    /// checks and certificate capture after an enable, context teardown
    /// after a disable.
    fn complete(
        &self,
        socket: &SharedSocket,
        op: CryptoOp,
        options: &CryptoOptions,
    ) -> Result<(), NetError> {
        match op {
            CryptoOp::Enable => {
                if let Err(error) = self.config.verifier.verify(socket, options) {
                    socket.clear_context();
                    return Err(error);
                }
                if options.get_bool("capture_peer_cert").unwrap_or(false) {
                    if let Some(der) = socket.peer_certificate() {
                        let mut context = socket.context();
                        context.set("peer_certificate", OptionValue::Bytes(der));
                        socket.set_context(context);
                    }
                }
                tracing::debug!(id = socket.id(), "TLS established");
                Ok(())
            }
            CryptoOp::Disable => {
                socket.clear_context();
                tracing::debug!(id = socket.id(), "TLS torn down");
                Ok(())
            }
        }
    }

    /// A failed enable must not leave the just-installed context behind,
    /// or a retry with the same options would take the already-configured
    /// fast path on a plaintext socket.
    fn fail_cleanup(&self, socket: &SharedSocket, op: CryptoOp) {
        if op == CryptoOp::Enable {
            socket.clear_context();
        }
    }
}
