//! TLS-capable non-blocking TCP socket.
//!
//! [`TcpSocket`] owns the canonical `std::net::TcpStream` handle and a TLS
//! transport state. The TLS session runs over a dup of the descriptor
//! (`try_clone`), so the canonical handle stays usable for liveness probes
//! and reactor registration across plaintext/encrypted transitions.
//!
//! A handshake step maps boring's mid-handshake API onto [`StepOutcome`]:
//! `HandshakeError::WouldBlock` parks the session in `Handshaking` and
//! reports `WouldBlock`; the next step resumes it with
//! `MidHandshakeSslStream::handshake`.

use crate::socket::options::{CryptoMethod, CryptoOptions};
use crate::socket::stream::{CryptoOp, SocketId, SocketStream, StepOutcome, StreamKind};
use boring::ssl::{
    ConnectConfiguration, ErrorCode, HandshakeError, MidHandshakeSslStream, SslConnector,
    SslMethod, SslStream, SslVerifyMode, SslVersion,
};
use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

static NEXT_SOCKET_ID: AtomicU64 = AtomicU64::new(1);

enum Transport {
    Plain,
    Handshaking(MidHandshakeSslStream<TcpStream>),
    Encrypted(SslStream<TcpStream>),
    ShuttingDown(SslStream<TcpStream>),
}

struct SocketState {
    transport: Transport,
    context: CryptoOptions,
}

pub struct TcpSocket {
    id: SocketId,
    peer_host: String,
    bindto: String,
    raw: TcpStream,
    state: Mutex<SocketState>,
}

impl TcpSocket {
    /// Wrap a connected stream. The stream is switched to non-blocking mode;
    /// `peer_host` is the name dialed (used for SNI when no `peer_name`
    /// option overrides it) and `bindto` the local bind address requested at
    /// connect time.
    pub fn from_std(
        stream: TcpStream,
        peer_host: impl Into<String>,
        bindto: impl Into<String>,
    ) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        Ok(TcpSocket {
            id: NEXT_SOCKET_ID.fetch_add(1, Ordering::Relaxed),
            peer_host: peer_host.into(),
            bindto: bindto.into(),
            raw: stream,
            state: Mutex::new(SocketState { transport: Transport::Plain, context: CryptoOptions::new() }),
        })
    }

    pub fn peer_host(&self) -> &str {
        &self.peer_host
    }

    /// Non-blocking read through whichever transport is active.
    pub fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match &mut state.transport {
            Transport::Encrypted(stream) => stream.read(buf),
            Transport::Plain => (&self.raw).read(buf),
            _ => Err(std::io::Error::new(ErrorKind::WouldBlock, "TLS transition in progress")),
        }
    }

    /// Non-blocking write through whichever transport is active.
    pub fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut state = self.state.lock().unwrap();
        match &mut state.transport {
            Transport::Encrypted(stream) => stream.write(buf),
            Transport::Plain => (&self.raw).write(buf),
            _ => Err(std::io::Error::new(ErrorKind::WouldBlock, "TLS transition in progress")),
        }
    }

    fn configuration(options: &CryptoOptions) -> Result<ConnectConfiguration, String> {
        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|error| error.to_string())?;
        if let Some(path) = options.get_str("cafile") {
            builder.set_ca_file(path).map_err(|error| error.to_string())?;
        }
        if let Some(ciphers) = options.get_str("ciphers") {
            builder.set_cipher_list(ciphers).map_err(|error| error.to_string())?;
        }
        let method = options
            .get_str("crypto_method")
            .and_then(CryptoMethod::parse)
            .unwrap_or_default();
        let (min, max) = version_bounds(method);
        builder.set_min_proto_version(min).map_err(|error| error.to_string())?;
        builder.set_max_proto_version(max).map_err(|error| error.to_string())?;
        let verify_peer = options.get_bool("verify_peer").unwrap_or(true);
        builder.set_verify(if verify_peer { SslVerifyMode::PEER } else { SslVerifyMode::NONE });
        let mut configuration =
            builder.build().configure().map_err(|error| error.to_string())?;
        if !options.get_bool("verify_peer_name").unwrap_or(true) {
            configuration.set_verify_hostname(false);
        }
        Ok(configuration)
    }

    fn step_enable(&self, state: &mut SocketState, options: &CryptoOptions) -> StepOutcome {
        match std::mem::replace(&mut state.transport, Transport::Plain) {
            Transport::Plain => {
                let configuration = match Self::configuration(options) {
                    Ok(configuration) => configuration,
                    Err(message) => return StepOutcome::Fatal(message),
                };
                let stream = match self.raw.try_clone() {
                    Ok(stream) => stream,
                    Err(error) => return StepOutcome::Fatal(error.to_string()),
                };
                let domain = options
                    .get_str("peer_name")
                    .map(str::to_owned)
                    .unwrap_or_else(|| self.peer_host.clone());
                Self::resolve_handshake(state, configuration.connect(&domain, stream))
            }
            Transport::Handshaking(session) => Self::resolve_handshake(state, session.handshake()),
            Transport::Encrypted(stream) => {
                state.transport = Transport::Encrypted(stream);
                StepOutcome::Completed
            }
            Transport::ShuttingDown(stream) => {
                state.transport = Transport::ShuttingDown(stream);
                StepOutcome::Fatal("TLS shutdown in progress".to_string())
            }
        }
    }

    fn resolve_handshake(
        state: &mut SocketState,
        result: Result<SslStream<TcpStream>, HandshakeError<TcpStream>>,
    ) -> StepOutcome {
        match result {
            Ok(stream) => {
                state.transport = Transport::Encrypted(stream);
                StepOutcome::Completed
            }
            Err(HandshakeError::WouldBlock(session)) => {
                state.transport = Transport::Handshaking(session);
                StepOutcome::WouldBlock
            }
            Err(HandshakeError::Failure(session)) => {
                StepOutcome::Fatal(session.error().to_string())
            }
            Err(HandshakeError::SetupFailure(stack)) => StepOutcome::Fatal(stack.to_string()),
        }
    }

    fn step_disable(&self, state: &mut SocketState) -> StepOutcome {
        match std::mem::replace(&mut state.transport, Transport::Plain) {
            Transport::Encrypted(mut stream) | Transport::ShuttingDown(mut stream) => {
                match stream.shutdown() {
                    Ok(_) => StepOutcome::Completed,
                    Err(error)
                        if error.code() == ErrorCode::WANT_READ
                            || error.code() == ErrorCode::WANT_WRITE =>
                    {
                        state.transport = Transport::ShuttingDown(stream);
                        StepOutcome::WouldBlock
                    }
                    // Peer already sent close_notify or dropped the link.
                    Err(error) if error.code() == ErrorCode::ZERO_RETURN => StepOutcome::Completed,
                    Err(error) => StepOutcome::Fatal(error.to_string()),
                }
            }
            Transport::Plain => StepOutcome::Completed,
            Transport::Handshaking(_) => {
                StepOutcome::Fatal("cannot disable TLS mid-handshake".to_string())
            }
        }
    }
}

impl fmt::Debug for TcpSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpSocket")
            .field("id", &self.id)
            .field("peer_host", &self.peer_host)
            .field("bindto", &self.bindto)
            .finish()
    }
}

impl SocketStream for TcpSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn kind(&self) -> StreamKind {
        StreamKind::Tcp
    }

    fn is_alive(&self) -> bool {
        let mut probe = [0u8; 1];
        match self.raw.peek(&mut probe) {
            Ok(0) => false,
            Ok(_) => true,
            Err(error) if error.kind() == ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    fn is_encrypted(&self) -> bool {
        matches!(self.state.lock().unwrap().transport, Transport::Encrypted(_))
    }

    fn context(&self) -> CryptoOptions {
        self.state.lock().unwrap().context.clone()
    }

    fn set_context(&self, options: CryptoOptions) {
        self.state.lock().unwrap().context = options;
    }

    fn clear_context(&self) {
        self.state.lock().unwrap().context = CryptoOptions::new();
    }

    fn bind_address(&self) -> String {
        self.bindto.clone()
    }

    fn crypto_step(&self, op: CryptoOp, options: &CryptoOptions) -> StepOutcome {
        let mut state = self.state.lock().unwrap();
        match op {
            CryptoOp::Enable => self.step_enable(&mut state, options),
            CryptoOp::Disable => self.step_disable(&mut state),
        }
    }

    fn peer_certificate(&self) -> Option<Vec<u8>> {
        match &self.state.lock().unwrap().transport {
            Transport::Encrypted(stream) => {
                stream.ssl().peer_certificate().and_then(|cert| cert.to_der().ok())
            }
            _ => None,
        }
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.raw.as_raw_fd())
    }
}

fn version_bounds(method: CryptoMethod) -> (Option<SslVersion>, Option<SslVersion>) {
    match method {
        CryptoMethod::Any => (None, None),
        CryptoMethod::Tlsv1_0 => (Some(SslVersion::TLS1), Some(SslVersion::TLS1)),
        CryptoMethod::Tlsv1_1 => (Some(SslVersion::TLS1_1), Some(SslVersion::TLS1_1)),
        CryptoMethod::Tlsv1_2 => (Some(SslVersion::TLS1_2), Some(SslVersion::TLS1_2)),
        CryptoMethod::Tlsv1_3 => (Some(SslVersion::TLS1_3), Some(SslVersion::TLS1_3)),
    }
}
