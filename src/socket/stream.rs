//! The opaque socket handle contract.
//!
//! Both the pool and the handshake controller hold sockets behind this trait
//! and key their maps on [`SocketStream::id`]. The TLS layer itself lives
//! behind [`SocketStream::crypto_step`]: one non-blocking attempt to advance
//! the transport's TLS state, reported as a three-valued [`StepOutcome`].

use crate::socket::options::CryptoOptions;
use std::fmt;
use std::os::fd::RawFd;
use std::sync::Arc;

/// Stable identity of a socket for the lifetime of its handle.
pub type SocketId = u64;

/// Reported transport type of the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Tcp,
    Unix,
    Other,
}

impl StreamKind {
    /// Whether the stream can be upgraded to TLS.
    pub fn supports_crypto(self) -> bool {
        matches!(self, StreamKind::Tcp)
    }
}

/// Which crypto operation a handshake step advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoOp {
    Enable,
    Disable,
}

/// Result of one non-blocking handshake step.
///
/// `Fatal` and `WouldBlock` are distinct terminal/non-terminal states and
/// must never be conflated: `WouldBlock` means "re-run the step when the
/// socket is readable", `Fatal` carries the transport's error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    WouldBlock,
    Fatal(String),
}

pub trait SocketStream: fmt::Debug + Send + Sync {
    fn id(&self) -> SocketId;

    fn kind(&self) -> StreamKind;

    /// Open and not at EOF. A non-consuming probe, safe to call while the
    /// socket is pooled.
    fn is_alive(&self) -> bool;

    /// Whether a TLS session is currently established.
    fn is_encrypted(&self) -> bool;

    /// Current TLS context options attached to the socket.
    fn context(&self) -> CryptoOptions;

    fn set_context(&self, options: CryptoOptions);

    fn clear_context(&self);

    /// Local bind address the socket was created with; empty means any.
    fn bind_address(&self) -> String;

    /// Advance the TLS state machine by one non-blocking step.
    fn crypto_step(&self, op: CryptoOp, options: &CryptoOptions) -> StepOutcome;

    /// DER form of the peer certificate, once a session is established.
    fn peer_certificate(&self) -> Option<Vec<u8>> {
        None
    }

    /// Pollable descriptor for reactor registration, when there is one.
    fn raw_fd(&self) -> Option<RawFd> {
        None
    }
}

/// Shared handle to a socket; ownership stays with the caller, the pool and
/// the handshake controller hold borrows keyed by id.
pub type SharedSocket = Arc<dyn SocketStream>;
