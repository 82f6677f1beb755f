use thiserror::Error;

/// Failures surfaced by the pool and the handshake controller.
///
/// Every asynchronous failure travels through a [`Promise`](crate::base::promise::Promise)
/// rejection; synchronous misuse (`checkin` of a foreign socket, an
/// unrecognized option key) is reported directly.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    /// A crypto operation is already in flight on this socket.
    #[error("crypto operation already in progress on this socket")]
    CryptoBusy,

    /// The stream type does not support a TLS upgrade.
    #[error("stream does not support TLS")]
    InvalidStream,

    /// The transport reported a handshake failure.
    #[error("TLS handshake failed: {0}")]
    CryptoError(String),

    /// The handshake deadline elapsed before the transport finished.
    #[error("TLS handshake timed out")]
    CryptoTimeout,

    /// The disable half or the re-enable half of a renegotiation failed.
    #[error("TLS renegotiation failed: {0}")]
    CryptoRenegotiationFailed(Box<NetError>),

    /// `checkin`/`clear` was handed a socket this pool never issued.
    #[error("socket is not managed by this pool")]
    UnknownSocket,

    /// An option key nothing recognizes.
    #[error("unknown option: {0}")]
    UnknownOption(String),

    /// Connection establishment failed.
    #[error("connect failed: {0}")]
    ConnectError(String),

    /// The other side of a pending operation went away before settling it.
    #[error("operation aborted")]
    ConnectionAborted,
}
