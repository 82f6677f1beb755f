//! # clientnet
//!
//! Non-blocking client-side network primitives.
//!
//! `clientnet` provides the two layers that make outgoing encrypted
//! connections both correct and efficient under concurrent load:
//!
//! - **Socket pooling**: idle connections are reused per authority
//!   (`host:port`), concurrency per authority is capped, overflow requests
//!   queue FIFO, and dead or long-idle sockets are evicted.
//! - **Reactor-driven TLS**: handshakes and tear-downs are advanced one
//!   non-blocking step at a time from readability callbacks, with a single
//!   in-flight operation per socket, a handshake deadline, and peer identity
//!   verification (name and fingerprint).
//!
//! Both layers are small state machines coordinating with an event
//! [`Reactor`](reactor::Reactor). A tokio-backed reactor and TCP connector
//! are included; both seams accept alternative implementations.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use clientnet::crypto::Encryptor;
//! use clientnet::reactor::runtime::TokioReactor;
//! use clientnet::socket::connect::TcpConnector;
//! use clientnet::socket::options::CryptoOptions;
//! use clientnet::socket::pool::SocketPool;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let reactor = Arc::new(TokioReactor::new());
//!     let pool = SocketPool::new(reactor.clone(), Arc::new(TcpConnector::new()));
//!     let encryptor = Encryptor::new(reactor);
//!
//!     let socket = pool.checkout("example.com:443").await.unwrap();
//!     let socket = encryptor.enable(&socket, CryptoOptions::new()).await.unwrap();
//!     // ... use the socket, then hand it back:
//!     pool.checkin(&socket).unwrap();
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors and the single-assignment promise primitive
//! - [`reactor`] - Event-source contract and the tokio-backed reactor
//! - [`socket`] - Socket handles, options, pooling, and the connect seam
//! - [`crypto`] - The TLS handshake controller and peer verification

pub mod base;
pub mod crypto;
pub mod reactor;
pub mod socket;
