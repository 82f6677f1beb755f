//! Socket handles and connection management.
//!
//! - [`stream`]: the opaque socket handle contract shared by all layers
//! - [`options`]: pool and crypto option mappings
//! - [`tcp`]: the TLS-capable non-blocking TCP socket
//! - [`connect`]: the raw connect seam and its tokio-backed default
//! - [`pool`]: per-authority connection reuse

pub mod connect;
pub mod options;
pub mod pool;
pub mod stream;
pub mod tcp;
