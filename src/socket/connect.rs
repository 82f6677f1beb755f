//! The raw connect seam.
//!
//! The pool never dials sockets itself; it hands an authority and the merged
//! request options to a [`Connector`] and installs whatever comes back.
//! [`TcpConnector`] is the tokio-backed default: resolve, then try addresses
//! in order under the request's connect timeout, binding the requested local
//! address first.

use crate::base::neterror::NetError;
use crate::socket::options::PoolOptions;
use crate::socket::stream::SharedSocket;
use crate::socket::tcp::TcpSocket;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use url::Url;

/// Completion callback for a connect attempt. Implementations may invoke it
/// from any thread but must invoke it exactly once.
pub type ConnectCallback = Box<dyn FnOnce(Result<SharedSocket, NetError>) + Send + 'static>;

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, authority: &str, options: &PoolOptions, on_done: ConnectCallback);
}

/// Default TCP connector. `unix://` authorities are rejected; plug a
/// unix-capable [`Connector`] into the pool for those.
pub struct TcpConnector {
    handle: tokio::runtime::Handle,
}

impl TcpConnector {
    /// Bind to the current runtime. Panics outside a tokio context.
    pub fn new() -> Self {
        Self::with_handle(tokio::runtime::Handle::current())
    }

    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        TcpConnector { handle }
    }

    async fn establish(authority: String, options: PoolOptions) -> Result<SharedSocket, NetError> {
        if authority.starts_with("unix://") {
            return Err(NetError::ConnectError(
                "unix domain authorities need a unix-capable connector".to_string(),
            ));
        }
        let parsed = Url::parse(&format!("tcp://{authority}"))
            .map_err(|error| NetError::ConnectError(error.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| NetError::ConnectError(format!("authority {authority} has no host")))?
            .to_string();
        let port = parsed
            .port()
            .ok_or_else(|| NetError::ConnectError(format!("authority {authority} has no port")))?;

        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|error| NetError::ConnectError(error.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(NetError::ConnectError(format!("{host} did not resolve")));
        }

        let mut last = NetError::ConnectError(format!("no address of {host} was reachable"));
        for addr in addrs {
            match tokio::time::timeout(
                options.connect_timeout,
                Self::connect_addr(addr, &options.bindto),
            )
            .await
            {
                Ok(Ok(stream)) => {
                    let socket = TcpSocket::from_std(stream, host.clone(), options.bindto.clone())
                        .map_err(|error| NetError::ConnectError(error.to_string()))?;
                    tracing::debug!(authority = %authority, addr = %addr, "connected");
                    return Ok(Arc::new(socket));
                }
                Ok(Err(error)) => last = NetError::ConnectError(error.to_string()),
                Err(_) => last = NetError::ConnectError(format!("connect to {addr} timed out")),
            }
        }
        Err(last)
    }

    async fn connect_addr(addr: SocketAddr, bindto: &str) -> std::io::Result<std::net::TcpStream> {
        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        if !bindto.is_empty() {
            socket.bind(parse_bindto(bindto)?)?;
        }
        let stream = socket.connect(addr).await?;
        stream.into_std()
    }
}

impl Connector for TcpConnector {
    fn connect(&self, authority: &str, options: &PoolOptions, on_done: ConnectCallback) {
        let authority = authority.to_string();
        let options = options.clone();
        self.handle.spawn(async move {
            on_done(Self::establish(authority, options).await);
        });
    }
}

/// Accepts `ip:port` or a bare `ip` (bound to an ephemeral port).
fn parse_bindto(bindto: &str) -> std::io::Result<SocketAddr> {
    if let Ok(addr) = bindto.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = bindto.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    Err(std::io::Error::new(
        std::io::ErrorKind::InvalidInput,
        format!("invalid bindto address {bindto}"),
    ))
}
