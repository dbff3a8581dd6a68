//! Network dialing abstraction.
//!
//! The coordinator reaches peers through the [`Network`] trait so that
//! tests and alternative transports can substitute the dialer. The real
//! implementation is [`TcpNetwork`].

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::constants::CONNECT_TIMEOUT;

/// Capability interface for outbound connections.
#[async_trait]
pub trait Network: Send + Sync {
    /// The local address announced to trackers.
    fn local_addr(&self) -> SocketAddr;

    /// Opens a transport connection to `addr`, blocking the calling task
    /// until connect succeeds, fails, or times out.
    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// Plain TCP dialer with a connect timeout.
pub struct TcpNetwork {
    local: SocketAddr,
    connect_timeout: Duration,
}

impl TcpNetwork {
    pub fn new(local: SocketAddr) -> Self {
        Self {
            local,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

#[async_trait]
impl Network for TcpNetwork {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn dial(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))?
    }
}
