//! TCP listener with an optional TLS acceptor.
//!
//! # Example
//!
//! ```ignore
//! use bertlet::transport::Listener;
//! use bertlet::ServerConfig;
//!
//! let listener = Listener::bind(&ServerConfig::default().with_port(0)).await?;
//! let (stream, peer) = listener.accept().await?;
//! ```

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use super::tls::build_acceptor;
use crate::config::ServerConfig;
use crate::error::Result;

/// Bound listening socket.
pub struct Listener {
    inner: TcpListener,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    /// Bind `host:port`, loading TLS material first if configured.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let tls = config.tls.as_ref().map(build_acceptor).transpose()?;
        let inner = TcpListener::bind(config.bind_addr()).await?;
        Ok(Self { inner, tls })
    }

    /// Actual bound address (resolves port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.inner.local_addr()?)
    }

    /// True if accepted sockets must complete a TLS handshake.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Acceptor for the handshake, if TLS is enabled.
    pub fn tls_acceptor(&self) -> Option<TlsAcceptor> {
        self.tls.clone()
    }

    /// Accept one TCP connection.
    pub async fn accept(&self) -> io::Result<(TcpStream, SocketAddr)> {
        let (stream, peer) = self.inner.accept().await?;
        // Replies are small and latency bound.
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!(%peer, "failed to set TCP_NODELAY: {}", e);
        }
        Ok((stream, peer))
    }
}
