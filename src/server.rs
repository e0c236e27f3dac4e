//! Server builder and accept loop.
//!
//! The [`ServerBuilder`] provides a fluent API for registering modules and
//! middleware. The [`Server`] manages the lifecycle:
//! 1. Load TLS material (if configured) and bind `host:port`
//! 2. Accept connections, one task each
//! 3. Stop accepting on Ctrl-C or a caller-supplied signal
//!
//! # Example
//!
//! ```no_run
//! use bertlet::codec::Term;
//! use bertlet::handler::Module;
//! use bertlet::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let math = Module::new("app.math").function("double", |args: Vec<Term>| async move {
//!         let n = args.first().and_then(Term::as_integer).unwrap_or(0);
//!         Ok(Term::from(n * 2))
//!     });
//!
//!     Server::builder().port(2133).register(math).build().run().await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::Instrument;

use crate::config::{ServerConfig, TlsConfig};
use crate::connection::{Connection, ConnectionSettings, Session};
use crate::error::Result;
use crate::handler::{Dispatcher, Middleware, MiddlewareChain, Module, ModuleRegistry};
use crate::transport::Listener;

/// Pause after a failed accept, e.g. when out of file descriptors.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder {
    config: ServerConfig,
    registry: ModuleRegistry,
    middleware: MiddlewareChain,
}

impl ServerBuilder {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            registry: ModuleRegistry::new(),
            middleware: MiddlewareChain::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the listen host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the listen port. 0 picks an ephemeral port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Serve over TLS with the given PEM files.
    pub fn tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.config.tls = Some(TlsConfig::new(cert_path, key_path));
        self
    }

    /// Compress negotiated responses at or above this many encoded bytes.
    ///
    /// Default: 2048
    pub fn gzip_threshold(mut self, bytes: usize) -> Self {
        self.config.gzip_threshold = bytes;
        self
    }

    /// Reject frames larger than this.
    ///
    /// Default: 64 MiB
    pub fn max_frame_size(mut self, bytes: u32) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Drop TLS clients that have not finished the handshake within `timeout`.
    ///
    /// Default: 10 s
    pub fn tls_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_tls_handshake_timeout(timeout);
        self
    }

    /// Abort invocations running longer than `timeout`.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.with_call_timeout(Some(timeout));
        self
    }

    /// Register a module under its default name.
    pub fn register(self, module: Module) -> Self {
        self.registry.register(module);
        self
    }

    /// Register a module under an explicit name.
    pub fn register_as(self, module: Module, name: &str) -> Self {
        self.registry.register_as(module, name);
        self
    }

    /// Append a middleware. Hooks run in the order they are added.
    pub fn middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Build the server. Nothing is bound yet.
    pub fn build(self) -> Server {
        Server::from_parts(self.config, self.registry, self.middleware)
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A configured server.
///
/// Modules may be registered at any time, including while serving; new
/// registrations are visible to the next request on every connection.
pub struct Server {
    config: ServerConfig,
    dispatcher: Dispatcher,
    span: tracing::Span,
}

impl Server {
    /// Create a new server builder.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Server with no modules and no middleware.
    pub fn new(config: ServerConfig) -> Self {
        Self::from_parts(config, ModuleRegistry::new(), MiddlewareChain::new())
    }

    fn from_parts(config: ServerConfig, registry: ModuleRegistry, middleware: MiddlewareChain) -> Self {
        let span = tracing::info_span!("bertlet", host = %config.host, port = config.port);
        let dispatcher = Dispatcher::new(Arc::new(registry), middleware)
            .with_call_timeout(config.call_timeout());
        Self {
            config,
            dispatcher,
            span,
        }
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.dispatcher.registry()
    }

    /// Register a module under its default name. Returns that name.
    pub fn register(&self, module: Module) -> String {
        self.registry().register(module)
    }

    /// Register a module under an explicit name.
    pub fn register_as(&self, module: Module, name: &str) {
        self.registry().register_as(module, name);
    }

    /// Bind the listener without accepting yet.
    pub async fn bind(self) -> Result<BoundServer> {
        self.config.validate()?;
        let listener = Listener::bind(&self.config)
            .instrument(self.span.clone())
            .await?;
        Ok(BoundServer {
            server: self,
            listener,
        })
    }

    /// Bind and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.bind().await?.run().await
    }

    /// Bind and serve until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.bind().await?.run_until(shutdown).await
    }
}

/// A server with a bound listener.
pub struct BoundServer {
    server: Server,
    listener: Listener,
}

impl BoundServer {
    /// Bound address; resolves port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared module registry.
    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        self.server.registry()
    }

    /// Serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("cannot listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Serve until `shutdown` completes.
    ///
    /// Stops accepting; connections already running finish on their own.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let span = self.server.span.clone();
        self.accept_loop(shutdown).instrument(span).await
    }

    async fn accept_loop<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            addr = %self.local_addr()?,
            tls = self.listener.is_tls(),
            "listening"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested, no longer accepting");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let dispatcher = self.server.dispatcher.clone();
        let settings = ConnectionSettings::from(&self.server.config);
        let tls = self.listener.tls_acceptor();
        let handshake_timeout = self.server.config.tls_handshake_timeout();
        let span = tracing::info_span!(parent: &self.server.span, "connection", %peer);

        tokio::spawn(
            async move {
                tracing::debug!("accepted");
                let session = Session::new(settings).with_peer(peer);

                let result = match tls {
                    Some(acceptor) => {
                        match tokio::time::timeout(handshake_timeout, acceptor.accept(stream)).await
                        {
                            Ok(Ok(stream)) => {
                                Connection::new(stream, session, dispatcher).run().await
                            }
                            Ok(Err(e)) => {
                                tracing::warn!("TLS handshake failed: {}", e);
                                return;
                            }
                            Err(_) => {
                                tracing::warn!(
                                    timeout_ms = handshake_timeout.as_millis() as u64,
                                    "TLS handshake timed out"
                                );
                                return;
                            }
                        }
                    }
                    None => Connection::new(stream, session, dispatcher).run().await,
                };

                if let Err(e) = result {
                    tracing::error!("connection error: {}", e);
                }
                tracing::debug!("closed");
            }
            .instrument(span),
        );
    }
}

/// Build a server from `config`, register `modules` and serve until Ctrl-C.
pub async fn serve<I>(modules: I, config: ServerConfig) -> Result<()>
where
    I: IntoIterator<Item = Module>,
{
    let server = Server::new(config);
    for module in modules {
        server.register(module);
    }
    server.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Term;

    #[test]
    fn test_builder_default() {
        let builder = ServerBuilder::default();
        assert_eq!(builder.config, ServerConfig::default());
        assert!(builder.registry.is_empty());
    }

    #[test]
    fn test_builder_method_chaining() {
        let builder = Server::builder()
            .host("0.0.0.0")
            .port(0)
            .gzip_threshold(128)
            .max_frame_size(4096)
            .call_timeout(Duration::from_secs(2))
            .tls_handshake_timeout(Duration::from_millis(300))
            .register(Module::new("app.math"))
            .register_as(Module::new("echo"), "mirror");

        assert_eq!(builder.config.bind_addr(), "0.0.0.0:0");
        assert_eq!(builder.config.gzip_threshold, 128);
        assert_eq!(builder.config.max_frame_size, 4096);
        assert_eq!(builder.config.call_timeout_ms, Some(2000));
        assert_eq!(builder.config.tls_handshake_timeout_ms, 300);
        assert_eq!(builder.registry.names(), vec!["math", "mirror"]);
    }

    #[test]
    fn test_builder_tls() {
        let builder = Server::builder().tls("cert.pem", "key.pem");
        assert_eq!(
            builder.config.tls,
            Some(TlsConfig::new("cert.pem", "key.pem"))
        );
    }

    #[test]
    fn test_register_after_build() {
        let server = Server::new(ServerConfig::default());
        let name = server.register(Module::new("svc.clock").function("now", |_| async {
            Ok(Term::from(0))
        }));
        assert_eq!(name, "clock");
        assert!(server.registry().resolve("clock", "now").is_ok());
    }

    #[tokio::test]
    async fn test_bind_and_stop() {
        let bound = Server::builder().port(0).build().bind().await.unwrap();
        let addr = bound.local_addr().unwrap();
        assert_ne!(addr.port(), 0);

        bound.run_until(async {}).await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let result = Server::builder().port(0).max_frame_size(0).build().bind().await;
        assert!(result.is_err());
    }
}
