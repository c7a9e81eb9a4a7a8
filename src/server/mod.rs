//! Async HTTP/1.1 and HTTPS server on Tokio.
//!
//! [`Server`] is the composition root: it turns a [`ServerConfig`] and a
//! [`Dispatcher`] into one plain [`Acceptor`] and, when TLS is configured, a
//! second one terminating TLS. Each accepted stream becomes a
//! [`Connection`](connection::Connection) running on its own task.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::config::ServerConfig;
use crate::router::Dispatcher;
use crate::security::CorsPolicy;

pub mod acceptor;
pub mod connection;
pub mod tls;
pub mod transport;

pub use acceptor::{Acceptor, Handshake, Plain, Tls};
pub use connection::{Connection, ConnectionError};
pub use transport::{Socket, Transport};

/// Startup errors. Any of these means the server cannot run.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} did not resolve to any address")]
    NoAddress(String),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read TLS material from {path}: {source}")]
    TlsMaterial {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    #[error("TLS is not configured")]
    TlsNotConfigured,
}

/// State shared by every connection of a server.
pub struct ServerContext {
    pub dispatcher: Arc<dyn Dispatcher>,
    pub cors: CorsPolicy,
    pub idle_timeout: Duration,
    pub handshake_timeout: Duration,
}

impl ServerContext {
    pub fn new(config: &ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            dispatcher,
            cors: CorsPolicy::new(config.cors.allowed_origins.iter().cloned()),
            idle_timeout: config.timeouts.idle(),
            handshake_timeout: config.timeouts.handshake(),
        }
    }
}

/// An HTTP/1.1 server with optional HTTPS.
///
/// # Examples
///
/// ```rust,no_run
/// use relay::{Response, Router, Server, ServerConfig, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut router = Router::new();
///     router.add_handler("/", |_req| async {
///         Response::new(StatusCode::Ok).body("Hello World")
///     });
///
///     let config = ServerConfig { port: 8080, ..ServerConfig::default() };
///     let server = Server::new(config, router);
///     server
///         .listen_and_serve(async {
///             let _ = tokio::signal::ctrl_c().await;
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    config: ServerConfig,
    context: Arc<ServerContext>,
    tls_config: Mutex<Option<Arc<rustls::ServerConfig>>>,
}

impl Server {
    pub fn new(config: ServerConfig, dispatcher: impl Dispatcher) -> Self {
        let context = Arc::new(ServerContext::new(&config, Arc::new(dispatcher)));
        Self {
            config,
            context,
            tls_config: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    /// The TLS server configuration, loaded from the configured PEM files on
    /// first use and shared afterwards.
    pub fn tls_config(&self) -> Result<Arc<rustls::ServerConfig>, ServerError> {
        let mut cached = self.tls_config.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(config) = cached.as_ref() {
            return Ok(Arc::clone(config));
        }

        let tls = self.config.tls.as_ref().ok_or(ServerError::TlsNotConfigured)?;
        let config = Arc::new(tls::load_server_config(&tls.cert_path, &tls.key_path)?);
        info!(cert = %tls.cert_path.display(), "loaded TLS certificate");
        *cached = Some(Arc::clone(&config));
        Ok(config)
    }

    /// A plain HTTP acceptor for the configured host and port. Not yet open.
    pub fn plain_acceptor(&self) -> Acceptor<Plain> {
        Acceptor::new(
            self.config.host.clone(),
            self.config.port,
            Plain,
            self.context(),
        )
    }

    /// An HTTPS acceptor, or `None` when TLS is not configured. Not yet open.
    pub fn tls_acceptor(&self) -> Result<Option<Acceptor<Tls>>, ServerError> {
        let Some(tls) = &self.config.tls else {
            return Ok(None);
        };
        let handshake = Tls::new(self.tls_config()?);
        Ok(Some(Acceptor::new(
            self.config.host.clone(),
            tls.port,
            handshake,
            self.context(),
        )))
    }

    /// Opens every configured listener, serves until `shutdown` resolves,
    /// then closes the listeners.
    pub async fn listen_and_serve<F>(&self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()>,
    {
        let mut plain = self.plain_acceptor();
        plain.open().await?;

        let mut secure = self.tls_acceptor()?;
        if let Some(acceptor) = secure.as_mut() {
            acceptor.open().await?;
        }

        shutdown.await;
        info!("shutting down listeners");

        plain.close().await;
        if let Some(acceptor) = secure.as_mut() {
            acceptor.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TlsConfig;
    use crate::router::Router;

    fn fixture(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name)
    }

    #[test]
    fn context_follows_config() {
        let mut config = ServerConfig::default();
        config.cors.allowed_origins = vec!["https://a.example/".into()];
        config.timeouts.idle_secs = 7;

        let server = Server::new(config, Router::new());
        let ctx = server.context();

        assert_eq!(ctx.idle_timeout, Duration::from_secs(7));
        assert_eq!(ctx.handshake_timeout, Duration::from_secs(60));
        assert!(ctx.cors.allows_credentials("https://a.example"));
    }

    #[test]
    fn tls_config_requires_tls_section() {
        let server = Server::new(ServerConfig::default(), Router::new());
        assert!(matches!(server.tls_config(), Err(ServerError::TlsNotConfigured)));
        assert!(server.tls_acceptor().unwrap().is_none());
    }

    #[test]
    fn tls_config_is_built_once() {
        let config = ServerConfig {
            tls: Some(TlsConfig {
                port: 0,
                cert_path: fixture("server.crt"),
                key_path: fixture("server.key"),
            }),
            ..ServerConfig::default()
        };
        let server = Server::new(config, Router::new());

        let first = server.tls_config().unwrap();
        let second = server.tls_config().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn missing_tls_material_is_a_startup_error() {
        let config = ServerConfig {
            tls: Some(TlsConfig {
                port: 0,
                cert_path: "/missing/server.crt".into(),
                key_path: "/missing/server.key".into(),
            }),
            ..ServerConfig::default()
        };
        let server = Server::new(config, Router::new());
        assert!(matches!(server.tls_acceptor(), Err(ServerError::TlsMaterial { .. })));
    }

    #[tokio::test]
    async fn listen_and_serve_returns_after_shutdown() {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = Server::new(config, Router::new());
        server.listen_and_serve(async {}).await.unwrap();
    }
}
