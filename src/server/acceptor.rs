//! Listening socket and accept loop.
//!
//! An [`Acceptor`] owns one listener. Every accepted stream is handed to its
//! own task, which runs the [`Handshake`] (a no-op for plain TCP, a TLS
//! handshake bounded by a timeout otherwise) and then serves the resulting
//! [`Connection`]. Accept and handshake are pipelined: the loop goes back to
//! accepting as soon as the stream has been handed off.

use std::future::ready;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::{TcpSocket, TcpStream, lookup_host};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info, warn};

use super::connection::Connection;
use super::transport::{Socket, Transport};
use super::{ServerContext, ServerError};

/// Pending-connection queue length passed to `listen`.
pub const LISTEN_BACKLOG: u32 = 8;

/// Accept failures logged individually before going quiet.
pub const MAX_LOGGED_ACCEPT_FAILURES: u32 = 128;

/// Turns a freshly accepted TCP stream into the socket a connection runs on.
pub trait Handshake: Send + Sync + 'static {
    type Socket: Socket;

    /// Scheme name used in log lines.
    const SCHEME: &'static str;

    fn handshake(&self, stream: TcpStream) -> impl Future<Output = io::Result<Self::Socket>> + Send;
}

/// Plain TCP: the stream is used as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

impl Handshake for Plain {
    type Socket = TcpStream;
    const SCHEME: &'static str = "http";

    fn handshake(&self, stream: TcpStream) -> impl Future<Output = io::Result<TcpStream>> + Send {
        ready(Ok(stream))
    }
}

/// TLS over TCP.
#[derive(Clone)]
pub struct Tls {
    acceptor: TlsAcceptor,
}

impl Tls {
    pub fn new(config: Arc<rustls::ServerConfig>) -> Self {
        Self {
            acceptor: TlsAcceptor::from(config),
        }
    }
}

impl Handshake for Tls {
    type Socket = TlsStream<TcpStream>;
    const SCHEME: &'static str = "https";

    fn handshake(
        &self,
        stream: TcpStream,
    ) -> impl Future<Output = io::Result<TlsStream<TcpStream>>> + Send {
        let acceptor = self.acceptor.clone();
        async move {
            stream.set_nodelay(true)?;
            acceptor.accept(stream).await
        }
    }
}

/// Owns a listening socket and its accept loop.
///
/// Lifecycle is `closed → open → accepting`. [`close`](Self::close) stops the
/// loop and cancels handshakes still in progress; connections that are
/// already established keep running. Dropping an open acceptor closes it.
pub struct Acceptor<H: Handshake> {
    host: String,
    port: u16,
    handshake: Arc<H>,
    context: Arc<ServerContext>,
    shutdown: watch::Sender<bool>,
    local_addr: Option<SocketAddr>,
    task: Option<JoinHandle<()>>,
}

impl<H: Handshake> Acceptor<H> {
    pub fn new(host: impl Into<String>, port: u16, handshake: H, context: Arc<ServerContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            host: host.into(),
            port,
            handshake: Arc::new(handshake),
            context,
            shutdown,
            local_addr: None,
            task: None,
        }
    }

    /// Resolves the configured address, binds with address reuse, listens and
    /// starts the accept loop. Returns the bound address; opening an already
    /// open acceptor returns the existing address.
    pub async fn open(&mut self) -> Result<SocketAddr, ServerError> {
        if let (Some(addr), Some(_)) = (self.local_addr, &self.task) {
            return Ok(addr);
        }

        let addr = resolve(&self.host, self.port).await?;
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()
        } else {
            TcpSocket::new_v6()
        }
        .map_err(|source| ServerError::Listen { addr, source })?;
        socket
            .set_reuseaddr(true)
            .map_err(|source| ServerError::Listen { addr, source })?;
        socket
            .bind(addr)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let listener = socket
            .listen(LISTEN_BACKLOG)
            .map_err(|source| ServerError::Listen { addr, source })?;
        let local_addr = listener.local_addr()?;

        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();
        let handshake = Arc::clone(&self.handshake);
        let context = Arc::clone(&self.context);
        self.task = Some(tokio::spawn(async move {
            accept_loop(listener, handshake, context, shutdown).await;
        }));
        self.local_addr = Some(local_addr);

        info!(address = %local_addr, scheme = H::SCHEME, "listening");
        Ok(local_addr)
    }

    /// Address the listener is bound to, once open.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    /// Stops accepting and waits for the accept loop to exit. Idempotent.
    pub async fn close(&mut self) {
        self.shutdown.send_replace(true);
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(e) = task.await {
            warn!(error = %e, "accept loop ended abnormally");
        }
        if let Some(addr) = self.local_addr.take() {
            info!(address = %addr, scheme = H::SCHEME, "listener closed");
        }
    }
}

impl<H: Handshake> Drop for Acceptor<H> {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, ServerError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ServerError::Resolve {
            host: host.to_owned(),
            source,
        })?
        .collect();

    addrs
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
        .ok_or_else(|| ServerError::NoAddress(host.to_owned()))
}

async fn accept_loop<H: Handshake>(
    listener: tokio::net::TcpListener,
    handshake: Arc<H>,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut failures = AcceptFailures::default();

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }

        let accepted = tokio::select! {
            _ = shutdown.changed() => continue,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(peer = %peer, scheme = H::SCHEME, "connection accepted");
                spawn_connection(stream, peer, &handshake, &context, shutdown.clone());
            }
            Err(e) => failures.record(&e),
        }
    }
    debug!(scheme = H::SCHEME, "accept loop stopped");
}

fn spawn_connection<H: Handshake>(
    stream: TcpStream,
    peer: SocketAddr,
    handshake: &Arc<H>,
    context: &Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
) {
    let handshake = Arc::clone(handshake);
    let context = Arc::clone(context);

    tokio::spawn(async move {
        let attempt = timeout(context.handshake_timeout, handshake.handshake(stream));
        let cancelled = async {
            let _ = shutdown.wait_for(|closed| *closed).await;
        };
        let socket = tokio::select! {
            () = cancelled => {
                debug!(peer = %peer, "handshake cancelled");
                return;
            }
            result = attempt => match result {
                Ok(Ok(socket)) => socket,
                Ok(Err(e)) => {
                    debug!(peer = %peer, error = %e, "handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(peer = %peer, "handshake timed out");
                    return;
                }
            },
        };

        let transport = Transport::new(socket, peer, context.idle_timeout);
        Connection::new(transport, context).start().await;
    });
}

/// Counts accept failures and logs the first
/// [`MAX_LOGGED_ACCEPT_FAILURES`] of them.
#[derive(Debug, Default)]
struct AcceptFailures {
    count: u32,
}

impl AcceptFailures {
    fn record(&mut self, err: &io::Error) {
        if self.count >= MAX_LOGGED_ACCEPT_FAILURES {
            return;
        }
        self.count += 1;
        warn!(error = %err, failures = self.count, "accept failed");
        if self.count == MAX_LOGGED_ACCEPT_FAILURES {
            warn!("too many accept failures, stopping to report");
        }
    }
}
