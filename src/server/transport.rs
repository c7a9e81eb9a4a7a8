//! Per-connection byte stream: socket, receive buffer, idle deadline and peer.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_rustls::server::TlsStream;

use super::connection::ConnectionError;

/// Size of one asynchronous read.
pub const READ_BLOCK_SIZE: usize = 32 * 1024;

// Upper bound for one synchronous drain of the socket.
const SYNC_READ_LIMIT: usize = 8 * READ_BLOCK_SIZE;

// Time allowed for a graceful shutdown (TLS close_notify) before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capability set a connection needs from its byte stream.
///
/// Reads and writes come from tokio's `AsyncRead`/`AsyncWrite`; the only
/// addition is an optional non-blocking read used as a fast path before
/// falling back to an asynchronous read.
pub trait Socket: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Reads whatever is already available without waiting.
    ///
    /// Returns `WouldBlock` when nothing is ready and `Unsupported` when the
    /// stream has no synchronous read path.
    fn try_read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        let _ = buf;
        Err(io::ErrorKind::Unsupported.into())
    }
}

impl Socket for TcpStream {
    fn try_read_buf(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        TcpStream::try_read_buf(self, buf)
    }
}

// Mixing synchronous reads with the TLS session state is not supported.
impl Socket for TlsStream<TcpStream> {}

#[cfg(test)]
impl Socket for tokio::io::DuplexStream {}

/// Outcome of a synchronous drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRead {
    /// This many bytes were appended to the receive buffer.
    Data(usize),
    Eof,
    /// Nothing was ready (or the stream has no synchronous read path).
    Pending,
}

/// A stream owned by exactly one connection.
///
/// Holds at most one read and one write in flight, simply because every
/// operation takes `&mut self`.
#[derive(Debug)]
pub struct Transport<S> {
    stream: S,
    peer: SocketAddr,
    buffer: BytesMut,
    idle_timeout: Duration,
    idle_deadline: Option<Instant>,
    open: bool,
}

impl<S: Socket> Transport<S> {
    pub fn new(stream: S, peer: SocketAddr, idle_timeout: Duration) -> Self {
        Self {
            stream,
            peer,
            buffer: BytesMut::with_capacity(READ_BLOCK_SIZE),
            idle_timeout,
            idle_deadline: None,
            open: true,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Bytes received but not yet consumed by the parser.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Drops the first `n` buffered bytes.
    pub fn consume(&mut self, n: usize) {
        self.buffer.advance(n);
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Starts (or restarts) the idle timer. A read that waits longer than the
    /// idle timeout without receiving a byte fails with
    /// [`ConnectionError::IdleTimeout`].
    pub fn arm_idle_timer(&mut self) {
        self.idle_deadline = Some(Instant::now() + self.idle_timeout);
    }

    pub fn cancel_idle_timer(&mut self) {
        self.idle_deadline = None;
    }

    // Incoming bytes push an armed deadline forward, so only silence expires it.
    fn extend_idle_timer(&mut self) {
        if self.idle_deadline.is_some() {
            self.arm_idle_timer();
        }
    }

    /// Appends everything the socket can deliver right now, without waiting.
    pub fn read_available(&mut self) -> Result<SyncRead, ConnectionError> {
        let mut total = 0;

        while total < SYNC_READ_LIMIT {
            self.buffer.reserve(READ_BLOCK_SIZE);
            match self.stream.try_read_buf(&mut self.buffer) {
                Ok(0) if total == 0 => return Ok(SyncRead::Eof),
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::Unsupported
                    ) =>
                {
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        if total == 0 {
            return Ok(SyncRead::Pending);
        }
        self.extend_idle_timer();
        Ok(SyncRead::Data(total))
    }

    /// Waits for one block of data. Returns `0` at end of stream.
    pub async fn read_some(&mut self) -> Result<usize, ConnectionError> {
        self.buffer.reserve(READ_BLOCK_SIZE);
        let read = self.stream.read_buf(&mut self.buffer);

        let n = match self.idle_deadline {
            Some(deadline) => timeout_at(deadline, read)
                .await
                .map_err(|_| ConnectionError::IdleTimeout)??,
            None => read.await?,
        };
        if n > 0 {
            self.extend_idle_timer();
        }
        Ok(n)
    }

    /// Writes the header block and optional body in one vectored write and
    /// flushes.
    pub async fn write_response(
        &mut self,
        head: Bytes,
        body: Option<Bytes>,
    ) -> Result<(), ConnectionError> {
        match body {
            Some(body) if !body.is_empty() => {
                self.stream.write_all_buf(&mut head.chain(body)).await?;
            }
            _ => {
                let mut head = head;
                self.stream.write_all_buf(&mut head).await?;
            }
        }
        self.stream.flush().await?;
        Ok(())
    }

    /// Best-effort shutdown. Errors are ignored; calling it again is a no-op.
    pub async fn shutdown(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.idle_deadline = None;
        let _ = timeout(SHUTDOWN_GRACE, self.stream.shutdown()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn peer() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    #[tokio::test]
    async fn reads_into_the_buffer_and_consumes() {
        let (client, server) = duplex(1024);
        let mut transport = Transport::new(server, peer(), Duration::from_secs(60));
        let mut client = client;

        client.write_all(b"hello world").await.unwrap();
        let n = transport.read_some().await.unwrap();
        assert_eq!(n, 11);
        assert_eq!(transport.buffered(), b"hello world");

        transport.consume(6);
        assert_eq!(transport.buffered(), b"world");
    }

    #[tokio::test]
    async fn duplex_has_no_sync_read_path() {
        let (_client, server) = duplex(64);
        let mut transport = Transport::new(server, peer(), Duration::from_secs(60));
        assert_eq!(transport.read_available().unwrap(), SyncRead::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_fails_pending_read() {
        let (_client, server) = duplex(64);
        let mut transport = Transport::new(server, peer(), Duration::from_secs(60));

        transport.arm_idle_timer();
        let err = transport.read_some().await.unwrap_err();
        assert!(matches!(err, ConnectionError::IdleTimeout));
    }

    #[tokio::test]
    async fn write_then_shutdown_twice() {
        let (mut client, server) = duplex(1024);
        let mut transport = Transport::new(server, peer(), Duration::from_secs(60));

        transport
            .write_response(Bytes::from_static(b"head|"), Some(Bytes::from_static(b"body")))
            .await
            .unwrap();
        transport.shutdown().await;
        transport.shutdown().await;
        assert!(!transport.is_open());

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"head|body");
    }

    #[tokio::test]
    async fn sync_read_drains_tcp_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).await.unwrap();
        let (server, peer) = listener.accept().await.unwrap();
        let mut transport = Transport::new(server, peer, Duration::from_secs(60));

        assert_eq!(transport.read_available().unwrap(), SyncRead::Pending);

        client.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        // wait until the bytes are readable, then drain synchronously
        transport.stream.readable().await.unwrap();
        assert_eq!(transport.read_available().unwrap(), SyncRead::Data(18));

        drop(client);
        transport.stream.readable().await.unwrap();
        assert_eq!(transport.read_available().unwrap(), SyncRead::Eof);
    }
}
