//! HTTP/1.1 protocol engine for one connection.
//!
//! A [`Connection`] owns its [`Transport`] and the parser state. It turns the
//! byte stream into requests one at a time: a finished request pauses the
//! parser, the request is dispatched and its response written, and only then
//! is the parser resumed so that pipelined bytes already in the buffer are
//! looked at.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, trace, warn};

use super::ServerContext;
use super::transport::{Socket, SyncRead, Transport};
use crate::http::{Method, ParseError, Parser, Request, RequestAssembler, Response, Status};

/// Interim answer to `Expect: 100-continue`.
const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

/// Reasons a connection ends other than an orderly close.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Parse(#[from] ParseError),

    #[error("connection idle for too long")]
    IdleTimeout,
}

/// One client connection.
pub struct Connection<S> {
    transport: Transport<S>,
    parser: Parser,
    assembler: RequestAssembler,
    context: Arc<ServerContext>,
}

impl<S: Socket> Connection<S> {
    pub fn new(transport: Transport<S>, context: Arc<ServerContext>) -> Self {
        Self {
            transport,
            parser: Parser::new(),
            assembler: RequestAssembler::new(),
            context,
        }
    }

    /// Serves the connection until it ends, then closes it.
    pub async fn start(mut self) {
        let peer = self.transport.peer_addr();
        debug!(peer = %peer, "connection opened");

        self.transport.arm_idle_timer();
        match self.serve().await {
            Ok(()) => debug!(peer = %peer, "connection closed"),
            Err(ConnectionError::IdleTimeout) => {
                debug!(peer = %peer, "closing idle connection");
            }
            Err(e) => debug!(peer = %peer, error = %e, "connection closed with error"),
        }
        self.close().await;
    }

    /// Cancels the idle timer and shuts the transport down. Idempotent.
    pub async fn close(&mut self) {
        self.transport.cancel_idle_timer();
        self.transport.shutdown().await;
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        loop {
            let run = self
                .parser
                .execute(self.transport.buffered(), &mut self.assembler);
            self.transport.consume(run.consumed);

            match run.status {
                Status::Ok => {}
                Status::Paused => {
                    if self.assembler.take_continue() {
                        trace!(peer = %self.transport.peer_addr(), "sending 100 Continue");
                        self.transport
                            .write_response(Bytes::from_static(CONTINUE), None)
                            .await?;
                    }
                    let Some(request) = self.assembler.take_request() else {
                        // paused ahead of the body
                        self.parser.resume();
                        continue;
                    };
                    let keep_alive = self.assembler.keep_alive();
                    self.process(request).await?;
                    if !keep_alive {
                        return Ok(());
                    }
                    self.parser.resume();
                    self.transport.arm_idle_timer();
                    continue;
                }
                Status::Rejected => {
                    if let Some(response) = self.assembler.take_rejection() {
                        debug!(
                            peer = %self.transport.peer_addr(),
                            status = response.status().as_u16(),
                            "request rejected"
                        );
                        self.send(response, false).await?;
                    }
                    return Ok(());
                }
                Status::Failed(err) => {
                    warn!(peer = %self.transport.peer_addr(), error = %err, "invalid request");
                    if let Some(status) = err.response_status() {
                        self.send(Response::new(status), false).await?;
                    }
                    return Err(err.into());
                }
            }

            match self.transport.read_available()? {
                SyncRead::Data(_) => continue,
                SyncRead::Eof => return self.finish(),
                SyncRead::Pending => {}
            }
            if self.transport.read_some().await? == 0 {
                return self.finish();
            }
        }
    }

    fn finish(&mut self) -> Result<(), ConnectionError> {
        trace!(peer = %self.transport.peer_addr(), "peer closed the stream");
        self.parser.finish(self.transport.buffered().len())?;
        Ok(())
    }

    /// Answers one complete request: preflight or dispatch, CORS headers,
    /// then the write.
    async fn process(&mut self, request: Request) -> Result<(), ConnectionError> {
        self.transport.cancel_idle_timer();

        let method = request.method();
        let origin = self.assembler.origin().map(str::to_owned);
        let path = request.path().to_owned();
        trace!(peer = %self.transport.peer_addr(), method = %method, path = %path, "request begin");

        let mut response = match method {
            Method::Options => self.context.cors.preflight(origin.as_deref(), &request),
            _ => self.context.dispatcher.execute(request).await,
        };

        let status = response.status();
        if status.is_error() {
            debug!(peer = %self.transport.peer_addr(), path = %path, status = status.as_u16(), "request end");
        } else {
            trace!(peer = %self.transport.peer_addr(), path = %path, status = status.as_u16(), "request end");
        }

        if let Some(origin) = origin.as_deref() {
            debug!(peer = %self.transport.peer_addr(), origin, "handling CORS response");
            self.context.cors.apply(origin, &mut response);
        }

        self.send(response, method == Method::Head).await
    }

    async fn send(&mut self, response: Response, omit_body: bool) -> Result<(), ConnectionError> {
        let wire = response.into_wire();
        let body = (!omit_body).then_some(wire.body);
        self.transport.write_response(wire.head, body).await
    }
}
