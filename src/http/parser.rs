//! Incremental HTTP/1.1 request parser.
//!
//! The parser never buffers: the caller hands it every unconsumed byte it
//! holds, and the parser reports how many of them it accepted. A request head
//! is only accepted once it is complete, so a partial head stays in the
//! caller's buffer until more bytes arrive. Body bytes are accepted as soon as
//! they are seen.
//!
//! Progress is reported to a [`ParserHandler`] as a sequence of events
//! (message-begin, url, header field/value pairs, headers-complete, body,
//! message-complete). Any handler callback can pause the parser or reject the
//! message; a paused parser accepts nothing until [`Parser::resume`] is
//! called, and a rejected or failed parser stays that way.

use thiserror::Error;

use super::StatusCode;

/// Upper bound on a buffered request head before it is refused with `431`.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Maximum number of header lines in one request head.
pub const MAX_HEADERS: usize = 64;

/// Protocol errors detected while parsing a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed request head: {0}")]
    Malformed(httparse::Error),

    #[error("unsupported HTTP version")]
    InvalidVersion,

    #[error("request head too large")]
    HeadTooLarge,

    #[error("too many header lines")]
    TooManyHeaders,

    #[error("invalid content-length header")]
    InvalidContentLength,

    #[error("transfer-encoding is not supported")]
    UnsupportedTransferEncoding,

    #[error("protocol upgrade is not supported")]
    Upgrade,

    #[error("connection closed in the middle of a message")]
    InvalidEofState,
}

impl ParseError {
    /// The error response owed to the client, if one can still be sent.
    pub fn response_status(&self) -> Option<StatusCode> {
        match self {
            Self::Malformed(_) | Self::InvalidContentLength => Some(StatusCode::BadRequest),
            Self::InvalidVersion => Some(StatusCode::HttpVersionNotSupported),
            Self::HeadTooLarge | Self::TooManyHeaders => {
                Some(StatusCode::RequestHeaderFieldsTooLarge)
            }
            Self::UnsupportedTransferEncoding | Self::Upgrade => Some(StatusCode::NotImplemented),
            Self::InvalidEofState => None,
        }
    }
}

impl From<httparse::Error> for ParseError {
    fn from(err: httparse::Error) -> Self {
        match err {
            httparse::Error::Version => Self::InvalidVersion,
            httparse::Error::TooManyHeaders => Self::TooManyHeaders,
            other => Self::Malformed(other),
        }
    }
}

/// What a handler wants the parser to do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    /// Stop after this event; bytes after it are left unconsumed. A pause
    /// requested during the head takes effect once the head is consumed.
    Pause,
    /// Stop for good. The handler is expected to have prepared a response.
    Reject,
}

/// Answer to the headers-complete event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadersAction {
    Continue,
    /// The message has no body regardless of `Content-Length`.
    SkipBody,
    Pause,
    Reject,
}

/// Framing information extracted from a complete request head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHead {
    /// Minor version: `0` for HTTP/1.0, `1` for HTTP/1.1.
    pub version: u8,
    pub content_length: u64,
    pub keep_alive: bool,
}

/// Receiver of parser events.
pub trait ParserHandler {
    fn on_message_begin(&mut self) -> Action;
    fn on_url(&mut self, method: &str, target: &str) -> Action;
    fn on_header_field(&mut self, name: &[u8]) -> Action;
    fn on_header_value(&mut self, value: &[u8]) -> Action;
    fn on_headers_complete(&mut self, head: &MessageHead) -> HeadersAction;
    fn on_body(&mut self, chunk: &[u8]) -> Action;
    fn on_message_complete(&mut self) -> Action;
}

/// Parser state after an [`Parser::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ok,
    Paused,
    /// A handler rejected the message.
    Rejected,
    Failed(ParseError),
}

/// Result of one [`Parser::execute`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
    /// Number of leading input bytes the parser accepted.
    pub consumed: usize,
    pub status: Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Head,
    Body { remaining: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Failure {
    Rejected,
    Error(ParseError),
}

/// Incremental HTTP/1.1 request parser.
///
/// # Examples
///
/// ```
/// use relay::http::{Parser, RequestAssembler, Status};
///
/// let mut parser = Parser::new();
/// let mut assembler = RequestAssembler::new();
///
/// let input = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let run = parser.execute(input, &mut assembler);
///
/// assert_eq!(run.consumed, input.len());
/// assert_eq!(run.status, Status::Paused);
/// let request = assembler.take_request().unwrap();
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.query_param("name"), Some("world"));
/// ```
#[derive(Debug)]
pub struct Parser {
    state: State,
    paused: bool,
    failure: Option<Failure>,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Head,
            paused: false,
            failure: None,
        }
    }

    /// Feeds `data` (every unconsumed byte the caller holds) to the parser.
    pub fn execute<H: ParserHandler>(&mut self, data: &[u8], handler: &mut H) -> Execution {
        let mut consumed = 0;

        loop {
            if let Some(status) = self.halted() {
                return Execution { consumed, status };
            }
            let input = &data[consumed..];
            if input.is_empty() {
                return Execution {
                    consumed,
                    status: Status::Ok,
                };
            }

            let step = match self.state {
                State::Head => self.parse_head(input, handler),
                State::Body { remaining } => self.parse_body(input, remaining, handler),
            };
            match step {
                Step::Advanced(n) => consumed += n,
                Step::NeedMore => {
                    return Execution {
                        consumed,
                        status: Status::Ok,
                    };
                }
            }
        }
    }

    /// Clears a pause so the next [`execute`](Self::execute) makes progress.
    /// Has no effect on a rejected or failed parser.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Signals end of input. `unconsumed` is the number of bytes the caller
    /// still holds that the parser has not accepted.
    pub fn finish(&mut self, unconsumed: usize) -> Result<(), ParseError> {
        match &self.failure {
            Some(Failure::Error(err)) => return Err(err.clone()),
            Some(Failure::Rejected) => return Ok(()),
            None => {}
        }
        let mid_message = matches!(self.state, State::Body { .. }) || unconsumed > 0;
        if mid_message {
            self.failure = Some(Failure::Error(ParseError::InvalidEofState));
            return Err(ParseError::InvalidEofState);
        }
        Ok(())
    }

    /// Current parser status without feeding any input.
    pub fn status(&self) -> Status {
        self.halted().unwrap_or(Status::Ok)
    }

    fn halted(&self) -> Option<Status> {
        match &self.failure {
            Some(Failure::Rejected) => Some(Status::Rejected),
            Some(Failure::Error(err)) => Some(Status::Failed(err.clone())),
            None if self.paused => Some(Status::Paused),
            None => None,
        }
    }

    fn parse_head<H: ParserHandler>(&mut self, input: &[u8], handler: &mut H) -> Step {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers);

        let head_len = match req.parse(input) {
            Ok(httparse::Status::Complete(n)) => n,
            Ok(httparse::Status::Partial) if input.len() > MAX_HEAD_SIZE => {
                return self.fail(ParseError::HeadTooLarge);
            }
            Ok(httparse::Status::Partial) => return Step::NeedMore,
            Err(err) => return self.fail(err.into()),
        };
        if head_len > MAX_HEAD_SIZE {
            return self.fail(ParseError::HeadTooLarge);
        }

        let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version)
        else {
            return self.fail(ParseError::Malformed(httparse::Error::Token));
        };
        let head = match message_head(version, req.headers) {
            Ok(head) => head,
            Err(err) => return self.fail(err),
        };

        let mut pause = match emit_head(handler, method, target, req.headers) {
            Action::Continue => false,
            Action::Pause => true,
            Action::Reject => return self.reject(head_len),
        };

        let skip_body = match handler.on_headers_complete(&head) {
            HeadersAction::Continue => false,
            HeadersAction::SkipBody => true,
            HeadersAction::Pause => {
                pause = true;
                false
            }
            HeadersAction::Reject => return self.reject(head_len),
        };

        if skip_body || head.content_length == 0 {
            self.state = State::Head;
            if self.apply(handler.on_message_complete()) {
                pause = true;
            }
        } else {
            self.state = State::Body {
                remaining: head.content_length,
            };
        }

        self.paused |= pause && self.failure.is_none();
        Step::Advanced(head_len)
    }

    fn parse_body<H: ParserHandler>(
        &mut self,
        input: &[u8],
        remaining: u64,
        handler: &mut H,
    ) -> Step {
        let take = usize::try_from(remaining).map_or(input.len(), |r| r.min(input.len()));
        let chunk = &input[..take];
        let left = remaining - take as u64;

        let mut pause = self.apply(handler.on_body(chunk));
        if self.failure.is_some() {
            return Step::Advanced(take);
        }

        if left == 0 {
            self.state = State::Head;
            pause |= self.apply(handler.on_message_complete());
        } else {
            self.state = State::Body { remaining: left };
        }

        self.paused |= pause && self.failure.is_none();
        Step::Advanced(take)
    }

    /// Records a rejection; returns whether the action asked for a pause.
    fn apply(&mut self, action: Action) -> bool {
        match action {
            Action::Continue => false,
            Action::Pause => true,
            Action::Reject => {
                self.failure = Some(Failure::Rejected);
                false
            }
        }
    }

    fn reject(&mut self, head_len: usize) -> Step {
        self.failure = Some(Failure::Rejected);
        Step::Advanced(head_len)
    }

    fn fail(&mut self, err: ParseError) -> Step {
        self.failure = Some(Failure::Error(err));
        Step::Advanced(0)
    }
}

enum Step {
    Advanced(usize),
    NeedMore,
}

/// Emits message-begin, url and the header events, stopping at the first
/// rejection. Any pause request is folded into the result.
fn emit_head<H: ParserHandler>(
    handler: &mut H,
    method: &str,
    target: &str,
    headers: &[httparse::Header<'_>],
) -> Action {
    let mut outcome = Action::Continue;
    let mut fold = |action: Action| {
        match action {
            Action::Reject => outcome = Action::Reject,
            Action::Pause if outcome == Action::Continue => outcome = Action::Pause,
            _ => {}
        }
        outcome == Action::Reject
    };

    if fold(handler.on_message_begin()) || fold(handler.on_url(method, target)) {
        return Action::Reject;
    }
    for header in headers {
        if fold(handler.on_header_field(header.name.as_bytes()))
            || fold(handler.on_header_value(header.value))
        {
            return Action::Reject;
        }
    }
    outcome
}

fn message_head(version: u8, headers: &[httparse::Header<'_>]) -> Result<MessageHead, ParseError> {
    let mut content_length: Option<u64> = None;
    let mut connection_close = false;
    let mut connection_keep_alive = false;
    let mut connection_upgrade = false;
    let mut upgrade = false;

    for header in headers {
        let name = header.name;
        if name.eq_ignore_ascii_case("content-length") {
            let value = std::str::from_utf8(header.value)
                .map_err(|_| ParseError::InvalidContentLength)?
                .trim();
            let parsed: u64 = value.parse().map_err(|_| ParseError::InvalidContentLength)?;
            match content_length {
                Some(previous) if previous != parsed => {
                    return Err(ParseError::InvalidContentLength);
                }
                _ => content_length = Some(parsed),
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            return Err(ParseError::UnsupportedTransferEncoding);
        } else if name.eq_ignore_ascii_case("upgrade") {
            upgrade = true;
        } else if name.eq_ignore_ascii_case("connection") {
            for token in header.value.split(|&b| b == b',') {
                let token = token.trim_ascii();
                connection_close |= token.eq_ignore_ascii_case(b"close");
                connection_keep_alive |= token.eq_ignore_ascii_case(b"keep-alive");
                connection_upgrade |= token.eq_ignore_ascii_case(b"upgrade");
            }
        }
    }

    if upgrade && connection_upgrade {
        return Err(ParseError::Upgrade);
    }

    let keep_alive = match version {
        0 => connection_keep_alive && !connection_close,
        _ => !connection_close,
    };

    Ok(MessageHead {
        version,
        content_length: content_length.unwrap_or(0),
        keep_alive,
    })
}
