//! Parser event handler that builds [`Request`] values.
//!
//! All per-message scratch state lives here so the state machine can be driven
//! and tested without any I/O: the header name and value under construction,
//! the captured `Origin`, the keep-alive flag and the request in progress.

use tracing::trace;

use super::parser::{Action, HeadersAction, MessageHead, ParserHandler};
use super::{Method, Request, Response, StatusCode};

/// Largest declared body accepted; anything above is answered with `413`.
pub const MAX_BODY_SIZE: u64 = 1024 * 1024 * 1024;

/// Cap on the body buffer reserved up front from `Content-Length`.
pub const MAX_BODY_RESERVATION: usize = 64 * 1024 * 1024;

/// Builds one [`Request`] at a time from parser events.
///
/// A finished request pauses the parser; it is collected with
/// [`take_request`](Self::take_request) and the parser is resumed only once
/// the response has been written.
#[derive(Debug, Default)]
pub struct RequestAssembler {
    request: Option<Request>,
    ready: bool,
    header_field: String,
    header_value: String,
    last_was_value: bool,
    origin: Option<String>,
    keep_alive: bool,
    continue_pending: bool,
    rejection: Option<Response>,
}

impl RequestAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hands out the request once message-complete has been seen.
    pub fn take_request(&mut self) -> Option<Request> {
        if !self.ready {
            return None;
        }
        self.ready = false;
        self.request.take()
    }

    /// The error response prepared when the current message was rejected.
    pub fn take_rejection(&mut self) -> Option<Response> {
        self.rejection.take()
    }

    /// Returns `true` once if the client asked for `100 Continue` and the body
    /// has not been read yet.
    pub fn take_continue(&mut self) -> bool {
        std::mem::take(&mut self.continue_pending)
    }

    /// Whether the current message allows the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// The `Origin` header of the current message, if any.
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    fn reject(&mut self, status: StatusCode) -> Action {
        self.rejection = Some(Response::new(status));
        Action::Reject
    }

    fn commit_header(&mut self) {
        if self.header_field.is_empty() {
            return;
        }
        let name = std::mem::take(&mut self.header_field).to_ascii_lowercase();
        let value = std::mem::take(&mut self.header_value);
        if name == "origin" {
            self.origin = Some(value.clone());
        }
        if let Some(request) = self.request.as_mut() {
            request.headers_mut().insert(name, value);
        }
    }
}

impl ParserHandler for RequestAssembler {
    fn on_message_begin(&mut self) -> Action {
        self.request = Some(Request::default());
        self.ready = false;
        self.header_field.clear();
        self.header_value.clear();
        self.last_was_value = false;
        self.origin = None;
        self.keep_alive = false;
        self.continue_pending = false;
        self.rejection = None;
        Action::Continue
    }

    fn on_url(&mut self, method: &str, target: &str) -> Action {
        let parsed = Method::from_token(method);
        if parsed == Method::Illegal {
            trace!(method, "unsupported method");
            return self.reject(StatusCode::MethodNotAllowed);
        }
        if let Some(request) = self.request.as_mut() {
            request.set_method(parsed);
            request.set_url(target);
        }
        Action::Continue
    }

    fn on_header_field(&mut self, name: &[u8]) -> Action {
        if self.last_was_value {
            self.commit_header();
            self.last_was_value = false;
        }
        self.header_field.push_str(&String::from_utf8_lossy(name));
        Action::Continue
    }

    fn on_header_value(&mut self, value: &[u8]) -> Action {
        if !self.last_was_value {
            self.header_value.clear();
        }
        self.header_value.push_str(&String::from_utf8_lossy(value));
        self.last_was_value = true;
        Action::Continue
    }

    fn on_headers_complete(&mut self, head: &MessageHead) -> HeadersAction {
        self.commit_header();
        self.last_was_value = false;

        if head.version > 1 {
            self.reject(StatusCode::HttpVersionNotSupported);
            return HeadersAction::Reject;
        }
        if head.content_length > MAX_BODY_SIZE {
            self.reject(StatusCode::PayloadTooLarge);
            return HeadersAction::Reject;
        }
        self.keep_alive = head.keep_alive;

        let Some(request) = self.request.as_mut() else {
            return HeadersAction::Continue;
        };
        request.set_version(head.version);

        // Answered whether or not a body follows; with no body the pause
        // lands on message-complete instead.
        self.continue_pending = request
            .header("expect")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("100-continue"));

        if request.method() == Method::Head {
            return HeadersAction::SkipBody;
        }

        let reserve = usize::try_from(head.content_length)
            .map_or(MAX_BODY_RESERVATION, |len| len.min(MAX_BODY_RESERVATION));
        request.body_mut().reserve(reserve);

        if self.continue_pending {
            HeadersAction::Pause
        } else {
            HeadersAction::Continue
        }
    }

    fn on_body(&mut self, chunk: &[u8]) -> Action {
        if let Some(request) = self.request.as_mut() {
            request.body_mut().extend_from_slice(chunk);
        }
        Action::Continue
    }

    fn on_message_complete(&mut self) -> Action {
        self.ready = true;
        Action::Pause
    }
}
