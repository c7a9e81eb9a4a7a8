//! HTTP/1.1 response value object and wire serializer.
//!
//! The serializer owns the framing headers: `Content-Length`, `Connection`
//! and `Keep-Alive` are always computed here, so values a handler put into
//! the header map under those names are dropped.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// `Content-Type` sent when the handler did not choose one.
pub const DEFAULT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Seconds advertised in the `Keep-Alive` header.
pub const KEEP_ALIVE_TIMEOUT_SECS: u64 = 60;

// Response headers the serializer writes itself.
const FRAMING_HEADERS: [&str; 5] = [
    "content-length",
    "connection",
    "transfer-encoding",
    "keep-alive",
    "content-type",
];

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use relay::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("x-request-id", "abc-123")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("X-Request-Id: abc-123\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    cookies: Vec<String>,
    body: Vec<u8>,
}

/// A serialized response: the header block and the body, kept apart so both
/// can go out in one vectored write.
#[derive(Debug, Clone)]
pub struct WireResponse {
    pub head: Bytes,
    pub body: Bytes,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            cookies: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Sets a response header, replacing an earlier value with the same name.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header in-place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets a header in-place unless the response already carries it.
    pub fn set_header_if_absent(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert_if_absent(name, value);
    }

    /// Appends a cookie; each one becomes its own `Set-Cookie` line.
    #[must_use]
    pub fn cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the cookies in the order they were added.
    pub fn cookies(&self) -> &[String] {
        &self.cookies
    }

    /// Returns the body bytes.
    pub fn payload(&self) -> &[u8] {
        &self.body
    }

    /// Serializes the status line and header block, including the blank line
    /// that terminates it.
    ///
    /// Emits, in order: handler headers with Title-Case names (framing
    /// headers skipped), `Content-Type`, `Content-Length`, one `Set-Cookie`
    /// per cookie, `Connection: Keep-Alive` and `Keep-Alive`.
    ///
    /// `Content-Type` is `text/plain; charset=utf-8` only when the handler set
    /// none. A handler value replaces it rather than being sent next to a
    /// second, fixed `Content-Type` line.
    pub fn encode_head(&self) -> BytesMut {
        let estimated_size = 220 + self.headers.len() * 64 + self.cookies.len() * 64;
        let mut buf = BytesMut::with_capacity(estimated_size);

        buf.put_slice(b"HTTP/1.1 ");
        buf.put_slice(self.status.to_string().as_bytes());
        buf.put_slice(b"\r\n");

        for (name, value) in self.headers.iter() {
            if FRAMING_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
                continue;
            }
            put_title_case(&mut buf, name);
            buf.put_slice(b": ");
            buf.put_slice(value.as_bytes());
            buf.put_slice(b"\r\n");
        }

        let content_type = self
            .headers
            .get("content-type")
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        buf.put_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        buf.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());

        for cookie in &self.cookies {
            buf.put_slice(b"Set-Cookie: ");
            buf.put_slice(cookie.as_bytes());
            buf.put_slice(b"\r\n");
        }

        buf.put_slice(b"Connection: Keep-Alive\r\n");
        buf.put_slice(format!("Keep-Alive: timeout={KEEP_ALIVE_TIMEOUT_SECS}\r\n\r\n").as_bytes());
        buf
    }

    /// Splits the response into its serialized header block and body.
    pub fn into_wire(self) -> WireResponse {
        WireResponse {
            head: self.encode_head().freeze(),
            body: Bytes::from(self.body),
        }
    }

    /// Serializes the whole response, head and body, into one buffer.
    pub fn into_bytes(self) -> BytesMut {
        let mut buf = self.encode_head();
        buf.put_slice(&self.body);
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

/// Writes `name` with its first letter and every letter after a `-`
/// upper-cased; everything else is copied unchanged.
fn put_title_case(buf: &mut BytesMut, name: &str) {
    let mut upper = true;
    for &b in name.as_bytes() {
        if upper {
            buf.put_u8(b.to_ascii_uppercase());
        } else {
            buf.put_u8(b);
        }
        upper = b == b'-';
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_string(bytes: BytesMut) -> String {
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn title_case(name: &str) -> String {
        let mut buf = BytesMut::new();
        put_title_case(&mut buf, name);
        to_string(buf)
    }

    #[test]
    fn simple_ok_response() {
        let r = Response::new(StatusCode::Ok).body("Hello");
        let s = to_string(r.into_bytes());
        assert!(s.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(s.contains("Content-Length: 5\r\n"));
        assert!(s.ends_with("\r\n\r\nHello"));
    }

    #[test]
    fn fixed_trailer_headers() {
        let s = to_string(Response::new(StatusCode::NoContent).encode_head());
        assert_eq!(
            s,
            "HTTP/1.1 204 No Content\r\n\
             Content-Type: text/plain; charset=utf-8\r\n\
             Content-Length: 0\r\n\
             Connection: Keep-Alive\r\n\
             Keep-Alive: timeout=60\r\n\r\n"
        );
    }

    #[test]
    fn header_names_are_title_cased() {
        assert_eq!(title_case("access-control-allow-origin"), "Access-Control-Allow-Origin");
        assert_eq!(title_case("etag"), "Etag");
        assert_eq!(title_case("x-ID"), "X-ID");
        assert_eq!(title_case("a--b"), "A--B");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn framing_headers_are_recomputed() {
        let r = Response::new(StatusCode::Ok)
            .header("content-length", "999")
            .header("Connection", "close")
            .header("transfer-encoding", "chunked")
            .body("abc");
        let s = to_string(r.into_bytes());
        assert!(s.contains("Content-Length: 3\r\n"));
        assert!(!s.contains("999"));
        assert!(!s.contains("close"));
        assert!(!s.contains("chunked"));
        assert_eq!(s.matches("Connection:").count(), 1);
    }

    #[test]
    fn handler_content_type_replaces_default() {
        let r = Response::new(StatusCode::Ok).header("content-type", "application/json");
        let s = to_string(r.encode_head());
        assert!(s.contains("Content-Type: application/json\r\n"));
        assert!(!s.contains("text/plain"));
    }

    #[test]
    fn one_line_per_cookie() {
        let r = Response::new(StatusCode::Ok)
            .cookie("a=1; Path=/")
            .cookie("b=2");
        let s = to_string(r.encode_head());
        assert!(s.contains("Set-Cookie: a=1; Path=/\r\nSet-Cookie: b=2\r\n"));
    }

    #[test]
    fn reparses_as_the_same_message() {
        let r = Response::new(StatusCode::NotFound)
            .header("x-request-id", "7")
            .header("etag", "\"v1\"")
            .cookie("session=xyz")
            .body("Could not find the handler");
        let expected_body = r.payload().to_vec();
        let bytes = r.into_bytes();

        let mut headers = [httparse::EMPTY_HEADER; 16];
        let mut parsed = httparse::Response::new(&mut headers);
        let head_len = match parsed.parse(&bytes).unwrap() {
            httparse::Status::Complete(n) => n,
            httparse::Status::Partial => panic!("serialized response is incomplete"),
        };

        assert_eq!(parsed.code, Some(404));
        assert_eq!(parsed.reason, Some("Not Found"));
        let find = |name: &str| {
            parsed
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| std::str::from_utf8(h.value).unwrap().to_owned())
        };
        assert_eq!(find("x-request-id").as_deref(), Some("7"));
        assert_eq!(find("etag").as_deref(), Some("\"v1\""));
        assert_eq!(find("set-cookie").as_deref(), Some("session=xyz"));
        assert_eq!(find("content-length").as_deref(), Some("26"));
        assert_eq!(&bytes[head_len..], &expected_body[..]);
    }

    #[test]
    fn wire_parts_keep_head_and_body_apart() {
        let wire = Response::new(StatusCode::Ok).body("payload").into_wire();
        assert!(wire.head.ends_with(b"\r\n\r\n"));
        assert_eq!(&wire.body[..], b"payload");
    }
}
