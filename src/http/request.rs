//! HTTP/1.1 request value object.
//!
//! Requests are built incrementally by the [`RequestAssembler`] while the
//! parser walks the byte stream, then handed by value to the dispatcher.
//!
//! [`RequestAssembler`]: super::RequestAssembler

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

use super::{Headers, Method};

/// One request as handed to the dispatcher.
///
/// The path has runs of `/` collapsed, the query string is split into an
/// ordered parameter map, header names are lowercase, and the body is the raw
/// byte payload. Nothing is percent-decoded.
///
/// # Examples
///
/// ```
/// use relay::http::{Method, Request};
///
/// let request = Request::new(Method::Get, "//search//all?q=rust&page=2");
///
/// assert_eq!(request.path(), "/search/all");
/// assert_eq!(request.url(), "/search/all?q=rust&page=2");
/// assert_eq!(request.query_param("q"), Some("rust"));
/// assert_eq!(request.query_param("page"), Some("2"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    method: Method,
    url: String,
    path: String,
    version: u8,
    params: BTreeMap<String, String>,
    headers: Headers,
    body: BytesMut,
}

impl Request {
    /// Creates an HTTP/1.1 request for `url` with no headers and an empty body.
    pub fn new(method: Method, url: &str) -> Self {
        let mut request = Self {
            method,
            version: 1,
            ..Self::default()
        };
        request.set_url(url);
        request
    }

    /// Adds a header; the name is stored lowercase.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value);
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: impl AsRef<[u8]>) -> Self {
        self.body = BytesMut::from(body.as_ref());
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Returns the full URL after slash collapsing, including the query string.
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Minor version; `0` means HTTP/1.0.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Header names are stored lowercase.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Shorthand for `headers().get(name)`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Query parameters, ordered by key.
    pub fn query_params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes the request and returns its body.
    pub fn into_body(self) -> Bytes {
        self.body.freeze()
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_version(&mut self, version: u8) {
        self.version = version;
    }

    pub(crate) fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub(crate) fn body_mut(&mut self) -> &mut BytesMut {
        &mut self.body
    }

    /// Stores `raw` as the request target: collapses consecutive `/` in the
    /// path, then splits off and parses the query string.
    pub(crate) fn set_url(&mut self, raw: &str) {
        let (raw_path, query) = match raw.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (raw, None),
        };

        let mut path = String::with_capacity(raw_path.len());
        for c in raw_path.chars() {
            if c == '/' && path.ends_with('/') {
                continue;
            }
            path.push(c);
        }

        self.params = query.map(parse_query_string).unwrap_or_default();
        self.url = match query {
            Some(query) => format!("{path}?{query}"),
            None => path.clone(),
        };
        self.path = path;
    }
}

/// Parses a URL query string (`key=value&key2=value2`) into an ordered map.
///
/// A value runs up to the next `&` or the end of the string; a segment without
/// `=` is a key with an empty value. Later duplicates overwrite earlier ones.
/// No percent- or `+`-decoding is applied.
fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key.to_owned(), value.to_owned()),
            None => (pair.to_owned(), String::new()),
        })
        .collect()
}
