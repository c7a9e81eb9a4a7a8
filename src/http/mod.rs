//! HTTP/1.1 protocol types, parsing and serialization.
//!
//! This module provides the core HTTP primitives:
//! [`Method`], [`StatusCode`], [`Headers`], [`Request`], and [`Response`],
//! plus the incremental [`parser`] and the [`assembler`] that turns parser
//! events into [`Request`] values.

use std::fmt;

pub mod assembler;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;

pub use assembler::RequestAssembler;
pub use headers::Headers;
pub use parser::{Execution, MessageHead, ParseError, Parser, ParserHandler, Status};
pub use request::Request;
pub use response::Response;

macro_rules! status_codes {
    ($($name:ident = $code:literal, $reason:literal;)+) => {
        /// Response status codes the server can send, each with its reason
        /// phrase.
        ///
        /// ```
        /// use relay::http::StatusCode;
        ///
        /// assert_eq!(StatusCode::Ok.as_u16(), 200);
        /// assert_eq!(StatusCode::from_u16(404), Some(StatusCode::NotFound));
        /// assert_eq!(StatusCode::PayloadTooLarge.to_string(), "413 Payload Too Large");
        /// ```
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u16)]
        pub enum StatusCode {
            $($name = $code,)+
        }

        impl StatusCode {
            const ALL: &'static [StatusCode] = &[$(StatusCode::$name,)+];

            pub fn canonical_reason(self) -> &'static str {
                match self {
                    $(Self::$name => $reason,)+
                }
            }
        }
    };
}

status_codes! {
    Continue = 100, "Continue";
    SwitchingProtocols = 101, "Switching Protocols";
    Processing = 102, "Processing";

    Ok = 200, "OK";
    Created = 201, "Created";
    Accepted = 202, "Accepted";
    NonAuthoritativeInformation = 203, "Non-Authoritative Information";
    NoContent = 204, "No Content";
    ResetContent = 205, "Reset Content";
    PartialContent = 206, "Partial Content";

    MovedPermanently = 301, "Moved Permanently";
    Found = 302, "Found";
    SeeOther = 303, "See Other";
    NotModified = 304, "Not Modified";
    TemporaryRedirect = 307, "Temporary Redirect";
    PermanentRedirect = 308, "Permanent Redirect";

    BadRequest = 400, "Bad Request";
    Unauthorized = 401, "Unauthorized";
    PaymentRequired = 402, "Payment Required";
    Forbidden = 403, "Forbidden";
    NotFound = 404, "Not Found";
    MethodNotAllowed = 405, "Method Not Allowed";
    NotAcceptable = 406, "Not Acceptable";
    RequestTimeout = 408, "Request Timeout";
    Conflict = 409, "Conflict";
    Gone = 410, "Gone";
    LengthRequired = 411, "Length Required";
    PreconditionFailed = 412, "Precondition Failed";
    PayloadTooLarge = 413, "Payload Too Large";
    UriTooLong = 414, "Request-URI Too Long";
    UnsupportedMediaType = 415, "Unsupported Media Type";
    RangeNotSatisfiable = 416, "Requested Range Not Satisfiable";
    ExpectationFailed = 417, "Expectation Failed";
    ImATeapot = 418, "I'm a teapot";
    UnprocessableEntity = 422, "Unprocessable Entity";
    Locked = 423, "Locked";
    PreconditionRequired = 428, "Precondition Required";
    TooManyRequests = 429, "Too Many Requests";
    RequestHeaderFieldsTooLarge = 431, "Request Header Fields Too Large";
    UnavailableForLegalReasons = 451, "Unavailable For Legal Reasons";

    InternalServerError = 500, "Internal Server Error";
    NotImplemented = 501, "Not Implemented";
    BadGateway = 502, "Bad Gateway";
    ServiceUnavailable = 503, "Service Unavailable";
    GatewayTimeout = 504, "Gateway Timeout";
    HttpVersionNotSupported = 505, "HTTP Version Not Supported";
    BandwidthLimitExceeded = 509, "Bandwidth Limit Exceeded";
    NotExtended = 510, "Not Extended";
}

impl StatusCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(code: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|status| status.as_u16() == code)
    }

    /// `true` for 4xx and 5xx codes.
    pub fn is_error(self) -> bool {
        self.as_u16() >= 400
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.canonical_reason())
    }
}

/// Request method.
///
/// Tokens are matched case-sensitively against the seven supported methods.
/// Anything else becomes [`Method::Illegal`], which the server answers with
/// `405`.
///
/// ```
/// use relay::http::Method;
///
/// assert_eq!(Method::from_token("PATCH"), Method::Patch);
/// assert_eq!(Method::from_token("TRACE"), Method::Illegal);
/// assert_eq!(Method::Head.to_string(), "HEAD");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    Delete,
    #[default]
    Get,
    Post,
    Put,
    Head,
    Patch,
    Options,
    Illegal,
}

const METHOD_TOKENS: [(Method, &str); 7] = [
    (Method::Delete, "DELETE"),
    (Method::Get, "GET"),
    (Method::Post, "POST"),
    (Method::Put, "PUT"),
    (Method::Head, "HEAD"),
    (Method::Patch, "PATCH"),
    (Method::Options, "OPTIONS"),
];

impl Method {
    pub fn from_token(token: &str) -> Self {
        METHOD_TOKENS
            .iter()
            .find(|(_, name)| *name == token)
            .map_or(Self::Illegal, |(method, _)| *method)
    }

    pub fn as_str(self) -> &'static str {
        METHOD_TOKENS
            .iter()
            .find(|(method, _)| *method == self)
            .map_or("ILLEGAL", |(_, name)| *name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_tokens_are_case_sensitive() {
        assert_eq!(Method::from_token("get"), Method::Illegal);
        assert_eq!(Method::from_token("CONNECT"), Method::Illegal);
        for (method, token) in METHOD_TOKENS {
            assert_eq!(Method::from_token(token), method);
            assert_eq!(method.as_str(), token);
        }
    }

    #[test]
    fn status_lookup_covers_the_whole_table() {
        for &status in StatusCode::ALL {
            assert_eq!(StatusCode::from_u16(status.as_u16()), Some(status));
        }
        assert_eq!(StatusCode::from_u16(299), None);
        assert!(StatusCode::HttpVersionNotSupported.is_error());
        assert!(!StatusCode::NoContent.is_error());
    }
}
