use tracing::debug;

use crate::http::{Request, Response, StatusCode};

/// Methods advertised in `Allow` and `Access-Control-Allow-Methods`.
pub const ALLOWED_METHODS: &str = "DELETE, GET, HEAD, OPTIONS, PATCH, POST, PUT";

/// Response headers a cross-origin caller may read.
pub const EXPOSED_HEADERS: &str = "etag, content-encoding, content-length, location, server";

/// Seconds a browser may cache a preflight answer.
pub const PREFLIGHT_MAX_AGE: u32 = 1800;

/// Origin allow-list shared by every connection.
///
/// Requests without an `Origin` header are left alone. For the others the
/// default posture is to deny credentials; an origin on the allow-list (or a
/// `*` entry) flips `access-control-allow-credentials` to `true`.
///
/// # Examples
///
/// ```
/// use relay::security::CorsPolicy;
///
/// let policy = CorsPolicy::new(["arangodb.com"]);
///
/// assert!(policy.allows_credentials("https://arangodb.com/"));
/// assert!(!policy.allows_credentials("http://evil.example"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct CorsPolicy {
    allowed_origins: Vec<String>,
}

impl CorsPolicy {
    /// Creates a policy from an allow-list. Entries may be full origins
    /// (`https://app.example`), bare hosts (`app.example`) or `*`.
    pub fn new<I, S>(allowed_origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_origins: allowed_origins
                .into_iter()
                .map(|o| {
                    let origin: String = o.into();
                    strip_trailing_slash(&origin).to_owned()
                })
                .collect(),
        }
    }

    /// Returns the configured allow-list.
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    /// Whether `origin` may receive credentialed responses.
    ///
    /// A single trailing `/` is ignored. An entry matches either the whole
    /// origin or the origin with its `scheme://` prefix removed.
    pub fn allows_credentials(&self, origin: &str) -> bool {
        let origin = strip_trailing_slash(origin);
        let host = origin
            .split_once("://")
            .map_or(origin, |(_, rest)| rest);

        self.allowed_origins
            .iter()
            .any(|allowed| allowed == "*" || allowed == origin || allowed == host)
    }

    /// Answers an `OPTIONS` request without dispatching it.
    ///
    /// The answer always carries `Allow`. When the request came with an
    /// `Origin`, the preflight headers are added too, echoing any
    /// `access-control-request-headers` back as the allowed headers.
    pub fn preflight(&self, origin: Option<&str>, request: &Request) -> Response {
        let mut response = Response::new(StatusCode::Ok).header("allow", ALLOWED_METHODS);

        if let Some(origin) = origin {
            debug!(origin, path = request.path(), "answering CORS preflight");
            response.set_header("access-control-allow-methods", ALLOWED_METHODS);
            if let Some(requested) = request.header("access-control-request-headers") {
                response.set_header("access-control-allow-headers", requested.trim());
            }
            response.set_header("access-control-max-age", PREFLIGHT_MAX_AGE.to_string());
        }
        response
    }

    /// Adds the CORS response headers for a request that carried `origin`.
    /// Headers the handler already set are kept.
    pub fn apply(&self, origin: &str, response: &mut Response) {
        let credentials = self.allows_credentials(origin);
        response.set_header_if_absent("access-control-allow-origin", origin);
        response.set_header_if_absent(
            "access-control-allow-credentials",
            if credentials { "true" } else { "false" },
        );
        response.set_header_if_absent("access-control-expose-headers", EXPOSED_HEADERS);
    }
}

fn strip_trailing_slash(origin: &str) -> &str {
    origin.strip_suffix('/').unwrap_or(origin)
}
