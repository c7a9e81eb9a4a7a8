//! Request dispatch: map exact request paths to handler functions.
//!
//! The connection layer only knows the [`Dispatcher`] trait. [`Router`] is the
//! stock implementation: an exact-string table from path to handler, method
//! agnostic, with a fixed `404` answer for unknown paths.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::{Request, Response, StatusCode};

/// Body of the answer for a path without a handler.
pub const NOT_FOUND_BODY: &str = "Could not find the handler";

/// Boxed future returned by handlers and dispatchers.
pub type ResponseFuture<'a> = Pin<Box<dyn Future<Output = Response> + Send + 'a>>;

/// Turns a parsed [`Request`] into a [`Response`].
///
/// Called once per non-`OPTIONS` request, in the order requests arrive on a
/// connection. The request is handed over by value.
pub trait Dispatcher: Send + Sync + 'static {
    fn execute(&self, request: Request) -> ResponseFuture<'_>;
}

/// Type-erased, heap-allocated async handler that processes a [`Request`] and
/// returns a [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be shared across
/// connection tasks without copying the underlying closure. Register them
/// through [`Router::add_handler`].
pub type Handler = Arc<dyn Fn(Request) -> ResponseFuture<'static> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Request) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait through the blanket impl
/// below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given request, boxing the returned future.
    fn call(&self, request: Request) -> ResponseFuture<'static>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> ResponseFuture<'static> {
        Box::pin((self)(request))
    }
}

/// Exact-path handler table.
///
/// # Examples
///
/// ```rust
/// use relay::{Router, Response, StatusCode};
///
/// let mut router = Router::new();
/// router.add_handler("/", |_req| async { Response::new(StatusCode::Ok).body("Hello World") });
/// router.add_handler("/abcd", |_req| async { Response::new(StatusCode::Ok).body("Hello World") });
/// assert_eq!(router.len(), 2);
/// ```
#[derive(Default)]
pub struct Router {
    handlers: HashMap<String, Handler>,
}

impl Router {
    /// Create a new, empty `Router`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for requests whose path is exactly `path`.
    ///
    /// The first handler registered for a path wins; later registrations for
    /// the same path are ignored and `false` is returned.
    pub fn add_handler(&mut self, path: impl Into<String>, handler: impl IntoHandler) -> bool {
        match self.handlers.entry(path.into()) {
            Entry::Occupied(entry) => {
                debug!(path = %entry.key(), "handler already registered, ignoring");
                false
            }
            Entry::Vacant(entry) => {
                let handler: Handler = Arc::new(move |req| handler.call(req));
                entry.insert(handler);
                true
            }
        }
    }

    /// Return the number of registered paths.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no handlers have been registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the handler registered for the request path, or answer `404`.
    pub async fn route(&self, request: Request) -> Response {
        match self.handlers.get(request.path()) {
            Some(handler) => handler(request).await,
            None => Response::new(StatusCode::NotFound).body(NOT_FOUND_BODY),
        }
    }
}

impl Dispatcher for Router {
    fn execute(&self, request: Request) -> ResponseFuture<'_> {
        Box::pin(self.route(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    #[tokio::test]
    async fn empty_router_returns_404() {
        let router = Router::new();
        let res = router.route(Request::new(Method::Get, "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(res.payload(), NOT_FOUND_BODY.as_bytes());
    }

    #[tokio::test]
    async fn exact_path_matches_any_method() {
        let mut router = Router::new();
        router.add_handler("/hello", |req: Request| async move {
            Response::new(StatusCode::Ok).body(req.method().as_str())
        });

        let res = router.route(Request::new(Method::Post, "/hello")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.payload(), b"POST");
    }

    #[tokio::test]
    async fn query_string_does_not_affect_lookup() {
        let mut router = Router::new();
        router.add_handler("/search", |req: Request| async move {
            let q = req.query_param("q").unwrap_or_default().to_owned();
            Response::new(StatusCode::Ok).body(q)
        });

        let res = router.route(Request::new(Method::Get, "//search?q=rust")).await;
        assert_eq!(res.payload(), b"rust");
    }

    #[tokio::test]
    async fn no_prefix_or_trailing_slash_matching() {
        let mut router = Router::new();
        router.add_handler("/users", |_req| async { Response::new(StatusCode::Ok) });

        for path in ["/users/", "/users/42", "/user"] {
            let res = router.route(Request::new(Method::Get, path)).await;
            assert_eq!(res.status(), StatusCode::NotFound, "{path}");
        }
    }

    #[tokio::test]
    async fn first_registration_wins() {
        let mut router = Router::new();
        assert!(router.add_handler("/path", |_req| async { Response::new(StatusCode::Ok) }));
        assert!(!router.add_handler("/path", |_req| async {
            Response::new(StatusCode::Accepted)
        }));

        let res = router.route(Request::new(Method::Get, "/path")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(router.len(), 1);
    }

    #[tokio::test]
    async fn usable_as_dispatcher_object() {
        let mut router = Router::new();
        router.add_handler("/", |_req| async { Response::new(StatusCode::NoContent) });
        let dispatcher: Arc<dyn Dispatcher> = Arc::new(router);

        let res = dispatcher.execute(Request::new(Method::Delete, "/")).await;
        assert_eq!(res.status(), StatusCode::NoContent);
    }
}
