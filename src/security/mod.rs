//! Cross-origin request handling.
//!
//! - [`CorsPolicy`] decides whether a request `Origin` may receive
//!   credentials, answers `OPTIONS` preflights and decorates responses with
//!   the `Access-Control-*` headers.

pub mod cors;

pub use cors::CorsPolicy;
