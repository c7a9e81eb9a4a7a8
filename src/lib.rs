//! # relay
//!
//! The connection-handling core of a small embedded HTTP/1.1 + HTTPS server.
//!
//! An [`Acceptor`](server::Acceptor) turns listening-socket activity into
//! connections; each [`Connection`](server::Connection) drives an incremental
//! HTTP/1.1 parser over its byte stream, hands complete requests to a
//! [`Dispatcher`](router::Dispatcher) one at a time, applies CORS and writes
//! the serialized responses back, honoring keep-alive and pipelining.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use relay::{Request, Response, Router, Server, ServerConfig, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut router = Router::new();
//!     router.add_handler("/", |req: Request| async move {
//!         Response::new(StatusCode::Ok).body(format!("Hello from {}", req.path()))
//!     });
//!
//!     let config = ServerConfig { host: "127.0.0.1".into(), port: 8080, ..Default::default() };
//!     Server::new(config, router)
//!         .listen_and_serve(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod http;
pub mod router;
pub mod security;
pub mod server;

pub use config::{ConfigError, ServerConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{Dispatcher, Router};
pub use server::{Server, ServerError};
