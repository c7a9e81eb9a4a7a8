//! Shared utilities for the end-to-end tests.

use std::net::SocketAddr;
use std::path::PathBuf;

use relay::server::{Acceptor, Plain};
use relay::{Request, Response, Router, Server, ServerConfig, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A response as read off the wire.
#[derive(Debug)]
pub struct RawResponse {
    pub head: String,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.head
            .split(' ')
            .nth(1)
            .and_then(|code| code.parse().ok())
            .unwrap_or(0)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }
}

/// Router with the demo handlers plus an echo endpoint.
pub fn router() -> Router {
    let mut router = Router::new();
    router.add_handler("/", |_req| async {
        Response::new(StatusCode::Ok).body("Hello World")
    });
    router.add_handler("/echo", |req: Request| async move {
        Response::new(StatusCode::Ok)
            .header("content-type", "application/octet-stream")
            .body_bytes(req.body().to_vec())
    });
    router
}

pub fn local_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    }
}

/// Opens a plain listener on an ephemeral port.
#[allow(dead_code)]
pub async fn start_plain(config: ServerConfig) -> (Acceptor<Plain>, SocketAddr) {
    let server = Server::new(config, router());
    let mut acceptor = server.plain_acceptor();
    let addr = acceptor.open().await.unwrap();
    (acceptor, addr)
}

/// Reads exactly one response, using `Content-Length` for the body. With
/// `head_only` the body is not read (answers to `HEAD`).
pub async fn read_response<S: AsyncRead + Unpin>(stream: &mut S, head_only: bool) -> RawResponse {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "stream ended inside a response head");
        head.push(byte[0]);
    }

    let head = String::from_utf8(head).unwrap();
    let mut response = RawResponse {
        head,
        body: Vec::new(),
    };
    if !head_only {
        let length: usize = response
            .header("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        response.body = vec![0; length];
        stream.read_exact(&mut response.body).await.unwrap();
    }
    response
}

#[allow(dead_code)]
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}
