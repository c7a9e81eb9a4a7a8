//! HTTPS tests against the fixture certificate in `tests/fixtures/`.

mod common;

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::{fixture, local_config, read_response, router};
use relay::config::TlsConfig;
use relay::server::{Acceptor, Tls};
use relay::{Server, ServerConfig};
use rustls::RootCertStore;
use rustls::crypto::ring;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

fn tls_config(handshake_secs: u64) -> ServerConfig {
    let mut config = local_config();
    config.tls = Some(TlsConfig {
        port: 0,
        cert_path: fixture("server.crt"),
        key_path: fixture("server.key"),
    });
    config.timeouts.handshake_secs = handshake_secs;
    config
}

async fn start_tls(config: ServerConfig) -> (Acceptor<Tls>, SocketAddr) {
    let server = Server::new(config, router());
    let mut acceptor = server.tls_acceptor().unwrap().unwrap();
    let addr = acceptor.open().await.unwrap();
    (acceptor, addr)
}

fn connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    let mut reader = BufReader::new(File::open(fixture("ca.crt")).unwrap());
    for cert in rustls_pemfile::certs(&mut reader) {
        roots.add(cert.unwrap()).unwrap();
    }
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

#[tokio::test]
async fn https_request_round_trip() {
    let (mut acceptor, addr) = start_tls(tls_config(60)).await;

    let tcp = TcpStream::connect(addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut stream = connector().connect(domain, tcp).await.unwrap();

    stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
    let first = read_response(&mut stream, false).await;
    assert_eq!(first.status(), 200);
    assert_eq!(first.body, b"Hello World");

    stream
        .write_all(b"POST /echo HTTP/1.1\r\nContent-Length: 4\r\nConnection: close\r\n\r\nping")
        .await
        .unwrap();
    let second = read_response(&mut stream, false).await;
    assert_eq!(second.body, b"ping");

    acceptor.close().await;
}

#[tokio::test]
async fn stalled_handshake_is_dropped() {
    let (_acceptor, addr) = start_tls(tls_config(1)).await;
    let mut tcp = TcpStream::connect(addr).await.unwrap();

    // never send a ClientHello; the server gives up after the handshake timeout
    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(10), tcp.read(&mut buf))
        .await
        .expect("server kept the stalled handshake open");
    assert!(matches!(read, Ok(0) | Err(_)));
}

#[tokio::test]
async fn plaintext_on_tls_port_gets_no_http_answer() {
    let (_acceptor, addr) = start_tls(tls_config(60)).await;
    let mut tcp = TcpStream::connect(addr).await.unwrap();

    tcp.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
    let mut received = Vec::new();
    let _ = timeout(Duration::from_secs(10), tcp.read_to_end(&mut received))
        .await
        .expect("server kept the failed handshake open");
    assert!(!received.starts_with(b"HTTP/1.1"));
}

#[tokio::test]
async fn plain_and_tls_listeners_share_handlers() {
    let server = Server::new(tls_config(60), router());
    let mut plain = server.plain_acceptor();
    let mut secure = server.tls_acceptor().unwrap().unwrap();
    let plain_addr = plain.open().await.unwrap();
    let secure_addr = secure.open().await.unwrap();
    assert_ne!(plain_addr, secure_addr);

    let mut tcp = TcpStream::connect(plain_addr).await.unwrap();
    tcp.write_all(b"GET /echo HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_response(&mut tcp, false).await.status(), 200);

    let tcp = TcpStream::connect(secure_addr).await.unwrap();
    let domain = ServerName::try_from("localhost").unwrap();
    let mut tls = connector().connect(domain, tcp).await.unwrap();
    tls.write_all(b"GET /missing HTTP/1.1\r\n\r\n").await.unwrap();
    assert_eq!(read_response(&mut tls, false).await.status(), 404);

    plain.close().await;
    secure.close().await;
}
