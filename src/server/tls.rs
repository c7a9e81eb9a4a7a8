//! TLS configuration and certificate loading.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};

use super::ServerError;

/// Builds a rustls server configuration from a PEM certificate chain and a
/// PEM private key.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<ServerConfig, ServerError> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, ServerError> {
    let file = File::open(path).map_err(|source| ServerError::TlsMaterial {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ServerError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ServerError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })?;
    if certs.is_empty() {
        return Err(ServerError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ServerError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ServerError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ServerError::NoPrivateKey(path.to_path_buf()))
}
