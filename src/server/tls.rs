//! rustls configuration: server identity plus mandatory client certificates.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

/// Errors produced while building the TLS configuration.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// A PEM file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// File path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// A PEM file contains no certificates.
    #[error("no certificates found in {0}")]
    NoCertificates(String),
    /// A PEM file contains no private key.
    #[error("no private key found in {0}")]
    NoPrivateKey(String),
    /// A CA certificate was rejected by the trust store.
    #[error("invalid client CA certificate: {0}")]
    InvalidCa(String),
    /// rustls rejected the configuration.
    #[error("TLS configuration rejected: {0}")]
    Config(String),
}

/// Load every certificate from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no certificate.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let display = path.display().to_string();
    let read_err = |source| TlsError::Read {
        path: display.clone(),
        source,
    };
    let file = File::open(path).map_err(read_err)?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(read_err)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates(display));
    }
    Ok(certs)
}

/// Load the first private key from a PEM file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or holds no key.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| TlsError::Read {
        path: display.clone(),
        source,
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|source| TlsError::Read {
            path: display.clone(),
            source,
        })?
        .ok_or(TlsError::NoPrivateKey(display))
}

/// Build the server configuration.
///
/// `server_cert` holds the certificate chain; the key is read from
/// `server_key` or, when absent, from the same file. Clients must present a
/// certificate that chains to one in `client_ca`, otherwise the handshake
/// fails.
///
/// # Errors
///
/// Returns an error if any file is unreadable or rustls rejects the material.
pub fn build_server_config(
    server_cert: &Path,
    server_key: Option<&Path>,
    client_ca: &Path,
) -> Result<Arc<ServerConfig>, TlsError> {
    let chain = load_certs(server_cert)?;
    let key = load_private_key(server_key.unwrap_or(server_cert))?;

    let mut roots = RootCertStore::empty();
    for ca in load_certs(client_ca)? {
        roots
            .add(ca)
            .map_err(|e| TlsError::InvalidCa(e.to_string()))?;
    }

    let provider = Arc::new(ring::default_provider());
    let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), Arc::clone(&provider))
        .build()
        .map_err(|e| TlsError::Config(e.to_string()))?;

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(e.to_string()))?
        .with_client_cert_verifier(verifier)
        .with_single_cert(chain, key)
        .map_err(|e| TlsError::Config(e.to_string()))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(Arc::new(config))
}
