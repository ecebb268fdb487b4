//! Peer identity extraction from verified client certificates.
//!
//! The TLS layer has already verified the chain against the trusted client
//! CA bundle by the time these functions run. Only the subject common name is
//! inspected. Revocation is not checked.

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Errors produced while resolving a peer identity.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The connection carried no peer certificate.
    #[error("peer presented no certificate")]
    NoCertificate,
    /// The certificate could not be decoded.
    #[error("malformed peer certificate: {0}")]
    Malformed(String),
    /// The subject DN has no common-name attribute.
    #[error("peer certificate subject has no common name")]
    MissingCommonName,
    /// The common-name attribute is not a printable string.
    #[error("peer certificate common name is not a valid string: {0}")]
    InvalidCommonName(String),
}

/// Extract the subject common name from a DER-encoded certificate.
///
/// When the subject carries several CN attributes the first one wins.
///
/// # Errors
///
/// Returns [`IdentityError::Malformed`] if the DER does not parse,
/// [`IdentityError::MissingCommonName`] if there is no CN attribute and
/// [`IdentityError::InvalidCommonName`] if the attribute is not a string.
pub fn subject_from_der(der: &[u8]) -> Result<String, IdentityError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| IdentityError::Malformed(e.to_string()))?;

    let attribute = cert
        .subject()
        .iter_common_name()
        .next()
        .ok_or(IdentityError::MissingCommonName)?;

    let common_name = attribute
        .as_str()
        .map_err(|e| IdentityError::InvalidCommonName(e.to_string()))?;

    if common_name.is_empty() {
        return Err(IdentityError::MissingCommonName);
    }

    Ok(common_name.to_owned())
}

/// Resolve the subject of a verified peer from its certificate chain.
///
/// The leaf certificate is always first in the chain rustls hands back.
///
/// # Errors
///
/// Returns [`IdentityError::NoCertificate`] when the chain is absent or empty,
/// otherwise any error from [`subject_from_der`].
pub fn subject_from_peer(chain: Option<&[CertificateDer<'_>]>) -> Result<String, IdentityError> {
    let leaf = chain
        .and_then(|certs| certs.first())
        .ok_or(IdentityError::NoCertificate)?;
    subject_from_der(leaf.as_ref())
}
