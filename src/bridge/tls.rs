//! TLS client configuration
//!
//! Loads the client certificate chain and private key from PEM files and
//! builds the rustls client configuration used for `ssl` connections.

use std::fs::File;
use std::io::BufReader;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};

use crate::config::BrokerConfig;

/// Error type for TLS configuration
#[derive(Debug)]
pub enum TlsError {
    /// IO error reading files
    Io { path: String, source: std::io::Error },
    /// Certificate parsing error
    CertificateError(String),
    /// Private key error
    PrivateKeyError(String),
    /// TLS configuration error
    ConfigError(String),
}

impl std::fmt::Display for TlsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsError::Io { path, source } => write!(f, "IO error reading {}: {}", path, source),
            TlsError::CertificateError(msg) => write!(f, "Certificate error: {}", msg),
            TlsError::PrivateKeyError(msg) => write!(f, "Private key error: {}", msg),
            TlsError::ConfigError(msg) => write!(f, "TLS config error: {}", msg),
        }
    }
}

impl std::error::Error for TlsError {}

fn open(path: &str) -> Result<BufReader<File>, TlsError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| TlsError::Io {
            path: path.to_string(),
            source: e,
        })
}

/// Load certificates from a PEM file
fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_reader_iter(open(path)?)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::CertificateError(format!("Failed to parse certificates: {}", e)))?;

    if certs.is_empty() {
        return Err(TlsError::CertificateError(format!(
            "No certificates found in {}",
            path
        )));
    }

    Ok(certs)
}

/// Load private key from a PEM file
fn load_private_key(path: &str) -> Result<PrivateKeyDer<'static>, TlsError> {
    PrivateKeyDer::from_pem_reader(open(path)?)
        .map_err(|e| TlsError::PrivateKeyError(format!("Failed to parse private key: {}", e)))
}

/// Trust anchors for verifying the broker: the configured CA bundle, or the
/// public web roots when none is configured.
fn load_roots(ca_path: Option<&str>) -> Result<RootCertStore, TlsError> {
    let mut root_store = RootCertStore::empty();

    match ca_path {
        Some(path) => {
            for cert in load_certs(path)? {
                root_store.add(cert).map_err(|e| {
                    TlsError::CertificateError(format!("Failed to add CA certificate: {}", e))
                })?;
            }
        }
        None => root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }

    Ok(root_store)
}

/// Build the TLS client configuration for the broker connection.
///
/// The client certificate is presented only when both `tls_cert` and
/// `tls_private_key` are configured.
pub fn load_client_config(config: &BrokerConfig) -> Result<ClientConfig, TlsError> {
    let roots = load_roots(config.tls_ca.as_deref())?;
    let builder = ClientConfig::builder().with_root_certificates(roots);

    match (&config.tls_cert, &config.tls_private_key) {
        (Some(cert_path), Some(key_path)) => {
            let certs = load_certs(cert_path)?;
            let key = load_private_key(key_path)?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| TlsError::ConfigError(format!("Failed to build TLS config: {}", e)))
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tls_error_display() {
        let err = TlsError::CertificateError("test error".to_string());
        assert!(err.to_string().contains("Certificate error"));

        let err = TlsError::PrivateKeyError("key error".to_string());
        assert!(err.to_string().contains("Private key error"));

        let err = TlsError::ConfigError("config error".to_string());
        assert!(err.to_string().contains("TLS config error"));
    }

    #[test]
    fn test_missing_certificate_file() {
        let config = BrokerConfig {
            tls_cert: Some("/nonexistent/mqti/client.pem".to_string()),
            tls_private_key: Some("/nonexistent/mqti/client.key".to_string()),
            ..Default::default()
        };
        let err = load_client_config(&config).unwrap_err();
        assert!(matches!(err, TlsError::Io { .. }));
        assert!(err.to_string().contains("client.pem"));
    }

    #[test]
    fn test_empty_certificate_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().display().to_string();
        let err = load_certs(&path).unwrap_err();
        assert!(matches!(err, TlsError::CertificateError(_)));
    }

    #[test]
    fn test_server_auth_only_uses_public_roots() {
        let config = BrokerConfig::default();
        assert!(load_client_config(&config).is_ok());
    }
}
