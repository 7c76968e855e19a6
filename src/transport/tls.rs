//! TLS Material Loading
//!
//! PEM certificate and key loading for the QUIC transport, plus the fixed
//! ALPN token both sides must present.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use serde::Deserialize;

use crate::transport::TransportError;

/// Application-layer protocol identifier. Client and server must match.
pub const ALPN: &[u8] = b"fluxkv/1";

/// TLS material locations from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TlsSettings {
    /// Server certificate chain, PEM.
    pub cert_path: PathBuf,
    /// Server private key, PEM.
    pub key_path: PathBuf,
    /// Root CA clients should trust, for self-signed deployments.
    #[serde(default)]
    pub root_ca_path: Option<PathBuf>,
}

/// Builds the rustls server configuration for QUIC from `settings`.
pub fn build_server_config(settings: &TlsSettings) -> Result<rustls::ServerConfig, TransportError> {
    let certs = load_certs(&settings.cert_path)?;
    let key = load_private_key(&settings.key_path)?;

    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(e.to_string()))?;
    config.alpn_protocols = vec![ALPN.to_vec()];
    Ok(config)
}

/// Loads every certificate from a PEM file.
fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path).map_err(|e| {
        TransportError::Tls(format!("failed to open certificate {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut reader)
        .filter_map(Result::ok)
        .collect();

    if certs.is_empty() {
        return Err(TransportError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Loads the first private key (PKCS#8, PKCS#1, or SEC1) from a PEM file.
fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Tls(format!("failed to open key {}: {e}", path.display())))?;
    let mut reader = BufReader::new(file);

    loop {
        match rustls_pemfile::read_one(&mut reader) {
            Ok(Some(rustls_pemfile::Item::Pkcs8Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs8(key))
            }
            Ok(Some(rustls_pemfile::Item::Pkcs1Key(key))) => {
                return Ok(PrivateKeyDer::Pkcs1(key))
            }
            Ok(Some(rustls_pemfile::Item::Sec1Key(key))) => return Ok(PrivateKeyDer::Sec1(key)),
            Ok(Some(_)) => {}
            Ok(None) => break,
            Err(e) => {
                return Err(TransportError::Tls(format!(
                    "failed to parse key {}: {e}",
                    path.display()
                )))
            }
        }
    }

    Err(TransportError::Tls(format!(
        "no private key found in {}",
        path.display()
    )))
}
