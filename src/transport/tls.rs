//! TLS acceptor construction from PEM files.
//!
//! Uses the rustls `ring` provider explicitly so no process-wide default
//! provider has to be installed.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsConfig;
use crate::error::{BertletError, Result};

/// Read every certificate in a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BertletError::Tls(format!("invalid certificate {}: {e}", path.display())))?;

    if certs.is_empty() {
        return Err(BertletError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Read the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open(path, "private key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| BertletError::Tls(format!("invalid private key {}: {e}", path.display())))?
        .ok_or_else(|| BertletError::Tls(format!("no private key found in {}", path.display())))
}

/// Build a server-side acceptor (no client authentication).
pub fn build_acceptor(config: &TlsConfig) -> Result<TlsAcceptor> {
    let certs = load_certs(&config.cert_path)?;
    let key = load_private_key(&config.key_path)?;

    let server_config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

fn open(path: &Path, what: &str) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| BertletError::Tls(format!("cannot open {what} {}: {e}", path.display())))
}
