//! TLS Configuration
//!
//! Builds the rustls server configuration that enforces client certificate
//! verification against the configured CA bundle.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};

use crate::config::TlsConfig;
use crate::error::{Error, Result};

/// Load every certificate from a PEM file
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| {
            Error::Tls(format!("cannot open certificate file {}: {}", path.display(), e))
        })?;
    let mut reader = BufReader::new(file);

    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| Error::Tls(format!("invalid certificate PEM in {}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(Error::Tls(format!("no certificates found in {}", path.display())));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| Error::Tls(format!("cannot open key file {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);

    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| Error::Tls(format!("invalid key PEM in {}: {}", path.display(), e)))?
        .ok_or_else(|| Error::Tls(format!("no private key found in {}", path.display())))
}

/// Build the trust store for client certificates
pub fn load_client_roots(path: &Path) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

/// Build the server configuration.
///
/// Presented client certificates must always chain to the CA. With
/// `require_client_cert = false` a client may also connect without one; the
/// admission gate then rejects its custody operations.
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<ServerConfig>> {
    let roots = Arc::new(load_client_roots(&config.ca_cert)?);

    let builder = WebPkiClientVerifier::builder(roots);
    let builder = if config.require_client_cert {
        builder
    } else {
        builder.allow_unauthenticated()
    };
    let verifier = builder
        .build()
        .map_err(|e| Error::Tls(format!("client verifier: {}", e)))?;

    let certs = load_certs(&config.cert)?;
    let key = load_private_key(&config.key)?;

    let mut server_config = ServerConfig::builder()
        .with_client_cert_verifier(verifier)
        .with_single_cert(certs, key)?;
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    tracing::info!(
        "TLS configured (client certificates {})",
        if config.require_client_cert { "required" } else { "optional" }
    );
    Ok(Arc::new(server_config))
}
