//! TLS material loading for the secure WebSocket listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::error::{NetError, NetResult};

/// Build a TLS acceptor from PEM-encoded certificate chain and private key.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> NetResult<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_private_key(key_path)?;

    let config = ServerConfig::builder_with_provider(ring::default_provider().into())
        .with_safe_default_protocol_versions()
        .map_err(|e| NetError::Tls(format!("protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| NetError::Tls(format!("invalid certificate or key: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> NetResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path)
        .map_err(|e| NetError::Tls(format!("open certificate {}: {e}", path.display())))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| NetError::Tls(format!("read certificate {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(NetError::Tls(format!(
            "no certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> NetResult<PrivateKeyDer<'static>> {
    let file = File::open(path)
        .map_err(|e| NetError::Tls(format!("open private key {}: {e}", path.display())))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| NetError::Tls(format!("read private key {}: {e}", path.display())))?
        .ok_or_else(|| NetError::Tls(format!("no private key found in {}", path.display())))
}
