//! TLS material for the front door and the proxy listeners: either loaded
//! from operator-supplied PEM files, or (absent those) a self-signed
//! identity generated and cached for the life of the process — the same
//! "never silently refuse to serve TLS" posture the teacher's bootstrap
//! uses for its own HTTPS front door.

use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::RootCertStore;
use rustls::ServerConfig as RustlsServerConfig;
use tunnel_core::error::Error;

/// Load a cert/key pair from PEM files and build a `rustls::ServerConfig`
/// that advertises `http/1.1` via ALPN (the teacher's front door does the
/// same so a plain HTTPS client doesn't have to guess the protocol).
pub async fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
    client_ca_path: Option<&Path>,
) -> Result<Arc<RustlsServerConfig>, Error> {
    let cert_pem = tokio::fs::read(cert_path)
        .await
        .map_err(|e| Error::TlsError(format!("reading {}: {e}", cert_path.display())))?;
    let key_pem = tokio::fs::read(key_path)
        .await
        .map_err(|e| Error::TlsError(format!("reading {}: {e}", key_path.display())))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| Error::TlsError(format!("parsing {}: {e}", cert_path.display())))?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| Error::TlsError(format!("parsing {}: {e}", key_path.display())))?
        .ok_or_else(|| Error::TlsError(format!("no private key found in {}", key_path.display())))?;

    let client_verifier = match client_ca_path {
        Some(ca_path) => Some(load_client_verifier(ca_path).await?),
        None => None,
    };

    build_server_config(certs, key, client_verifier)
}

/// Build a client-certificate verifier from a CA bundle, turning on mutual
/// TLS: the front door will refuse any connection whose client cert isn't
/// signed by one of these roots.
async fn load_client_verifier(
    ca_path: &Path,
) -> Result<Arc<dyn rustls::server::danger::ClientCertVerifier>, Error> {
    let ca_pem = tokio::fs::read(ca_path)
        .await
        .map_err(|e| Error::TlsError(format!("reading {}: {e}", ca_path.display())))?;
    let ca_certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut ca_pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| Error::TlsError(format!("parsing {}: {e}", ca_path.display())))?;

    let mut roots = RootCertStore::empty();
    for cert in ca_certs {
        roots
            .add(cert)
            .map_err(|e| Error::TlsError(format!("adding client CA: {e}")))?;
    }

    WebPkiClientVerifier::builder(Arc::new(roots))
        .build()
        .map_err(|e| Error::TlsError(format!("building client cert verifier: {e}")))
}

/// Generate a self-signed cert/key for `subject_alt_name` (typically
/// `localhost` or the bind hostname), for operators who want TLS without
/// provisioning a real certificate. Not invoked unless explicitly asked
/// for; the default is a plain, unencrypted front door (spec scenario:
/// "with no TLS and no auth").
pub fn generate_self_signed(subject_alt_name: &str) -> Result<Arc<RustlsServerConfig>, Error> {
    let certified_key = rcgen::generate_simple_self_signed(vec![subject_alt_name.to_string()])
        .map_err(|e| Error::TlsError(format!("generating self-signed certificate: {e}")))?;
    let cert_der = CertificateDer::from(certified_key.cert.der().to_vec());
    let key_der = PrivateKeyDer::try_from(certified_key.key_pair.serialize_der())
        .map_err(|e| Error::TlsError(format!("encoding self-signed key: {e}")))?;
    build_server_config(vec![cert_der], key_der, None)
}

fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    client_verifier: Option<Arc<dyn rustls::server::danger::ClientCertVerifier>>,
) -> Result<Arc<RustlsServerConfig>, Error> {
    let builder = match client_verifier {
        Some(verifier) => RustlsServerConfig::builder().with_client_cert_verifier(verifier),
        None => RustlsServerConfig::builder().with_no_client_auth(),
    };
    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| Error::TlsError(format!("building TLS server config: {e}")))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_self_signed_config() {
        let config = generate_self_signed("localhost").unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }
}
