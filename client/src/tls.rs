//! TLS material for dialing the server: root trust (public roots or a
//! pinned `--tls-ca` bundle), optional client certificate for mutual TLS,
//! and the `--tls-skip-verify` escape hatch.

use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::ClientArgs;

pub async fn build_tls_config(args: &ClientArgs) -> anyhow::Result<Arc<ClientConfig>> {
    let builder = ClientConfig::builder();

    let builder = if args.tls_skip_verify {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
    } else {
        let roots = match &args.tls_ca {
            Some(path) => load_root_store(path).await?,
            None => {
                let mut store = RootCertStore::empty();
                store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
                store
            }
        };
        builder.with_root_certificates(roots)
    };

    Ok(Arc::new(finish_client_auth(builder, args).await?))
}

async fn finish_client_auth(
    builder: rustls::ConfigBuilder<ClientConfig, rustls::client::WantsClientCert>,
    args: &ClientArgs,
) -> anyhow::Result<ClientConfig> {
    match (&args.tls_key, &args.tls_cert) {
        (Some(key_path), Some(cert_path)) => {
            let (certs, key) = load_client_cert(cert_path, key_path).await?;
            Ok(builder.with_client_auth_cert(certs, key)?)
        }
        _ => Ok(builder.with_no_client_auth()),
    }
}

async fn load_root_store(ca_path: &Path) -> anyhow::Result<RootCertStore> {
    let pem = tokio::fs::read(ca_path)
        .await
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", ca_path.display()))?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", ca_path.display()))?;
    let mut store = RootCertStore::empty();
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| anyhow::anyhow!("adding CA cert from {}: {e}", ca_path.display()))?;
    }
    Ok(store)
}

async fn load_client_cert(
    cert_path: &Path,
    key_path: &Path,
) -> anyhow::Result<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> {
    let cert_pem = tokio::fs::read(cert_path)
        .await
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", cert_path.display()))?;
    let key_pem = tokio::fs::read(key_path)
        .await
        .map_err(|e| anyhow::anyhow!("reading {}: {e}", key_path.display()))?;

    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_pem.as_slice())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", cert_path.display()))?;
    let key = rustls_pemfile::private_key(&mut key_pem.as_slice())
        .map_err(|e| anyhow::anyhow!("parsing {}: {e}", key_path.display()))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", key_path.display()))?;
    Ok((certs, key))
}

pub fn server_name_for(hostname: &str) -> anyhow::Result<ServerName<'static>> {
    ServerName::try_from(hostname.to_string())
        .map_err(|e| anyhow::anyhow!("invalid TLS server name '{hostname}': {e}"))
}

/// Accepts any server certificate. Only reachable via `--tls-skip-verify`,
/// which the flag's own help text calls dangerous.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA256,
        ]
    }
}
