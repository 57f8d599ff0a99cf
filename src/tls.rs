// SPDX-License-Identifier: Apache-2.0

//! TLS context construction for both roles the proxy plays.
//!
//! Server role uses a single operator-supplied certificate chain and key,
//! loaded once at startup. Client role
//! deliberately skips certificate validation: this proxy's whole purpose is
//! to observe whether a peer client accepts a TLS session it did not
//! validate, so a permissive verifier is the correct behavior here, not an
//! oversight.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

/// Accepts any certificate chain presented by the upstream server.
///
/// This is the proxy's "untrusted intercept" attacker model (GLOSSARY):
/// it terminates TLS toward a party without pinning or validating, the
/// same posture a client that blindly accepts our forged certificate
/// would have toward us.
#[derive(Debug)]
struct NoServerVerification;

impl ServerCertVerifier for NoServerVerification {
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
        // accept whatever the peer offers
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Builds the client-role TLS config used for `upgrade_client`, shared
/// across all sessions since it carries no per-session state.
pub fn build_insecure_client_config() -> Arc<ClientConfig> {
    ensure_crypto_provider_installed();
    let mut config = ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(NoServerVerification))
        .with_no_client_auth();
    config.alpn_protocols.clear();
    Arc::new(config)
}

/// Loads a PEM file containing a certificate chain followed by a private
/// key (the `--key path` flag, default `server.pem`) into a server-role
/// TLS config used by `upgrade_server`.
pub fn load_server_config(path: &Path) -> anyhow::Result<Arc<rustls::ServerConfig>> {
    ensure_crypto_provider_installed();
    let mut reader = BufReader::new(File::open(path)?);
    let certs: Vec<CertificateDer<'static>> =
        rustls_pemfile::certs(&mut reader).collect::<Result<_, io::Error>>()?;
    if certs.is_empty() {
        anyhow::bail!("no certificate found in {}", path.display());
    }

    // rewind and scan for the private key alongside the certs
    let mut reader = BufReader::new(File::open(path)?);
    let key = rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| anyhow::anyhow!("no private key found in {}", path.display()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Arc::new(config))
}

/// Installs `ring` as the process-wide rustls crypto provider on first call.
/// `ServerConfig::builder()`/`ClientConfig::builder()` both resolve this
/// process default and panic if nothing installed it first; ignoring the
/// `Err` here is correct since it only means another call already won the
/// race, not that installation failed.
fn ensure_crypto_provider_installed() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// A DNS-name-shaped `ServerName` for a host that may be an IP literal;
/// falls back to a fixed placeholder name since `upgrade_client` never
/// validates it against the certificate anyway (RootCertStore stays empty).
pub fn server_name_for(host: &str) -> ServerName<'static> {
    ServerName::try_from(host.to_string())
        .unwrap_or_else(|_| ServerName::try_from("invalid".to_string()).unwrap())
}

#[allow(dead_code)]
pub fn empty_root_store() -> RootCertStore {
    RootCertStore::empty()
}
