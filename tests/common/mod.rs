// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

/// Builds a throwaway self-signed server TLS config for tests. The real
/// binary loads this from an operator-supplied PEM file
/// (`starttls_auditor::tls::load_server_config`); tests generate an
/// ephemeral keypair instead of shipping a fixture certificate.
pub fn ephemeral_server_config() -> Arc<rustls::ServerConfig> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
            .expect("self-signed cert generation");
    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .expect("valid self-signed cert/key pair");
    Arc::new(config)
}
