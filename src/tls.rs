//! TLS configuration and server key fingerprints
//!
//! Gemini servers overwhelmingly use self-signed certificates, so the client
//! does not validate the certificate chain or the host name. Server identity
//! comes from the trust store instead, keyed on the fingerprint of the
//! certificate's public key. Handshake signatures are still verified so the
//! peer must hold the private key for the certificate it presents.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use der::Encode;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::trust_store::Fingerprint;

/// Compute the SHA-256 fingerprint of a certificate's public key
///
/// This hashes the full SPKI (SubjectPublicKeyInfo) in DER format, the same
/// value as `openssl x509 -pubkey | openssl pkey -pubin -outform DER | sha256sum`.
pub fn cert_pubkey_fingerprint(cert_der: &CertificateDer<'_>) -> Result<Fingerprint> {
    use der::Decode;
    use x509_cert::Certificate;

    let cert = Certificate::from_der(cert_der.as_ref())
        .map_err(|e| Error::Tls(format!("Failed to parse certificate: {}", e)))?;

    // Algorithm identifier + public key bits
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Tls(format!("Failed to encode SPKI: {}", e)))?;

    Ok(Fingerprint::from_digest(Sha256::digest(&spki_der).into()))
}

/// Certificate verifier that accepts whatever certificate the server presents
///
/// Trust decisions happen after the handshake against the trust store. Only
/// the handshake signatures are checked here.
#[derive(Debug)]
pub struct TofuCertVerifier {
    provider: Arc<CryptoProvider>,
}

impl TofuCertVerifier {
    pub fn new(provider: Arc<CryptoProvider>) -> Self {
        Self { provider }
    }
}

impl ServerCertVerifier for TofuCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Build the rustls client config used for every Gemini connection
///
/// TLS 1.2 is the minimum; TLS 1.3 is preferred when the server offers it.
pub fn client_config() -> Result<rustls::ClientConfig> {
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let verifier = TofuCertVerifier::new(provider.clone());

    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(|e| Error::Tls(format!("Failed to configure protocol versions: {}", e)))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(config)
}

/// The same config with SNI and session resumption turned off
///
/// Used for hosts [`server_name`] cannot express; they all share one
/// placeholder name, so their sessions must not be cached under it.
pub fn without_sni(config: &rustls::ClientConfig) -> rustls::ClientConfig {
    let mut config = config.clone();
    config.enable_sni = false;
    config.resumption = rustls::client::Resumption::disabled();
    config
}

/// Server name for the handshake
///
/// DNS names are sent as SNI; IP literals are accepted but never sent.
/// Returns `None` for hosts that are neither, such as `a.b.c.1` or `-a.com`,
/// which still normalize as Gemini hosts.
pub fn server_name(host: &str) -> Option<ServerName<'static>> {
    ServerName::try_from(host.to_owned()).ok()
}

/// Stand-in for hosts without a usable server name; the verifier ignores it
pub fn placeholder_server_name() -> ServerName<'static> {
    ServerName::from(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}
