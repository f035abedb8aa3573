//! Dial-side TLS connector construction.
//!
//! The dialed TLS endpoint is usually another deployment of this tool
//! presenting a self-signed certificate, so the default verification mode
//! accepts any server certificate. The `trust-store` mode instead verifies
//! the server chain against the certificates in the local store directory.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tokio_rustls::TlsConnector;

use super::store::CertStore;
use super::TlsError;

/// How the dial-side handshake verifies the remote certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsVerifyMode {
    /// Accept any server certificate.
    AcceptAny,
    /// Verify against the certificates in the local store directory.
    TrustStore,
}

impl FromStr for TlsVerifyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accept-any" => Ok(Self::AcceptAny),
            "trust-store" => Ok(Self::TrustStore),
            other => Err(format!("unknown TLS verify mode: {other}")),
        }
    }
}

impl fmt::Display for TlsVerifyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::AcceptAny => "accept-any",
            Self::TrustStore => "trust-store",
        })
    }
}

/// Build the TLS connector used to wrap the dialed leg.
pub fn dial_connector(mode: TlsVerifyMode, store: &CertStore) -> Result<TlsConnector, TlsError> {
    let config = match mode {
        TlsVerifyMode::AcceptAny => ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
            .with_no_client_auth(),
        TlsVerifyMode::TrustStore => {
            let mut roots = RootCertStore::empty();
            for der in store.trusted_roots()? {
                roots
                    .add(der)
                    .map_err(|e| TlsError::Config(format!("unusable trust anchor: {e}")))?;
            }
            if roots.is_empty() {
                return Err(TlsError::Config(format!(
                    "trust-store verification requested but {} holds no certificates",
                    store.dir().display()
                )));
            }
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        }
    };
    Ok(TlsConnector::from(Arc::new(config)))
}

/// Verifier that accepts any server certificate.
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
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(name: &str) -> CertStore {
        let dir = std::env::temp_dir().join(format!(
            "sslpivot-connector-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        CertStore::new(dir)
    }

    #[test]
    fn test_verify_mode_parse() {
        assert_eq!(
            "accept-any".parse::<TlsVerifyMode>().unwrap(),
            TlsVerifyMode::AcceptAny
        );
        assert_eq!(
            "trust-store".parse::<TlsVerifyMode>().unwrap(),
            TlsVerifyMode::TrustStore
        );
        assert!("verify".parse::<TlsVerifyMode>().is_err());
    }

    #[test]
    fn test_accept_any_builds_without_store_entries() {
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();
        let store = temp_store("accept-any");
        assert!(dial_connector(TlsVerifyMode::AcceptAny, &store).is_ok());
    }

    #[test]
    fn test_trust_store_requires_certificates() {
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();
        let store = temp_store("empty-roots");
        assert!(dial_connector(TlsVerifyMode::TrustStore, &store).is_err());
    }
}
