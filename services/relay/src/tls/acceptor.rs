//! Server-side TLS acceptor construction.

use std::sync::Arc;

use tokio_rustls::TlsAcceptor;

use super::manager::ServerIdentity;
use super::TlsError;

/// Build a TLS acceptor serving the managed certificate.
pub fn server_acceptor(identity: ServerIdentity) -> Result<TlsAcceptor, TlsError> {
    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![identity.cert], identity.key)
        .map_err(|e| TlsError::Config(format!("server TLS config: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::manager::{issue_certificate, CERT_VALIDITY};
    use time::OffsetDateTime;

    #[test]
    fn test_acceptor_builds_from_issued_identity() {
        rustls::crypto::ring::default_provider()
            .install_default()
            .ok();
        let now = OffsetDateTime::now_utc();
        let issued = issue_certificate("127.0.0.1", now, now + CERT_VALIDITY).unwrap();
        assert!(server_acceptor(issued.identity).is_ok());
    }
}
