//! Certificate manager.
//!
//! `obtain` returns a certificate bound to its private key for a TLS
//! identity, loading a persisted one when it is still valid, and otherwise
//! issuing a fresh self-signed certificate and persisting it. An expired or
//! unreadable stored certificate is discarded and replaced; it is never
//! returned.

use rcgen::{CertificateParams, DnType, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;
use tracing::{debug, info, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use super::store::{CertStore, StoredCert};
use super::TlsError;

/// Validity window for issued certificates.
pub const CERT_VALIDITY: time::Duration = time::Duration::days(3650);

/// A certificate and its private key, ready to back a TLS server.
#[derive(Debug)]
pub struct ServerIdentity {
    /// DER-encoded certificate.
    pub cert: CertificateDer<'static>,
    /// DER-encoded private key.
    pub key: PrivateKeyDer<'static>,
    /// Expiry of the certificate.
    pub not_after: OffsetDateTime,
}

/// Manages the lifecycle of self-signed certificates over a [`CertStore`].
#[derive(Debug)]
pub struct CertManager {
    store: CertStore,
}

enum Lookup {
    Missing,
    Valid(ServerIdentity),
    Invalid(String),
}

impl CertManager {
    pub fn new(store: CertStore) -> Self {
        Self { store }
    }

    /// The backing certificate store.
    pub fn store(&self) -> &CertStore {
        &self.store
    }

    /// Obtain a valid certificate for `identity`, issuing one if necessary.
    pub fn obtain(&self, identity: &str) -> Result<ServerIdentity, TlsError> {
        match self.lookup(identity)? {
            Lookup::Valid(id) => {
                debug!(identity, not_after = %id.not_after, "using stored certificate");
                Ok(id)
            }
            Lookup::Missing => self.issue_and_persist(identity),
            Lookup::Invalid(reason) => {
                warn!(identity, reason = %reason, "discarding stored certificate");
                self.store.remove(identity)?;
                self.issue_and_persist(identity)
            }
        }
    }

    fn lookup(&self, identity: &str) -> Result<Lookup, TlsError> {
        let Some(stored) = self.store.load(identity)? else {
            return Ok(Lookup::Missing);
        };
        Ok(match validate_stored(identity, &stored) {
            Ok(id) => Lookup::Valid(id),
            Err(reason) => Lookup::Invalid(reason),
        })
    }

    fn issue_and_persist(&self, identity: &str) -> Result<ServerIdentity, TlsError> {
        let now = OffsetDateTime::now_utc();
        let issued = issue_certificate(identity, now, now + CERT_VALIDITY)?;
        self.store
            .save(identity, &issued.cert_pem, &issued.key_pem)?;
        info!(identity, not_after = %issued.identity.not_after, "issued self-signed certificate");
        Ok(issued.identity)
    }
}

pub(crate) struct IssuedCert {
    pub cert_pem: String,
    pub key_pem: String,
    pub identity: ServerIdentity,
}

/// Issue a self-signed certificate with subject = issuer = `identity`.
///
/// The identity is both the subject common name and a subject-alt-name, so
/// host names and IP addresses verify equally. The key is ECDSA P-256; the
/// serial number is randomized per issuance.
pub(crate) fn issue_certificate(
    identity: &str,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Result<IssuedCert, TlsError> {
    let key_pair = KeyPair::generate().map_err(generation)?;
    let mut params = CertificateParams::new(vec![identity.to_string()]).map_err(generation)?;
    params.distinguished_name.push(DnType::CommonName, identity);
    params.not_before = not_before;
    params.not_after = not_after;
    let cert = params.self_signed(&key_pair).map_err(generation)?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
    Ok(IssuedCert {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
        identity: ServerIdentity {
            cert: cert.der().clone(),
            key,
            not_after,
        },
    })
}

fn generation(e: rcgen::Error) -> TlsError {
    TlsError::Generation(e.to_string())
}

/// Decode and validate a stored PEM pair against `identity`.
///
/// Any content problem (unparseable PEM, subject mismatch, expiry) is a
/// reason to discard and regenerate, not a hard error.
fn validate_stored(identity: &str, stored: &StoredCert) -> Result<ServerIdentity, String> {
    let cert = match rustls_pemfile::certs(&mut stored.cert_pem.as_bytes()).next() {
        Some(Ok(der)) => der,
        Some(Err(e)) => return Err(format!("unreadable certificate PEM: {e}")),
        None => return Err("no certificate in PEM".to_string()),
    };
    let key = match rustls_pemfile::private_key(&mut stored.key_pem.as_bytes()) {
        Ok(Some(key)) => key,
        Ok(None) => return Err("no private key in PEM".to_string()),
        Err(e) => return Err(format!("unreadable key PEM: {e}")),
    };

    let not_after = {
        let (_, parsed) = X509Certificate::from_der(cert.as_ref())
            .map_err(|e| format!("malformed certificate: {e}"))?;

        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok());
        if cn != Some(identity) {
            return Err(format!(
                "subject {} does not match identity",
                cn.unwrap_or("<none>")
            ));
        }

        let validity = parsed.validity();
        if !validity.is_valid() {
            return Err(format!("expired at {}", validity.not_after));
        }
        OffsetDateTime::from_unix_timestamp(validity.not_after.timestamp())
            .map_err(|e| format!("certificate not-after out of range: {e}"))?
    };

    Ok(ServerIdentity {
        cert,
        key,
        not_after,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::public_key::PublicKey;

    fn temp_manager(name: &str) -> CertManager {
        let dir = std::env::temp_dir().join(format!(
            "sslpivot-manager-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        CertManager::new(CertStore::new(dir))
    }

    fn cleanup(manager: &CertManager) {
        let _ = std::fs::remove_dir_all(manager.store().dir());
    }

    #[test]
    fn test_issued_certificate_shape() {
        let manager = temp_manager("shape");
        let id = manager.obtain("10.0.0.1").unwrap();

        let (_, parsed) = X509Certificate::from_der(id.cert.as_ref()).unwrap();
        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|a| a.as_str().ok());
        assert_eq!(cn, Some("10.0.0.1"));
        assert_eq!(parsed.subject().to_string(), parsed.issuer().to_string());

        // Exactly the configured validity window, to the second.
        let nb = parsed.validity().not_before.timestamp();
        let na = parsed.validity().not_after.timestamp();
        assert_eq!(na - nb, CERT_VALIDITY.whole_seconds());
        assert!(parsed.validity().is_valid());

        // ECDSA P-256 key (>= 2048-bit-RSA-equivalent strength).
        assert!(matches!(
            parsed.public_key().parsed().unwrap(),
            PublicKey::EC(_)
        ));

        cleanup(&manager);
    }

    #[test]
    fn test_obtain_reuses_stored_certificate() {
        let manager = temp_manager("reuse");
        let first = manager.obtain("relay.example.com").unwrap();
        let second = manager.obtain("relay.example.com").unwrap();
        assert_eq!(first.cert.as_ref(), second.cert.as_ref());
        assert_eq!(first.not_after, second.not_after);
        cleanup(&manager);
    }

    #[test]
    fn test_distinct_identities_get_distinct_certificates() {
        let manager = temp_manager("distinct");
        let a = manager.obtain("10.0.0.1").unwrap();
        let b = manager.obtain("10.0.0.2").unwrap();
        assert_ne!(a.cert.as_ref(), b.cert.as_ref());
        cleanup(&manager);
    }

    #[test]
    fn test_expired_certificate_is_replaced() {
        let manager = temp_manager("expired");
        let now = OffsetDateTime::now_utc();
        let expired = issue_certificate(
            "10.0.0.1",
            now - time::Duration::days(2),
            now - time::Duration::days(1),
        )
        .unwrap();
        manager
            .store()
            .save("10.0.0.1", &expired.cert_pem, &expired.key_pem)
            .unwrap();

        let fresh = manager.obtain("10.0.0.1").unwrap();
        assert!(fresh.not_after > now);
        assert_ne!(fresh.cert.as_ref(), expired.identity.cert.as_ref());

        // The replacement was persisted and is reused from now on.
        let again = manager.obtain("10.0.0.1").unwrap();
        assert_eq!(again.cert.as_ref(), fresh.cert.as_ref());
        cleanup(&manager);
    }

    #[test]
    fn test_corrupt_entry_is_replaced() {
        let manager = temp_manager("corrupt");
        manager
            .store()
            .save("10.0.0.1", "not a certificate", "not a key")
            .unwrap();
        let id = manager.obtain("10.0.0.1").unwrap();
        assert!(id.not_after > OffsetDateTime::now_utc());
        cleanup(&manager);
    }

    #[test]
    fn test_subject_mismatch_is_replaced() {
        let manager = temp_manager("mismatch");
        let now = OffsetDateTime::now_utc();
        let other = issue_certificate("10.9.9.9", now, now + CERT_VALIDITY).unwrap();
        // Entry stored under one identity but carrying another subject.
        manager
            .store()
            .save("10.0.0.1", &other.cert_pem, &other.key_pem)
            .unwrap();

        let id = manager.obtain("10.0.0.1").unwrap();
        let (_, parsed) = X509Certificate::from_der(id.cert.as_ref()).unwrap();
        let cn = parsed
            .subject()
            .iter_common_name()
            .next()
            .and_then(|a| a.as_str().ok());
        assert_eq!(cn, Some("10.0.0.1"));
        cleanup(&manager);
    }

    #[test]
    fn test_serials_differ_across_issuances() {
        let a = {
            let now = OffsetDateTime::now_utc();
            issue_certificate("x", now, now + CERT_VALIDITY).unwrap()
        };
        let b = {
            let now = OffsetDateTime::now_utc();
            issue_certificate("x", now, now + CERT_VALIDITY).unwrap()
        };
        let (_, pa) = X509Certificate::from_der(a.identity.cert.as_ref()).unwrap();
        let (_, pb) = X509Certificate::from_der(b.identity.cert.as_ref()).unwrap();
        assert_ne!(pa.raw_serial(), pb.raw_serial());
    }
}
