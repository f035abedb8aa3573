//! Certificate lifecycle and TLS stream configuration.
//!
//! This module provides:
//! - A file-backed certificate store (PEM pairs keyed by identity)
//! - A certificate manager that loads, validates, expires, and issues
//!   self-signed certificates
//! - Server-side acceptor and dial-side connector construction

mod acceptor;
mod connector;
mod manager;
mod store;

pub use acceptor::server_acceptor;
pub use connector::{dial_connector, TlsVerifyMode};
pub use manager::{CertManager, ServerIdentity, CERT_VALIDITY};
pub use store::{CertStore, StoredCert};

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Certificate and TLS configuration errors.
#[derive(Debug, Error)]
pub enum TlsError {
    /// Certificate or key generation failed.
    #[error("certificate generation failed: {0}")]
    Generation(String),

    /// The certificate store could not be read or written.
    #[error("certificate store error at {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TLS configuration could not be built.
    #[error("TLS configuration error: {0}")]
    Config(String),
}
