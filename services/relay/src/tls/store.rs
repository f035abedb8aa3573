//! File-backed certificate store.
//!
//! Each identity maps to a PEM pair in the store directory:
//! `<identity>.crt.pem` and `<identity>.key.pem`. The identity is sanitized
//! into the file name, so every identity gets its own entry and a valid
//! certificate survives process restarts. Writes go through a temp file and
//! rename so a crash never leaves a half-written entry.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rustls::pki_types::CertificateDer;
use tracing::{debug, warn};

use super::TlsError;

/// A persisted certificate/key PEM pair.
#[derive(Debug, Clone)]
pub struct StoredCert {
    pub cert_pem: String,
    pub key_pem: String,
}

/// Certificate store rooted at a directory.
#[derive(Debug, Clone)]
pub struct CertStore {
    dir: PathBuf,
}

impl CertStore {
    /// Create a store rooted at `dir`. The directory is created lazily on
    /// the first write.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// The store's root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn cert_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.crt.pem", sanitize(identity)))
    }

    fn key_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.key.pem", sanitize(identity)))
    }

    /// Load the stored PEM pair for `identity`.
    ///
    /// Returns `Ok(None)` when no certificate is stored. A certificate with
    /// a missing key file is returned with an empty key; the manager treats
    /// it as invalid and regenerates.
    pub fn load(&self, identity: &str) -> Result<Option<StoredCert>, TlsError> {
        let cert_path = self.cert_path(identity);
        if !cert_path.exists() {
            return Ok(None);
        }

        let cert_pem = fs::read_to_string(&cert_path).map_err(|source| TlsError::Store {
            path: cert_path,
            source,
        })?;

        let key_path = self.key_path(identity);
        let key_pem = match fs::read_to_string(&key_path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(identity, path = %key_path.display(), "certificate has no key file");
                String::new()
            }
            Err(source) => {
                return Err(TlsError::Store {
                    path: key_path,
                    source,
                })
            }
        };

        Ok(Some(StoredCert { cert_pem, key_pem }))
    }

    /// Persist a PEM pair for `identity`, replacing any previous entry.
    pub fn save(&self, identity: &str, cert_pem: &str, key_pem: &str) -> Result<(), TlsError> {
        fs::create_dir_all(&self.dir).map_err(|source| TlsError::Store {
            path: self.dir.clone(),
            source,
        })?;
        write_atomic(&self.cert_path(identity), cert_pem)?;
        write_atomic(&self.key_path(identity), key_pem)?;
        debug!(identity, dir = %self.dir.display(), "certificate persisted");
        Ok(())
    }

    /// Remove the stored entry for `identity`. Missing files are fine.
    pub fn remove(&self, identity: &str) -> Result<(), TlsError> {
        for path in [self.cert_path(identity), self.key_path(identity)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(TlsError::Store { path, source }),
            }
        }
        Ok(())
    }

    /// All certificates currently in the store, DER-decoded.
    ///
    /// Used as the trust anchors for the `trust-store` dial verification
    /// mode. Unparseable entries are skipped with a warning.
    pub fn trusted_roots(&self) -> Result<Vec<CertificateDer<'static>>, TlsError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(TlsError::Store {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut roots = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| TlsError::Store {
                path: self.dir.clone(),
                source,
            })?;
            let path = entry.path();
            if !path.to_string_lossy().ends_with(".crt.pem") {
                continue;
            }
            let pem = fs::read(&path).map_err(|source| TlsError::Store {
                path: path.clone(),
                source,
            })?;
            let mut found = false;
            for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
                match cert {
                    Ok(der) => {
                        roots.push(der);
                        found = true;
                    }
                    Err(_) => break,
                }
            }
            if !found {
                warn!(path = %path.display(), "skipping unparseable certificate");
            }
        }
        Ok(roots)
    }
}

/// Map an identity to a file-name-safe stem. Distinct identities that
/// sanitize to the same stem are not expected in practice (identities are
/// host names or IP addresses).
fn sanitize(identity: &str) -> String {
    identity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn write_atomic(path: &Path, content: &str) -> Result<(), TlsError> {
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, content).map_err(|source| TlsError::Store {
        path: tmp_path.clone(),
        source,
    })?;
    fs::rename(&tmp_path, path).map_err(|source| TlsError::Store {
        path: path.to_path_buf(),
        source,
    })
}
