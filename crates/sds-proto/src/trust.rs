//! The trust bundle: the root certificate material distributed to workloads.
//!
//! A [`TrustBundle`] is loaded once at startup and never changes. Cloning is
//! cheap (`Arc<str>`), so every connection holds its own handle to the same
//! bytes without synchronization.
//!
//! The bundle is served verbatim. [`TrustBundle::inspect`] decodes the PEM
//! blocks only to describe them in logs; content the parser does not
//! understand is counted, never rejected.

use std::fmt;
use std::sync::Arc;

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};
use x509_parser::pem::Pem;

/// PEM label of an X.509 certificate block.
const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Immutable root certificate bundle, shared read-only across connections.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustBundle {
    pem: Arc<str>,
}

impl TrustBundle {
    pub fn new(pem: impl Into<Arc<str>>) -> Self {
        Self { pem: pem.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.pem
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.pem.as_bytes()
    }

    pub fn len(&self) -> usize {
        self.pem.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pem.is_empty()
    }

    /// Lowercase hex SHA-256 of the bundle bytes.
    pub fn fingerprint(&self) -> String {
        HEXLOWER.encode(&Sha256::digest(self.as_bytes()))
    }

    /// Decode the PEM blocks of the bundle for diagnostics.
    pub fn inspect(&self) -> BundleSummary {
        let mut summary = BundleSummary::default();

        for block in Pem::iter_from_buffer(self.as_bytes()) {
            let Ok(pem) = block else {
                // The reader cannot resynchronise after a malformed block.
                summary.undecodable += 1;
                break;
            };
            if pem.label != CERTIFICATE_LABEL {
                summary.undecodable += 1;
                continue;
            }
            match pem.parse_x509() {
                Ok(cert) => summary.certificates.push(CertificateSummary {
                    subject: cert.subject().to_string(),
                    not_after: cert.validity().not_after.to_string(),
                    is_ca: cert.is_ca(),
                }),
                Err(_) => summary.undecodable += 1,
            }
        }

        summary
    }
}

impl fmt::Debug for TrustBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBundle")
            .field("len", &self.len())
            .field("sha256", &self.fingerprint())
            .finish()
    }
}

impl From<String> for TrustBundle {
    fn from(pem: String) -> Self {
        Self::new(pem)
    }
}

impl From<&str> for TrustBundle {
    fn from(pem: &str) -> Self {
        Self::new(pem)
    }
}

/// One decoded certificate from the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateSummary {
    pub subject: String,
    pub not_after: String,
    pub is_ca: bool,
}

/// What [`TrustBundle::inspect`] found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BundleSummary {
    pub certificates: Vec<CertificateSummary>,
    /// PEM blocks that are not certificates or failed to parse.
    pub undecodable: usize,
}
