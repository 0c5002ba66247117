//! Peer Identity
//!
//! Projects the verified client certificate of a terminated TLS connection
//! onto the caller identity used for authorization and audit. The chain has
//! already been validated against the trusted CA by the TLS layer; this
//! module only reads the subject of the end-entity certificate.

use std::fmt;

use rustls::pki_types::CertificateDer;
use x509_parser::prelude::{FromDer, X509Certificate};

/// Common name reported when the subject carries no (or an empty) CN
pub const UNKNOWN_CLIENT: &str = "Unknown Client";

/// Caller identity derived from a verified client certificate.
///
/// "No identity" and "identity with an empty name" are distinct states.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PeerIdentity {
    common_name: Option<String>,
}

impl PeerIdentity {
    /// Identity for a caller without a usable certificate
    pub fn anonymous() -> Self {
        Self { common_name: None }
    }

    /// Identity for a caller whose certificate subject names `common_name`
    pub fn authenticated(common_name: impl Into<String>) -> Self {
        Self {
            common_name: Some(common_name.into()),
        }
    }

    /// Whether a verified certificate identified the caller
    pub fn is_present(&self) -> bool {
        self.common_name.is_some()
    }

    /// Subject common name, if present
    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// Name written to audit records ("unknown" when absent)
    pub fn audit_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or("unknown")
    }

    /// Derive an identity from a DER encoded end-entity certificate.
    pub fn from_certificate(der: &[u8]) -> Self {
        let cert = match X509Certificate::from_der(der) {
            Ok((_, cert)) => cert,
            Err(e) => {
                tracing::debug!("Unparseable peer certificate: {}", e);
                return Self::anonymous();
            }
        };

        let subject = cert.subject();
        if subject.iter().next().is_none() {
            return Self::anonymous();
        }

        let cn = subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .filter(|cn| !cn.is_empty())
            .unwrap_or(UNKNOWN_CLIENT);

        Self::authenticated(cn)
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.audit_name())
    }
}

/// Extract the caller identity from the peer certificates negotiated on a
/// connection. Absence is a valid result, never an error.
pub fn extract_identity(peer_certificates: Option<&[CertificateDer<'_>]>) -> PeerIdentity {
    match peer_certificates.and_then(|chain| chain.first()) {
        Some(end_entity) => PeerIdentity::from_certificate(end_entity.as_ref()),
        None => PeerIdentity::anonymous(),
    }
}
