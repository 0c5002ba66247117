//! WolfVault - Mutual-TLS File Custody Service
//!
//! Stores, lists, serves and removes files on behalf of callers that present
//! a client certificate signed by a trusted CA. Every stored object and every
//! audit record is bound to the certificate-derived identity of its caller.
//!
//! # Architecture
//!
//! ```text
//! TLS accept ─► PeerIdentity ─► AdmissionGate ─► FileStore (flat root dir)
//!                                     │
//!                                     └─► AuditSink (one record per request)
//! ```
//!
//! # Features
//!
//! - Client certificate verification with rustls
//! - Identity-gated put, list, get and delete
//! - Traversal-safe names and collision-free stored names
//! - Append-only JSON lines audit trail

pub mod config;
pub mod error;
pub mod identity;
pub mod store;
pub mod gate;
pub mod tls;
pub mod api;

pub use config::WolfVaultConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfVaultConfig;
    pub use crate::error::{Error, Result};
    pub use crate::identity::{extract_identity, PeerIdentity};
    pub use crate::store::{FileStore, SafeName, StoredObject};
    pub use crate::gate::{AdmissionGate, Operation, Outcome, Rejection};
    pub use crate::gate::audit::{AuditRecord, AuditSink, AuditOutcome};
    pub use crate::api::VaultServer;
}
