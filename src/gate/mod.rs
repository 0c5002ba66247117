//! Admission Gate
//!
//! Per-request policy in front of the file store:
//! - Every custody operation requires a certificate-derived identity
//! - Target names are sanitized before the store is touched
//! - Each request ends in exactly one audit record
//!
//! ```text
//! request ─► identity present? ──no──► Rejected(Unauthorized)
//!                 │ yes
//!                 ▼
//!            name valid? ──no──► Rejected(InvalidName)
//!                 │ yes
//!                 ▼
//!            FileStore op ──err──► Failed(StoreError)
//!                 │ ok
//!                 ▼
//!             Proceeded
//! ```

pub mod audit;

use std::fmt;
use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::error::Error;
use crate::identity::PeerIdentity;
use crate::store::{FileStore, ObjectReader, SafeName, StoredObject};
use audit::{AuditOutcome, AuditRecord, AuditSink};

pub use audit::{FanoutAuditSink, JsonFileAuditSink, MemoryAuditSink, TracingAuditSink};

/// Custody operation descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Put,
    List,
    Get(String),
    Delete(String),
}

impl Operation {
    /// Name used in audit records
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Put => "Put",
            Operation::List => "List",
            Operation::Get(_) => "Get",
            Operation::Delete(_) => "Delete",
        }
    }

    /// Caller-supplied target, empty when the operation has none
    pub fn target(&self) -> &str {
        match self {
            Operation::Put | Operation::List => "",
            Operation::Get(name) | Operation::Delete(name) => name,
        }
    }

    /// Whether the operation needs a present peer identity
    pub fn requires_identity(&self) -> bool {
        match self {
            // uploads must be attributable
            Operation::Put => true,
            // enumeration discloses custody contents
            Operation::List => true,
            Operation::Get(_) => true,
            Operation::Delete(_) => true,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why the gate refused a request without touching the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Unauthorized,
    InvalidName(String),
}

impl Rejection {
    pub fn into_error(self) -> Error {
        match self {
            Rejection::Unauthorized => Error::Unauthorized,
            Rejection::InvalidName(reason) => Error::InvalidName(reason),
        }
    }
}

/// Terminal state of one gated request
#[derive(Debug)]
pub enum Outcome<T> {
    /// The store operation succeeded
    Proceeded(T),
    /// Refused by policy before any store access
    Rejected(Rejection),
    /// Admitted, but the store operation failed
    Failed(Error),
}

impl<T> Outcome<T> {
    pub fn audit_outcome(&self) -> AuditOutcome {
        match self {
            Outcome::Proceeded(_) => AuditOutcome::Success,
            Outcome::Rejected(_) => AuditOutcome::Denied,
            Outcome::Failed(_) => AuditOutcome::Failed,
        }
    }

    /// Collapse into the crate error type
    pub fn into_result(self) -> crate::Result<T> {
        match self {
            Outcome::Proceeded(value) => Ok(value),
            Outcome::Rejected(rejection) => Err(rejection.into_error()),
            Outcome::Failed(e) => Err(e),
        }
    }
}

/// Policy and audit front for a [`FileStore`]
#[derive(Clone)]
pub struct AdmissionGate {
    store: Arc<FileStore>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionGate {
    pub fn new(store: Arc<FileStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { store, audit }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// Store an upload under a name derived from `original_name`
    pub async fn put<R>(
        &self,
        identity: &PeerIdentity,
        original_name: &str,
        reader: R,
    ) -> Outcome<StoredObject>
    where
        R: AsyncRead + Unpin + Send,
    {
        let op = Operation::Put;
        if let Err(rejection) = self.admit(identity, &op) {
            return self.conclude(identity, &op, "", Outcome::Rejected(rejection), None);
        }

        let original = match self.store.sanitizer().upload_name(original_name) {
            Ok(name) => name,
            Err(e) => return self.reject_name(identity, &op, "", e),
        };

        let pending = PendingRequest::new(self, identity, &op, "");
        let stored = self.store.put(reader, &original).await;
        pending.settle();

        match stored {
            Ok(object) => {
                let target = object.stored_name.clone();
                self.conclude(identity, &op, &target, Outcome::Proceeded(object), None)
            }
            Err(e) => {
                let target = match &e {
                    Error::WriteFailed { name, .. } => name.clone(),
                    _ => String::new(),
                };
                self.conclude(identity, &op, &target, Outcome::Failed(e), None)
            }
        }
    }

    /// Enumerate stored names
    pub async fn list(&self, identity: &PeerIdentity) -> Outcome<Vec<String>> {
        let op = Operation::List;
        if let Err(rejection) = self.admit(identity, &op) {
            return self.conclude(identity, &op, "", Outcome::Rejected(rejection), None);
        }

        let pending = PendingRequest::new(self, identity, &op, "");
        let listed = self.store.list().await;
        pending.settle();

        let outcome = match listed {
            Ok(names) => Outcome::Proceeded(names),
            Err(e) => Outcome::Failed(e),
        };
        self.conclude(identity, &op, "", outcome, None)
    }

    /// Open a stored object for download
    pub async fn get(&self, identity: &PeerIdentity, name: &str) -> Outcome<ObjectReader> {
        let op = Operation::Get(name.to_string());
        let safe = match self.admit_lookup(identity, &op).await {
            Ok(safe) => safe,
            Err(outcome) => return outcome,
        };

        let pending = PendingRequest::new(self, identity, &op, name);
        let opened = self.store.get(&safe).await;
        pending.settle();

        let outcome = match opened {
            Ok(reader) => Outcome::Proceeded(reader),
            Err(e) => Outcome::Failed(e),
        };
        self.conclude(identity, &op, name, outcome, None)
    }

    /// Remove a stored object
    pub async fn delete(&self, identity: &PeerIdentity, name: &str) -> Outcome<SafeName> {
        let op = Operation::Delete(name.to_string());
        let safe = match self.admit_lookup(identity, &op).await {
            Ok(safe) => safe,
            Err(outcome) => return outcome,
        };

        let pending = PendingRequest::new(self, identity, &op, name);
        let removed = self.store.delete(&safe).await;
        pending.settle();

        let outcome = match removed {
            Ok(()) => Outcome::Proceeded(safe),
            Err(e) => Outcome::Failed(e),
        };
        self.conclude(identity, &op, name, outcome, None)
    }

    fn admit(&self, identity: &PeerIdentity, op: &Operation) -> Result<(), Rejection> {
        if op.requires_identity() && !identity.is_present() {
            return Err(Rejection::Unauthorized);
        }
        Ok(())
    }

    /// Identity and name checks shared by Get and Delete. On rejection the
    /// returned outcome has already been audited.
    async fn admit_lookup<T>(
        &self,
        identity: &PeerIdentity,
        op: &Operation,
    ) -> Result<SafeName, Outcome<T>> {
        if let Err(rejection) = self.admit(identity, op) {
            let outcome = Outcome::Rejected(rejection);
            return Err(self.conclude(identity, op, op.target(), outcome, None));
        }

        match self.store.sanitizer().lookup_name(op.target()).await {
            Ok(safe) => Ok(safe),
            Err(e) => Err(self.reject_name(identity, op, op.target(), e)),
        }
    }

    fn reject_name<T>(
        &self,
        identity: &PeerIdentity,
        op: &Operation,
        target: &str,
        error: Error,
    ) -> Outcome<T> {
        let rejection = match &error {
            Error::InvalidName(reason) => Rejection::InvalidName(reason.clone()),
            other => Rejection::InvalidName(other.to_string()),
        };
        self.conclude(identity, op, target, Outcome::Rejected(rejection), Some(&error))
    }

    /// Emit the single audit record for a request and hand its outcome back
    fn conclude<T>(
        &self,
        identity: &PeerIdentity,
        op: &Operation,
        target: &str,
        outcome: Outcome<T>,
        cause: Option<&Error>,
    ) -> Outcome<T> {
        let mut record = AuditRecord::new(
            identity.audit_name(),
            op.name(),
            target,
            outcome.audit_outcome(),
        );

        match (&outcome, cause) {
            (_, Some(error)) => record = record.with_error(error),
            (Outcome::Rejected(rejection), None) => {
                record = record.with_error(&rejection.clone().into_error())
            }
            (Outcome::Failed(error), None) => {
                if error.is_store_failure() {
                    tracing::debug!("{} by {} failed: {}", op, identity, error);
                } else {
                    tracing::error!("Unexpected failure during {} by {}: {}", op, identity, error);
                }
                record = record.with_error(error)
            }
            (Outcome::Proceeded(_), None) => {}
        }

        self.audit.record(&record);
        outcome
    }
}

/// Audits an admitted request whose future is dropped before the store
/// answers, so a cancelled request still leaves exactly one record.
struct PendingRequest<'a> {
    audit: &'a dyn AuditSink,
    identity: &'a PeerIdentity,
    op: &'a Operation,
    target: &'a str,
    settled: bool,
}

impl<'a> PendingRequest<'a> {
    fn new(
        gate: &'a AdmissionGate,
        identity: &'a PeerIdentity,
        op: &'a Operation,
        target: &'a str,
    ) -> Self {
        Self {
            audit: gate.audit.as_ref(),
            identity,
            op,
            target,
            settled: false,
        }
    }

    /// The store answered; the caller concludes the request itself
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        tracing::warn!("{} by {} cancelled before completion", self.op, self.identity);
        let record = AuditRecord::new(
            self.identity.audit_name(),
            self.op.name(),
            self.target,
            AuditOutcome::Failed,
        )
        .with_error(&Error::Cancelled);
        self.audit.record(&record);
    }
}
