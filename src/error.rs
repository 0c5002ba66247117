//! WolfVault Error Types

use thiserror::Error;

/// Result type alias for WolfVault operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfVault error types
#[derive(Error, Debug)]
pub enum Error {
    // Admission errors
    #[error("Unauthorized: a verified client certificate is required")]
    Unauthorized,

    #[error("Invalid name: {0}")]
    InvalidName(String),

    // Store errors
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Write failed for {name}: {source}")]
    WriteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Delete failed for {name}: {source}")]
    DeleteFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] std::io::Error),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Transport errors
    #[error("TLS error: {0}")]
    Tls(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Audit errors
    #[error("Audit error: {0}")]
    Audit(String),

    // Request lifecycle
    #[error("Request cancelled before completion")]
    Cancelled,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short stable tag used in audit records and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Unauthorized => "Unauthorized",
            Error::InvalidName(_) => "InvalidName",
            Error::NotFound(_) => "NotFound",
            Error::WriteFailed { .. } => "WriteFailed",
            Error::DeleteFailed { .. } => "DeleteFailed",
            Error::StoreUnavailable(_) => "StoreUnavailable",
            Error::Config(_) | Error::ConfigParse(_) => "Config",
            Error::Tls(_) => "Tls",
            Error::Io(_) => "Io",
            Error::Audit(_) => "Audit",
            Error::Cancelled => "Cancelled",
            Error::Internal(_) => "InternalUnexpected",
        }
    }

    /// Check if this error is decided by the admission gate alone,
    /// without any store access
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::Unauthorized | Error::InvalidName(_))
    }

    /// Check if this error originates in the file store
    pub fn is_store_failure(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::WriteFailed { .. }
                | Error::DeleteFailed { .. }
                | Error::StoreUnavailable(_)
        )
    }
}

impl From<rustls::Error> for Error {
    fn from(e: rustls::Error) -> Self {
        Error::Tls(e.to_string())
    }
}
