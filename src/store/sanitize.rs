//! Name sanitization for the flat store.
//!
//! Syntax checks are pure string checks and run before any filesystem call.
//! Lookup names additionally get a containment check against the canonical
//! store root, which catches symlinks planted inside the root.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A name that passed sanitization. Only this module can construct one, so
/// every store lookup is statically known to be validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SafeName(String);

impl SafeName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Unchecked constructor for store tests
    #[cfg(test)]
    pub(crate) fn composed(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for SafeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SafeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Longest file name most filesystems accept, in bytes
pub const MAX_NAME_BYTES: usize = 255;

/// Longest original upload name: room is left for the widest
/// `<millis>-` prefix an `i64` timestamp can produce.
pub const MAX_ORIGINAL_NAME_BYTES: usize = MAX_NAME_BYTES - 21;

/// Validate the syntax of a caller- or upload-supplied name.
pub fn check_syntax(raw: &str) -> Result<()> {
    if raw.is_empty() {
        return Err(Error::InvalidName("name is empty".into()));
    }
    if raw.len() > MAX_NAME_BYTES {
        return Err(Error::InvalidName(format!("longer than {} bytes", MAX_NAME_BYTES)));
    }
    if raw.contains("..") {
        return Err(Error::InvalidName("parent directory reference".into()));
    }
    if raw.contains('/') || raw.contains('\\') {
        return Err(Error::InvalidName("path separator".into()));
    }
    if raw.chars().any(|c| c == '\0' || c.is_control()) {
        return Err(Error::InvalidName("control character".into()));
    }
    Ok(())
}

/// Sanitizer bound to one store root
#[derive(Debug, Clone)]
pub struct PathSanitizer {
    root: PathBuf,
}

impl PathSanitizer {
    /// Create a sanitizer for `root`. The root must be the canonical path
    /// of an existing directory (the file store canonicalizes it on open).
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate an original upload name. The stored name is composed by the
    /// store, never taken verbatim from the caller.
    pub fn upload_name(&self, raw: &str) -> Result<SafeName> {
        check_syntax(raw)?;
        if raw.len() > MAX_ORIGINAL_NAME_BYTES {
            return Err(Error::InvalidName(format!(
                "longer than {} bytes",
                MAX_ORIGINAL_NAME_BYTES
            )));
        }
        Ok(SafeName(raw.to_string()))
    }

    /// Validate a name used for Get/Delete. Returns the name unchanged on
    /// success. A name that does not exist yet passes; the store then
    /// reports NotFound.
    pub async fn lookup_name(&self, raw: &str) -> Result<SafeName> {
        check_syntax(raw)?;

        let joined = self.root.join(raw);
        match tokio::fs::canonicalize(&joined).await {
            Ok(resolved) if !resolved.starts_with(&self.root) => {
                tracing::warn!("Lookup of {:?} resolves outside the store root", raw);
                Err(Error::InvalidName("resolves outside the store".into()))
            }
            Ok(_) => Ok(SafeName(raw.to_string())),
            Err(e) => {
                tracing::trace!("Lookup of {:?} not resolvable: {}", raw, e);
                Ok(SafeName(raw.to_string()))
            }
        }
    }
}
