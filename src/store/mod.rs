//! File Store Module
//!
//! Flat, single-directory custody store:
//! - Names are sanitized before any filesystem access
//! - Uploads get a `<millis>-<original>` stored name, created exclusively
//! - Every list is a fresh directory read, there is no in-process cache

mod clock;
mod file_store;
mod object;
mod sanitize;

pub use clock::{Clock, FixedClock, SystemClock};
pub use file_store::{FileStore, ObjectReader, MAX_NAME_ATTEMPTS};
pub use object::{compose_stored_name, parse_stored_name, StoredObject};
pub use sanitize::{
    check_syntax, PathSanitizer, SafeName, MAX_NAME_BYTES, MAX_ORIGINAL_NAME_BYTES,
};
