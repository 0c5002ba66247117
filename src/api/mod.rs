//! HTTP API Module
//!
//! Provides the mutual-TLS HTTPS surface for the custody operations.

mod http;
mod server;

pub use http::{
    create_router, error_response, DeleteResponse, ErrorResponse, HealthResponse, ListResponse,
    UploadResponse, UPLOAD_FIELD,
};
pub use server::VaultServer;
