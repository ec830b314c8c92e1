//! Error types for document store access.

use thiserror::Error;

/// Errors that can occur when reading from or writing to a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Could not obtain credentials for the store.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Document not found.
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Error status returned by the Firestore API.
    #[error("Firestore error ({status}): {message}")]
    Api { status: String, message: String },

    /// Invalid response from server.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A stored value could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The store refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}
