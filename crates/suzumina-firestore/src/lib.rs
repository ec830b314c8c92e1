//! Firestore document access for the suzumina.click migration tooling.
//!
//! This crate provides a schema-less view of Firestore documents and a
//! narrow store interface the migration engine is written against.
//!
//! ## Features
//!
//! - **Raw records**: `FieldValue`/`RawRecord` with legacy truthiness and REST encoding
//! - **Store seam**: `DocumentStore` trait with name-ordered paging and atomic batches
//! - **Memory store**: in-process implementation with call counters and failure injection
//! - **REST client**: `FirestoreClient` over `runQuery`/`commit`, production or emulator

mod client;
mod error;
mod memory;
mod store;
mod types;
pub mod value;

pub use client::{FirestoreClient, TokenSource, quote_field_path};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use store::DocumentStore;
pub use types::*;
pub use value::{FieldValue, RawRecord};
