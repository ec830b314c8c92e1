//! The document store seam.

use async_trait::async_trait;

use crate::{Document, Query, StoreError, WriteOp};

/// A document database the migration tooling can read from and write to.
///
/// Implementations must apply each `commit` atomically: either every write
/// in the batch lands or none does.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Run a query against a single collection.
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Apply a batch of writes atomically.
    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError>;
}
