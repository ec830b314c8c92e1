//! Core types for document access.

use crate::{FieldValue, RawRecord};

/// Name of the Firestore database every collection lives in.
pub const DEFAULT_DATABASE: &str = "(default)";

/// A document fetched from a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document ID (last path segment).
    pub id: String,
    /// Document body. Empty when the document carries no data.
    pub fields: RawRecord,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: RawRecord) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// The document body, or `None` when the document has no data.
    pub fn data(&self) -> Option<&RawRecord> {
        (!self.fields.is_empty()).then_some(&self.fields)
    }

    /// Look up a top-level field.
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }
}

/// Filter applied to a collection query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Field is present and not null.
    NotNull(String),
}

/// A query over a single collection.
///
/// Unfiltered queries are ordered by document name so that `start_after`
/// can be used as a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    /// Maximum number of documents to return.
    pub limit: Option<usize>,
    /// Resume after this document ID.
    pub start_after: Option<String>,
    /// Optional field filter.
    pub filter: Option<Filter>,
}

impl Query {
    /// A page of at most `limit` documents ordered by name.
    pub fn page(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    /// All documents whose `field` is present and not null.
    pub fn not_null(field: impl Into<String>) -> Self {
        Self {
            filter: Some(Filter::NotNull(field.into())),
            ..Default::default()
        }
    }

    pub fn start_after(mut self, cursor: Option<String>) -> Self {
        self.start_after = cursor;
        self
    }
}

/// A single write in an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Merge the given top-level fields into the document, creating it if needed.
    Merge {
        collection: String,
        id: String,
        fields: RawRecord,
    },
    /// Remove one top-level field from an existing document.
    DeleteField {
        collection: String,
        id: String,
        field: String,
    },
}

impl WriteOp {
    pub fn collection(&self) -> &str {
        match self {
            WriteOp::Merge { collection, .. } | WriteOp::DeleteField { collection, .. } => collection,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            WriteOp::Merge { id, .. } | WriteOp::DeleteField { id, .. } => id,
        }
    }
}
