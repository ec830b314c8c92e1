//! In-memory document store.
//!
//! Behaves like a single Firestore database: collections are ordered by
//! document name, batches apply atomically, and merge writes create missing
//! documents. Query and commit calls are counted, and failures can be
//! injected, so engine code can be exercised without a real database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::trace;

use crate::{Document, DocumentStore, Filter, Query, RawRecord, StoreError, WriteOp};

type Collection = BTreeMap<String, RawRecord>;

/// Thread-safe in-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
    queries: AtomicUsize,
    commits: AtomicUsize,
    failing_queries: AtomicUsize,
    failing_commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document.
    pub async fn insert(&self, collection: &str, id: &str, fields: RawRecord) {
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
    }

    /// Fetch a document body by ID.
    pub async fn get(&self, collection: &str, id: &str) -> Option<RawRecord> {
        self.collections
            .read()
            .await
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Number of `query` calls served so far, including failed ones.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Number of successful `commit` calls.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next `n` queries fail.
    pub fn fail_next_queries(&self, n: usize) {
        self.failing_queries.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail without applying any writes.
    pub fn fail_next_commits(&self, n: usize) {
        self.failing_commits.store(n, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn matches_filter(fields: &RawRecord, filter: Option<&Filter>) -> bool {
    match filter {
        None => true,
        Some(Filter::NotNull(field)) => fields
            .get(field)
            .is_some_and(|v| !matches!(v, crate::FieldValue::Null)),
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn query(&self, collection: &str, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_queries) {
            return Err(StoreError::Unavailable(format!(
                "injected query failure on {}",
                collection
            )));
        }

        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let limit = query.limit.unwrap_or(usize::MAX);
        let page: Vec<Document> = docs
            .iter()
            .filter(|(id, _)| {
                query
                    .start_after
                    .as_deref()
                    .is_none_or(|cursor| id.as_str() > cursor)
            })
            .filter(|(_, fields)| matches_filter(fields, query.filter.as_ref()))
            .take(limit)
            .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
            .collect();

        trace!(collection, returned = page.len(), "memory query");
        Ok(page)
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_commits) {
            return Err(StoreError::Unavailable(format!(
                "injected commit failure ({} writes)",
                writes.len()
            )));
        }

        let mut collections = self.collections.write().await;

        // Check preconditions up front so a failing batch leaves no partial writes.
        for write in &writes {
            if let WriteOp::DeleteField { collection, id, .. } = write {
                let exists = collections
                    .get(collection)
                    .is_some_and(|docs| docs.contains_key(id));
                if !exists {
                    return Err(StoreError::NotFound {
                        collection: collection.clone(),
                        id: id.clone(),
                    });
                }
            }
        }

        for write in writes {
            match write {
                WriteOp::Merge {
                    collection,
                    id,
                    fields,
                } => {
                    let doc = collections.entry(collection).or_default().entry(id).or_default();
                    doc.extend(fields);
                }
                WriteOp::DeleteField {
                    collection,
                    id,
                    field,
                } => {
                    if let Some(doc) = collections.get_mut(&collection).and_then(|d| d.get_mut(&id)) {
                        doc.remove(&field);
                    }
                }
            }
        }

        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
