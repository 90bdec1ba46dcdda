//! Document-store boundary used by [`PersistentStorage`](crate::PersistentStorage).
//!
//! A document is a JSON object; a query is a JSON object whose entries must all
//! equal the corresponding top-level document fields. An empty query matches
//! every document.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::StorageError;

/// One stored record.
pub type Document = Map<String, Value>;

/// Equality filter on top-level document fields.
pub type Query = Map<String, Value>;

/// Minimal document store the persistent storage writes task snapshots to.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Adds a document.
    async fn insert(&self, doc: Document) -> Result<(), StorageError>;

    /// All documents matching `query`, in insertion order.
    async fn find(&self, query: &Query) -> Result<Vec<Document>, StorageError>;

    /// First document matching `query`.
    async fn find_one(&self, query: &Query) -> Result<Option<Document>, StorageError> {
        Ok(self.find(query).await?.into_iter().next())
    }

    /// Deletes every document matching `query`; returns how many were deleted.
    async fn remove(&self, query: &Query) -> Result<usize, StorageError>;

    /// Replaces every document matching `query` with `doc` in one step, or
    /// inserts `doc` if none matches. Readers see either the old documents or
    /// the new one, never neither.
    async fn replace(&self, query: &Query, doc: Document) -> Result<(), StorageError>;

    /// Number of documents matching `query`.
    async fn count(&self, query: &Query) -> Result<usize, StorageError> {
        Ok(self.find(query).await?.len())
    }
}

/// [`DocumentStore`] kept in process memory. Useful for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<Vec<Document>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of documents.
    pub fn len(&self) -> usize {
        self.docs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.lock().is_empty()
    }
}

fn matches(doc: &Document, query: &Query) -> bool {
    query.iter().all(|(k, v)| doc.get(k) == Some(v))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn insert(&self, doc: Document) -> Result<(), StorageError> {
        self.docs.lock().push(doc);
        Ok(())
    }

    async fn find(&self, query: &Query) -> Result<Vec<Document>, StorageError> {
        Ok(self
            .docs
            .lock()
            .iter()
            .filter(|d| matches(d, query))
            .cloned()
            .collect())
    }

    async fn remove(&self, query: &Query) -> Result<usize, StorageError> {
        let mut docs = self.docs.lock();
        let before = docs.len();
        docs.retain(|d| !matches(d, query));
        Ok(before - docs.len())
    }

    async fn replace(&self, query: &Query, doc: Document) -> Result<(), StorageError> {
        let mut docs = self.docs.lock();
        docs.retain(|d| !matches(d, query));
        docs.push(doc);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(v: Value) -> Document {
        match v {
            Value::Object(m) => m,
            _ => unreachable!("test documents are objects"),
        }
    }

    #[tokio::test]
    async fn query_is_equality_on_top_level_fields() {
        let store = MemoryDocumentStore::new();
        store.insert(doc(json!({"id": "a", "set": "waiting"}))).await.unwrap();
        store.insert(doc(json!({"id": "b", "set": "running"}))).await.unwrap();
        store.insert(doc(json!({"id": "c", "set": "waiting"}))).await.unwrap();

        let q = doc(json!({"set": "waiting"}));
        assert_eq!(store.count(&q).await.unwrap(), 2);
        assert_eq!(store.find(&Query::new()).await.unwrap().len(), 3);

        let first = store.find_one(&q).await.unwrap().expect("match");
        assert_eq!(first["id"], json!("a"));

        assert_eq!(store.remove(&q).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.remove(&q).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_swaps_matches_or_inserts() {
        let store = MemoryDocumentStore::new();
        store.insert(doc(json!({"id": "a", "set": "running"}))).await.unwrap();

        let by_id = doc(json!({"id": "a"}));
        store
            .replace(&by_id, doc(json!({"id": "a", "set": "waiting"})))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.find_one(&by_id).await.unwrap().unwrap()["set"], json!("waiting"));

        store
            .replace(&doc(json!({"id": "b"})), doc(json!({"id": "b", "set": "complete"})))
            .await
            .unwrap();
        assert_eq!(store.len(), 2);
    }
}
