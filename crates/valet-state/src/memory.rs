// In-memory document store for examples and testing
//
// Keeps all documents in memory, making it perfect for:
// - Unit and integration tests of the cache's two-tier behavior
// - Standalone examples that don't need a real backend
//
// Beyond the DocumentStore contract it offers failure injection and
// read/write counters so tests can assert exactly how much L2 traffic the
// cache generated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{Result, StateError};
use crate::store::DocumentStore;

/// In-memory document store
///
/// Documents live in a HashMap keyed by `"{collection}:{id}"`.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    documents: Arc<RwLock<HashMap<String, Value>>>,
    reads: Arc<AtomicUsize>,
    writes: Arc<AtomicUsize>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryDocumentStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a document (useful for testing)
    pub async fn seed(&self, collection: &str, id: &str, value: Value) {
        self.documents
            .write()
            .await
            .insert(doc_key(collection, id), value);
    }

    /// Number of reads served (including misses)
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of writes and deletes performed (including injected failures)
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make subsequent reads fail
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    /// True if the store holds no documents
    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StateError::store("injected read failure"));
        }
        Ok(self
            .documents
            .read()
            .await
            .get(&doc_key(collection, id))
            .cloned())
    }

    async fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        merge: bool,
    ) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::store("injected write failure"));
        }

        let key = doc_key(collection, id);
        let mut documents = self.documents.write().await;
        match documents.get_mut(&key) {
            Some(existing) if merge => merge_into(existing, data),
            _ => {
                documents.insert(key, data);
            }
        }
        Ok(())
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StateError::store("injected write failure"));
        }
        self.documents.write().await.remove(&doc_key(collection, id));
        Ok(())
    }
}

fn doc_key(collection: &str, id: &str) -> String {
    format!("{collection}:{id}")
}

/// Merge top-level fields of `data` into `existing`
///
/// Falls back to replacement when either side is not a JSON object.
fn merge_into(existing: &mut Value, data: Value) {
    match (existing.as_object_mut(), data) {
        (Some(target), Value::Object(fields)) => {
            for (key, value) in fields {
                target.insert(key, value);
            }
        }
        (_, data) => *existing = data,
    }
}
