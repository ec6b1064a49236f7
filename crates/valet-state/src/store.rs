// Durable document store contract (the L2 tier)
//
// This trait is the seam between the cache and whatever durable backend
// the deployment uses. Implementations can:
// - Call a hosted document database (Firestore-like) in production
// - Keep documents in memory for examples and testing
//
// The store is authoritative and shared with writers outside this process;
// the cache in front of it never is.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// Trait for a durable, collection/id addressed document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document, `None` if it does not exist
    async fn get_document(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Write a document
    ///
    /// With `merge` set, top-level fields of `data` are merged into the
    /// existing document; otherwise the document is replaced.
    async fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool)
        -> Result<()>;

    /// Delete a document (deleting a missing document is not an error)
    async fn delete_document(&self, collection: &str, id: &str) -> Result<()>;
}
