// Two-tier state cache for session, tier, and conversation-state lookups
//
// L1 is a bounded, TTL-expiring in-process map; L2 is a durable document
// store behind the DocumentStore trait (Firestore in production, shared
// with writers outside this process, so L1 is only ever a cache and never
// authoritative).
//
// Key design decisions:
// - Write-through on set: the durable write happens first, and L1 is only
//   updated after it succeeds (a failed write leaves the cache untouched)
// - Partial updates merge into the cached value rather than replacing it
// - L2 read errors degrade to cache misses; a cache is best-effort on reads
// - The L1 mutex is never held across an await, an L2 call, a clock read,
//   or a log statement
// - Eviction is FIFO by insertion time; TTL expiry is lazy on read

pub mod cache;
pub mod error;
pub mod memory;
pub mod store;

// Re-exports for convenience
pub use cache::{StateCache, DEFAULT_MAX_ENTRIES};
pub use error::{Result, StateError};
pub use memory::InMemoryDocumentStore;
pub use store::DocumentStore;
