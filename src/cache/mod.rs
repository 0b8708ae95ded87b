//! Tiered cache for audio artifacts.
//!
//! A byte-bounded LRU memory tier sits in front of a durable on-disk store
//! with TTL expiry. [`CacheManager`] coordinates the two.

pub mod lru;
pub mod manager;
pub mod persistent;

// Re-export commonly used types
pub use lru::{LruStats, LruStore};
pub use manager::{CacheManager, CacheStats};
pub use persistent::{PersistentStore, StoredEntry};
