//! A sharded, reference-counted LRU cache for key-value storage engines.
//!
//! This crate provides the in-memory caching layer that sits in front of a
//! storage engine's read and write paths:
//!
//! 1. [`CachePolicy`] - The contract every eviction policy implements
//! 2. [`LruCachePolicy`] - An LRU policy with per-entry TTL and pinned entries
//! 3. [`ShardCache`] - A dispatcher spreading keys over independent policies
//!
//! # Features
//!
//! - Thread-safe implementations, one lock per shard
//! - Lookups return a [`CacheHandle`] that keeps the entry alive until dropped
//! - Lazy TTL expiry on lookup, eager expiry on [`CachePolicy::prune`]
//! - A cleanup handler receives every discarded key/value pair exactly once
//! - Configurable shard count and per-shard capacity
//!
//! # Examples
//!
//! ```rust
//! use lru_shard_cache::{CachePolicy, ShardCache};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! // Four shards, each holding up to 1000 entries
//! let cache: ShardCache<u64, String> = ShardCache::with_shards(1000, 4);
//! cache.register_cleanup_handler(Arc::new(|key: u64, _value: String| {
//!     println!("evicted {key}");
//! }));
//!
//! cache.insert(42, "answer".to_string(), None);
//! cache.insert(7, "session".to_string(), Some(Duration::from_secs(30)));
//!
//! if let Some(handle) = cache.get(&42) {
//!     assert_eq!(handle.value(), "answer");
//!     cache.release(handle);
//! }
//!
//! cache.erase(&7);
//! cache.prune();
//! ```

pub mod cache;
pub mod config;
pub mod error;
mod ffi;
pub mod lru_cache_policy;
pub mod shard_cache;

pub use cache::{CacheHandle, CacheNode, CachePolicy, CleanupHandler};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use lru_cache_policy::LruCachePolicy;
pub use shard_cache::ShardCache;
