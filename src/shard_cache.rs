use crate::cache::{CacheHandle, CacheNode, CachePolicy, CleanupHandler};
use crate::config::{CacheConfig, DEFAULT_SHARD_COUNT};
use crate::error::{CacheError, Result};
use crate::lru_cache_policy::LruCachePolicy;
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A sharded cache for high-concurrency scenarios.
///
/// The key space is partitioned across a fixed number of independent
/// policies, each with its own lock, so contention is bounded to the keys of
/// one shard. Every operation on a key is routed to `hash(key) % shard_count`;
/// `prune`, `clear` and handler registration visit the shards one at a time
/// in index order.
///
/// Each shard is created with the full configured capacity: the worst-case
/// resident set is `shard_count * capacity`. Divide the intended total by the
/// shard count when a global bound is required. There is no eviction order
/// across shards.
///
/// # Type Parameters
///
/// * `K` - The type of keys used in the cache. Must implement `Clone + Debug + Hash + Eq + Send + Sync + 'static`
/// * `V` - The type of values stored in the cache. Must implement `Send + Sync + 'static`
///
/// # Examples
///
/// ```rust
/// use lru_shard_cache::{CachePolicy, ShardCache};
///
/// let cache = ShardCache::new(1000);
/// cache.insert("key1".to_string(), "value1".to_string(), None);
///
/// let handle = cache.get(&"key1".to_string()).unwrap();
/// assert_eq!(handle.value(), "value1");
/// cache.release(handle);
/// ```
pub struct ShardCache<K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    shards: Vec<Box<dyn CachePolicy<K, V>>>,
    config: CacheConfig,
}

impl<K, V> ShardCache<K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache of `DEFAULT_SHARD_COUNT` LRU shards, each holding up
    /// to `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0
    pub fn new(capacity: usize) -> Self {
        Self::with_shards(capacity, DEFAULT_SHARD_COUNT)
    }

    /// Creates a cache of `shard_count` LRU shards, each holding up to
    /// `capacity` entries.
    ///
    /// # Panics
    ///
    /// Panics if capacity or shard count is 0
    pub fn with_shards(capacity: usize, shard_count: usize) -> Self {
        assert!(capacity > 0, "Capacity must be positive");
        assert!(shard_count > 0, "Shard count must be positive");
        Self::build(CacheConfig::new(capacity).shard_count(shard_count))
    }

    /// Creates a cache from a validated configuration.
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    /// Wraps caller-supplied policies, one per shard.
    ///
    /// The configured capacity reported by [`shard_capacity`](Self::shard_capacity)
    /// is taken from the first policy.
    pub fn from_policies(policies: Vec<Box<dyn CachePolicy<K, V>>>) -> Result<Self> {
        let capacity = match policies.first() {
            Some(policy) => policy.capacity(),
            None => return Err(CacheError::invalid_config("at least one shard is required")),
        };
        let config = CacheConfig::new(capacity).shard_count(policies.len());
        config.validate()?;
        Ok(Self {
            shards: policies,
            config,
        })
    }

    fn build(config: CacheConfig) -> Self {
        let shards = (0..config.shard_count)
            .map(|_| Box::new(LruCachePolicy::new(config.capacity)) as Box<dyn CachePolicy<K, V>>)
            .collect();
        debug!(
            shards = config.shard_count,
            shard_capacity = config.capacity,
            "created shard cache"
        );
        Self { shards, config }
    }

    /// Returns the number of shards in the cache.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Returns the capacity of each individual shard.
    pub fn shard_capacity(&self) -> usize {
        self.config.capacity
    }

    /// Returns the configuration the cache was built from.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Converts an integer TTL in the configured unit. Zero means no expiry.
    pub fn ttl(&self, units: u32) -> Option<Duration> {
        self.config.ttl(units)
    }

    /// Determines which shard a key belongs to.
    pub fn shard_index(&self, key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    fn shard_for(&self, key: &K) -> &dyn CachePolicy<K, V> {
        self.shards[self.shard_index(key)].as_ref()
    }
}

impl<K, V> CachePolicy<K, V> for ShardCache<K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "shard.cache"
    }

    fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        self.shard_for(&key).insert(key, value, ttl)
    }

    fn get(&self, key: &K) -> Option<CacheHandle<'_, K, V>> {
        self.shard_for(key).get(key)
    }

    fn release(&self, handle: CacheHandle<'_, K, V>) {
        // The handle carries its key, so no caller bookkeeping is needed
        self.shard_for(handle.key()).release(handle)
    }

    fn unpin(&self, node: Arc<CacheNode<K, V>>) {
        self.shard_for(node.key()).unpin(node)
    }

    fn prune(&self) {
        for shard in &self.shards {
            shard.prune();
        }
    }

    fn erase(&self, key: &K) {
        self.shard_for(key).erase(key)
    }

    fn register_cleanup_handler(&self, handler: CleanupHandler<K, V>) {
        for shard in &self.shards {
            shard.register_cleanup_handler(Arc::clone(&handler));
        }
    }

    fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.len()).sum()
    }

    fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.is_empty())
    }

    /// Worst-case resident count across all shards.
    fn capacity(&self) -> usize {
        self.shards.iter().map(|shard| shard.capacity()).sum()
    }

    fn clear(&self) {
        for shard in &self.shards {
            shard.clear();
        }
    }
}
