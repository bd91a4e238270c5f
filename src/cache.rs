use std::fmt::Debug;
use std::hash::Hash;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback invoked exactly once with every key/value pair a cache discards.
///
/// Handlers are always called after the shard lock has been released, so a
/// handler may call back into the cache that discarded the value.
pub type CleanupHandler<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

/// The contract every eviction policy implements.
///
/// Lookups hand out [`CacheHandle`]s that pin the entry: a pinned entry is
/// never destroyed, even when it is evicted or erased in the meantime. The
/// value is handed to the cleanup handler once the last handle is released.
///
/// # Type Parameters
///
/// * `K` - The type of keys used in the cache. Must implement `Clone + Debug + Hash + Eq + Send + Sync + 'static`
/// * `V` - The type of values stored in the cache. Must implement `Send + Sync + 'static`
pub trait CachePolicy<K, V>: Send + Sync
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Static identifier used in diagnostics.
    fn name(&self) -> &'static str;

    /// Stores `value` under `key`, replacing any existing entry.
    ///
    /// A replaced entry is discarded like an erased one. `None` or a zero
    /// `ttl` means the entry never expires. May evict other entries to stay
    /// within capacity.
    fn insert(&self, key: K, value: V, ttl: Option<Duration>);

    /// Looks up `key`, pins the entry and marks it most recently used.
    ///
    /// Returns `None` if the key is absent or expired. An expired entry is
    /// evicted as part of the lookup.
    fn get(&self, key: &K) -> Option<CacheHandle<'_, K, V>>;

    /// Releases a handle obtained from [`get`](CachePolicy::get).
    ///
    /// Equivalent to dropping the handle.
    fn release(&self, handle: CacheHandle<'_, K, V>) {
        drop(handle);
    }

    /// Decrements the pin count of `node`, destroying it if it was already
    /// evicted and this was the last pin.
    ///
    /// Called by [`CacheHandle`] on drop; callers should release handles
    /// instead of calling this directly.
    fn unpin(&self, node: Arc<CacheNode<K, V>>);

    /// Removes expired entries, then evicts unpinned entries from the least
    /// recently used end until the cache is within capacity.
    fn prune(&self);

    /// Removes `key`. A pinned entry is destroyed when its last handle is released.
    fn erase(&self, key: &K);

    /// Installs the handler invoked for every discarded value, replacing any
    /// previous one. Intended to be called once, before the cache sees traffic.
    fn register_cleanup_handler(&self, handler: CleanupHandler<K, V>);

    /// Returns the number of resident entries.
    fn len(&self) -> usize;

    /// Returns true if no entry is resident.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the maximum number of resident unpinned entries.
    fn capacity(&self) -> usize;

    /// Removes every resident entry.
    fn clear(&self);
}

/// A cached key/value pair.
///
/// Nodes are immutable once created; recency and pin bookkeeping lives in
/// the owning policy. `slot` is an opaque locator assigned by that policy.
pub struct CacheNode<K, V> {
    key: K,
    value: V,
    expire_at: Option<Instant>,
    slot: usize,
}

impl<K, V> CacheNode<K, V> {
    pub(crate) fn new(key: K, value: V, ttl: Option<Duration>, slot: usize) -> Self {
        // A deadline past the clock's range is treated as no deadline
        let expire_at = ttl
            .filter(|ttl| !ttl.is_zero())
            .and_then(|ttl| Instant::now().checked_add(ttl));
        Self {
            key,
            value,
            expire_at,
            slot,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn expire_at(&self) -> Option<Instant> {
        self.expire_at
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expire_at.map_or(false, |at| now >= at)
    }

    pub fn into_parts(self) -> (K, V) {
        (self.key, self.value)
    }
}

/// A pinned reference to a cached entry.
///
/// The entry stays readable for as long as the handle lives, regardless of
/// concurrent eviction. Dropping the handle releases the pin.
///
/// # Examples
///
/// ```rust
/// use lru_shard_cache::{CachePolicy, LruCachePolicy};
///
/// let cache = LruCachePolicy::new(2);
/// cache.insert("key1".to_string(), "value1".to_string(), None);
///
/// let handle = cache.get(&"key1".to_string()).unwrap();
/// cache.erase(&"key1".to_string());
/// // Still readable until released
/// assert_eq!(handle.value(), "value1");
/// cache.release(handle);
/// ```
pub struct CacheHandle<'a, K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    node: ManuallyDrop<Arc<CacheNode<K, V>>>,
    owner: &'a dyn CachePolicy<K, V>,
}

impl<'a, K, V> CacheHandle<'a, K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Wraps a node already pinned by `owner`. The pin is returned to
    /// `owner` through [`CachePolicy::unpin`] when the handle is dropped.
    pub fn new(node: Arc<CacheNode<K, V>>, owner: &'a dyn CachePolicy<K, V>) -> Self {
        Self {
            node: ManuallyDrop::new(node),
            owner,
        }
    }

    pub fn key(&self) -> &K {
        self.node.key()
    }

    pub fn value(&self) -> &V {
        self.node.value()
    }

    pub fn expire_at(&self) -> Option<Instant> {
        self.node.expire_at()
    }
}

impl<K, V> Deref for CacheHandle<'_, K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    type Target = V;

    fn deref(&self) -> &V {
        self.value()
    }
}

impl<K, V> Debug for CacheHandle<'_, K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheHandle")
            .field("key", self.key())
            .field("owner", &self.owner.name())
            .finish()
    }
}

impl<K, V> Drop for CacheHandle<'_, K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn drop(&mut self) {
        // SAFETY: `node` is never touched again after this point.
        let node = unsafe { ManuallyDrop::take(&mut self.node) };
        self.owner.unpin(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::thread;

    // Records unpinned keys instead of managing real entries
    struct Recorder {
        unpinned: Mutex<Vec<u32>>,
    }

    impl CachePolicy<u32, String> for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }
        fn insert(&self, _key: u32, _value: String, _ttl: Option<Duration>) {}
        fn get(&self, _key: &u32) -> Option<CacheHandle<'_, u32, String>> {
            None
        }
        fn unpin(&self, node: Arc<CacheNode<u32, String>>) {
            self.unpinned.lock().push(*node.key());
        }
        fn prune(&self) {}
        fn erase(&self, _key: &u32) {}
        fn register_cleanup_handler(&self, _handler: CleanupHandler<u32, String>) {}
        fn len(&self) -> usize {
            0
        }
        fn capacity(&self) -> usize {
            0
        }
        fn clear(&self) {}
    }

    #[test]
    fn test_node_without_ttl_never_expires() {
        let node = CacheNode::new(1u32, "one", None, 0);
        assert_eq!(node.expire_at(), None);
        assert!(!node.is_expired(Instant::now() + Duration::from_secs(3600)));

        let node = CacheNode::new(1u32, "one", Some(Duration::ZERO), 0);
        assert_eq!(node.expire_at(), None);
    }

    #[test]
    fn test_node_expiry() {
        let node = CacheNode::new(1u32, "one", Some(Duration::from_millis(50)), 7);
        let at = node.expire_at().unwrap();
        assert!(!node.is_expired(at - Duration::from_millis(1)));
        assert!(node.is_expired(at));
        assert_eq!(node.slot(), 7);
        assert_eq!(node.into_parts(), (1, "one"));
    }

    #[test]
    fn test_handle_unpins_exactly_once() {
        let recorder = Recorder {
            unpinned: Mutex::new(Vec::new()),
        };

        let first = CacheHandle::new(Arc::new(CacheNode::new(1, "a".to_string(), None, 0)), &recorder);
        let second = CacheHandle::new(Arc::new(CacheNode::new(2, "b".to_string(), None, 1)), &recorder);
        assert_eq!(&*first, "a");
        assert_eq!(second.key(), &2);

        recorder.release(second);
        drop(first);
        assert_eq!(*recorder.unpinned.lock(), vec![2, 1]);
    }

    #[test]
    fn test_handle_can_move_across_threads() {
        let recorder = Recorder {
            unpinned: Mutex::new(Vec::new()),
        };
        let handle = CacheHandle::new(Arc::new(CacheNode::new(9, "x".to_string(), None, 0)), &recorder);

        thread::scope(|s| {
            s.spawn(move || {
                assert_eq!(handle.value(), "x");
            });
        });
        assert_eq!(*recorder.unpinned.lock(), vec![9]);
    }
}
