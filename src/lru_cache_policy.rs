use crate::cache::{CacheHandle, CacheNode, CachePolicy, CleanupHandler};
use crate::error::{CacheError, Result};
use parking_lot::lock_api::{Mutex, RawMutex};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

const NIL: usize = usize::MAX;

// Slab entry owning a node plus its bookkeeping
struct Slot<K, V> {
    node: Arc<CacheNode<K, V>>,
    refs: usize,
    // false once evicted or erased; the slot then only waits for its last unpin
    in_cache: bool,
    prev: usize,
    next: usize,
}

// Lookup table and recency list, always mutated together under one lock.
// The list is threaded through the slab: head is most recently used.
struct LruState<K, V> {
    slots: Vec<Option<Slot<K, V>>>,
    free: Vec<usize>,
    head: usize,
    tail: usize,
    list_len: usize,
    map: HashMap<K, usize>,
    handler: Option<CleanupHandler<K, V>>,
}

impl<K, V> LruState<K, V>
where
    K: Clone + Debug + Hash + Eq,
{
    fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            list_len: 0,
            map: HashMap::with_capacity(capacity),
            handler: None,
        }
    }

    fn slot(&self, idx: usize) -> &Slot<K, V> {
        match self.slots.get(idx).and_then(Option::as_ref) {
            Some(slot) => slot,
            None => panic!("cache slot {idx} is vacant"),
        }
    }

    fn slot_mut(&mut self, idx: usize) -> &mut Slot<K, V> {
        match self.slots.get_mut(idx).and_then(Option::as_mut) {
            Some(slot) => slot,
            None => panic!("cache slot {idx} is vacant"),
        }
    }

    fn alloc(&mut self, key: K, value: V, ttl: Option<Duration>) -> usize {
        let idx = self.free.pop().unwrap_or(self.slots.len());
        let slot = Slot {
            node: Arc::new(CacheNode::new(key, value, ttl, idx)),
            refs: 0,
            in_cache: true,
            prev: NIL,
            next: NIL,
        };
        if idx == self.slots.len() {
            self.slots.push(Some(slot));
        } else {
            self.slots[idx] = Some(slot);
        }
        idx
    }

    fn release_slot(&mut self, idx: usize) -> Arc<CacheNode<K, V>> {
        match self.slots.get_mut(idx).and_then(Option::take) {
            Some(slot) => {
                self.free.push(idx);
                slot.node
            }
            None => panic!("cache slot {idx} is vacant"),
        }
    }

    // Insert node at the front of the list
    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        {
            let slot = self.slot_mut(idx);
            slot.prev = NIL;
            slot.next = old_head;
        }
        if old_head != NIL {
            self.slot_mut(old_head).prev = idx;
        } else {
            // Empty list case
            self.tail = idx;
        }
        self.head = idx;
        self.list_len += 1;
    }

    // Remove specified node from the list
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slot(idx);
            (slot.prev, slot.next)
        };

        if prev != NIL {
            self.slot_mut(prev).next = next;
        } else {
            self.head = next;
        }

        if next != NIL {
            self.slot_mut(next).prev = prev;
        } else {
            self.tail = prev;
        }

        let slot = self.slot_mut(idx);
        slot.prev = NIL;
        slot.next = NIL;
        self.list_len -= 1;
    }

    fn reinsert_front(&mut self, idx: usize) {
        if self.head != idx {
            self.unlink(idx);
            self.push_front(idx);
        }
    }

    // Least recently used entry nobody holds a handle to
    fn lru_unpinned(&self) -> Option<usize> {
        let mut idx = self.tail;
        while idx != NIL {
            let slot = self.slot(idx);
            if slot.refs == 0 {
                return Some(idx);
            }
            idx = slot.prev;
        }
        None
    }

    // Takes a live entry out of the lookup table and recency list. The node
    // is destroyed right away if unpinned, otherwise on its last unpin.
    fn detach(&mut self, idx: usize, discarded: &mut Vec<Arc<CacheNode<K, V>>>) {
        self.unlink(idx);
        let (node, refs) = {
            let slot = self.slot_mut(idx);
            slot.in_cache = false;
            (Arc::clone(&slot.node), slot.refs)
        };
        self.map.remove(node.key());

        if refs == 0 {
            drop(node);
            discarded.push(self.release_slot(idx));
        } else {
            debug!(key = ?node.key(), refs, "deferring destruction of pinned entry");
        }
    }

    fn pending_len(&self) -> usize {
        self.slots.len() - self.free.len() - self.map.len()
    }

    fn check_invariants(&self) -> Result<()> {
        if self.map.len() != self.list_len {
            return Err(CacheError::invariant(format!(
                "lookup table has {} entries, recency list has {}",
                self.map.len(),
                self.list_len
            )));
        }

        let mut walked = 0;
        let mut prev = NIL;
        let mut idx = self.head;
        while idx != NIL {
            let slot = match self.slots.get(idx).and_then(Option::as_ref) {
                Some(slot) => slot,
                None => {
                    return Err(CacheError::invariant(format!(
                        "recency list links vacant slot {idx}"
                    )))
                }
            };
            if slot.prev != prev {
                return Err(CacheError::invariant(format!(
                    "slot {idx} has a broken back link"
                )));
            }
            if !slot.in_cache {
                return Err(CacheError::invariant(format!(
                    "detached slot {idx} is still linked"
                )));
            }
            if self.map.get(slot.node.key()) != Some(&idx) {
                return Err(CacheError::invariant(format!(
                    "key {:?} does not map to its list slot {idx}",
                    slot.node.key()
                )));
            }
            walked += 1;
            prev = idx;
            idx = slot.next;
        }

        if walked != self.list_len || prev != self.tail {
            return Err(CacheError::invariant(format!(
                "walked {walked} list entries, expected {}",
                self.list_len
            )));
        }

        for (idx, slot) in self.slots.iter().enumerate() {
            if let Some(slot) = slot {
                if !slot.in_cache && slot.refs == 0 {
                    return Err(CacheError::invariant(format!(
                        "detached slot {idx} outlived its last handle"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// An LRU eviction policy with per-entry TTL and pinned entries.
///
/// All state lives behind one lock of type `R`, which defaults to
/// [`parking_lot::RawMutex`]. Every operation is a bounded critical section;
/// cleanup handlers are invoked after the lock has been released, in the
/// order the values were discarded.
///
/// `insert` evicts before linking the new entry, so the resident count stays
/// within capacity after every insert unless all resident entries are pinned.
///
/// # Type Parameters
///
/// * `K` - The type of keys used in the cache. Must implement `Clone + Debug + Hash + Eq + Send + Sync + 'static`
/// * `V` - The type of values stored in the cache. Must implement `Send + Sync + 'static`
/// * `R` - The raw mutex guarding the cache state
///
/// # Examples
///
/// ```rust
/// use lru_shard_cache::{CachePolicy, LruCachePolicy};
/// use std::sync::Arc;
///
/// let cache = LruCachePolicy::new(2);
/// cache.register_cleanup_handler(Arc::new(|key: String, _value: u32| {
///     println!("discarded {key}");
/// }));
///
/// cache.insert("key1".to_string(), 1, None);
/// let handle = cache.get(&"key1".to_string()).unwrap();
/// assert_eq!(*handle, 1);
/// cache.release(handle);
/// ```
pub struct LruCachePolicy<K, V, R = parking_lot::RawMutex>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: RawMutex + Send + Sync + 'static,
{
    cap: usize,
    state: Mutex<R, LruState<K, V>>,
}

impl<K, V> LruCachePolicy<K, V>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        Self::with_lock(capacity)
    }
}

impl<K, V, R> LruCachePolicy<K, V, R>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: RawMutex + Send + Sync + 'static,
{
    /// Creates a policy guarded by the raw mutex `R`.
    pub fn with_lock(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be positive");
        Self {
            cap: capacity,
            state: Mutex::new(LruState::new(capacity)),
        }
    }

    /// Returns the number of evicted entries still held by a handle.
    pub fn pending_len(&self) -> usize {
        self.state.lock().pending_len()
    }

    /// Verifies that the lookup table and recency list agree.
    pub fn check_invariants(&self) -> Result<()> {
        self.state.lock().check_invariants()
    }

    fn discard(
        handler: Option<CleanupHandler<K, V>>,
        discarded: Vec<Arc<CacheNode<K, V>>>,
    ) {
        for node in discarded {
            match Arc::try_unwrap(node) {
                Ok(node) => {
                    let (key, value) = node.into_parts();
                    if let Some(handler) = &handler {
                        handler(key, value);
                    }
                }
                // A slot is released only at refs == 0 under the lock, and
                // unpin drops its clone before unlocking.
                Err(_) => unreachable!("discarded cache entry is still shared"),
            }
        }
    }
}

impl<K, V, R> CachePolicy<K, V> for LruCachePolicy<K, V, R>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: RawMutex + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "lru.cache"
    }

    fn insert(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut discarded = Vec::new();
        let handler = {
            let mut state = self.state.lock();

            // 1. Replace in place: the old entry is discarded like an erase
            if let Some(&idx) = state.map.get(&key) {
                trace!(key = ?key, "replacing cached entry");
                state.detach(idx, &mut discarded);
            }

            // 2. Make room before linking the new entry
            while state.map.len() >= self.cap {
                match state.lru_unpinned() {
                    Some(idx) => {
                        debug!(key = ?state.slot(idx).node.key(), "evicting least recently used entry");
                        state.detach(idx, &mut discarded);
                    }
                    None => {
                        warn!(
                            resident = state.map.len(),
                            capacity = self.cap,
                            "all entries are pinned, exceeding capacity"
                        );
                        break;
                    }
                }
            }

            // 3. Link the new entry as most recently used
            let idx = state.alloc(key.clone(), value, ttl);
            state.map.insert(key, idx);
            state.push_front(idx);

            debug_assert_eq!(state.map.len(), state.list_len);
            state.handler.clone()
        };
        Self::discard(handler, discarded);
    }

    fn get(&self, key: &K) -> Option<CacheHandle<'_, K, V>> {
        let mut discarded = Vec::new();
        let (node, handler) = {
            let mut state = self.state.lock();
            let idx = match state.map.get(key) {
                Some(&idx) => idx,
                None => {
                    trace!(key = ?key, "cache miss");
                    return None;
                }
            };

            if state.slot(idx).node.is_expired(Instant::now()) {
                debug!(key = ?key, "evicting expired entry on lookup");
                state.detach(idx, &mut discarded);
                (None, state.handler.clone())
            } else {
                let node = {
                    let slot = state.slot_mut(idx);
                    slot.refs += 1;
                    Arc::clone(&slot.node)
                };
                state.reinsert_front(idx);
                (Some(node), None)
            }
        };
        Self::discard(handler, discarded);
        node.map(|node| CacheHandle::new(node, self))
    }

    fn unpin(&self, node: Arc<CacheNode<K, V>>) {
        let mut discarded = Vec::new();
        let handler = {
            let mut state = self.state.lock();
            let idx = node.slot();
            let (refs, in_cache) = match state.slots.get_mut(idx).and_then(Option::as_mut) {
                Some(slot) if Arc::ptr_eq(&slot.node, &node) => {
                    assert!(
                        slot.refs > 0,
                        "cache node released more times than it was acquired"
                    );
                    slot.refs -= 1;
                    (slot.refs, slot.in_cache)
                }
                _ => panic!("released a node this cache does not own"),
            };
            // Must not outlive the lock: once refs hits zero another thread
            // may detach the slot and unwrap the last Arc.
            drop(node);

            if refs == 0 && !in_cache {
                debug!(
                    key = ?state.slot(idx).node.key(),
                    "destroying evicted entry after last release"
                );
                discarded.push(state.release_slot(idx));
                state.handler.clone()
            } else {
                None
            }
        };
        Self::discard(handler, discarded);
    }

    fn prune(&self) {
        let mut discarded = Vec::new();
        let handler = {
            let mut state = self.state.lock();
            let now = Instant::now();

            // Expired entries go first, wherever they sit in the list
            let mut idx = state.tail;
            while idx != NIL {
                let (prev, expired) = {
                    let slot = state.slot(idx);
                    (slot.prev, slot.node.is_expired(now))
                };
                if expired {
                    debug!(key = ?state.slot(idx).node.key(), "evicting expired entry");
                    state.detach(idx, &mut discarded);
                }
                idx = prev;
            }

            while state.map.len() > self.cap {
                match state.lru_unpinned() {
                    Some(idx) => {
                        debug!(key = ?state.slot(idx).node.key(), "evicting least recently used entry");
                        state.detach(idx, &mut discarded);
                    }
                    None => {
                        warn!(
                            resident = state.map.len(),
                            capacity = self.cap,
                            "all entries are pinned, exceeding capacity"
                        );
                        break;
                    }
                }
            }

            debug_assert_eq!(state.map.len(), state.list_len);
            state.handler.clone()
        };
        Self::discard(handler, discarded);
    }

    fn erase(&self, key: &K) {
        let mut discarded = Vec::new();
        let handler = {
            let mut state = self.state.lock();
            match state.map.get(key) {
                Some(&idx) => {
                    debug!(key = ?key, "erasing entry");
                    state.detach(idx, &mut discarded);
                }
                None => trace!(key = ?key, "erase of absent key"),
            }
            state.handler.clone()
        };
        Self::discard(handler, discarded);
    }

    fn register_cleanup_handler(&self, handler: CleanupHandler<K, V>) {
        self.state.lock().handler = Some(handler);
    }

    fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    fn capacity(&self) -> usize {
        self.cap
    }

    fn clear(&self) {
        let mut discarded = Vec::new();
        let handler = {
            let mut state = self.state.lock();
            while state.head != NIL {
                let idx = state.head;
                state.detach(idx, &mut discarded);
            }
            state.handler.clone()
        };
        Self::discard(handler, discarded);
    }
}

impl<K, V, R> Drop for LruCachePolicy<K, V, R>
where
    K: Clone + Debug + Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
    R: RawMutex + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let handler = state.handler.take();
        state.map.clear();
        for slot in state.slots.iter_mut().filter_map(Option::take) {
            // A forgotten handle keeps its clone alive forever
            match Arc::try_unwrap(slot.node) {
                Ok(node) => {
                    let (key, value) = node.into_parts();
                    if let Some(handler) = &handler {
                        handler(key, value);
                    }
                }
                Err(node) => warn!(key = ?node.key(), "leaked handle outlived its cache"),
            }
        }
    }
}
