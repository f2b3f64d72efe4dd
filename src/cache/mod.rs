//! Sharded, reference-counted LRU cache with charge-based eviction.
//!
//! # Structure
//!
//! The cache is split into 16 independent shards; a key's 32-bit hash
//! routes it to shard `hash >> 28`, and every operation takes exactly one
//! shard's mutex. A separate mutex serves [`ShardedLruCache::new_id`],
//! which hands out IDs clients use to namespace their keys in a shared
//! cache.
//!
//! # Residency invariants (per shard)
//!
//! Each entry carries an `in_cache` flag and a reference count (the
//! cache's own reference included). At all times:
//!
//! - `refs >= 2 && in_cache` ⇔ the entry is on the **in-use** list
//!   (currently referenced by clients, unordered);
//! - `refs == 1 && in_cache` ⇔ the entry is on the **LRU** list, ordered
//!   by recency, eligible for eviction;
//! - `!in_cache` ⇔ the entry is on neither list: it has been erased,
//!   displaced, or evicted, and lives only until its last external
//!   reference is released.
//!
//! `in_cache` can only become false without the deleter running via
//! `erase`, an `insert` displacing an entry with the same key, or the
//! cache being dropped; in each of those cases the deleter runs as
//! soon as the last reference goes away. Every transition between the two
//! lists happens in `ref_handle`/`unref` when an entry gains or loses its
//! only external reference.
//!
//! `usage` is the sum of live charges; `insert` evicts from the cold end
//! of the LRU list until `usage <= capacity` or the LRU list is empty.
//! Capacity 0 is a valid pass-through mode that never retains anything.
//!
//! # Ownership
//!
//! Values are owned by their entry and handed to the deleter (by move)
//! when the entry dies; destruction is the deleter's responsibility.
//! [`CacheHandle`] is an RAII guard for one reference: it dereferences to
//! the value and releases on drop, so a caller can never leak a
//! reference.


use std::ops::Deref;
use std::ptr;
use std::sync::{Arc, Mutex, PoisonError};

use crate::hash::hash;

const NUM_SHARD_BITS: usize = 4;
const NUM_SHARDS: usize = 1 << NUM_SHARD_BITS;

/// Invoked with the key bytes and the owned value when an entry dies.
pub type DeleterFn<V> = Box<dyn FnOnce(&[u8], V) + Send>;

// ------------------------------------------------------------------------------------------------
// Handles
// ------------------------------------------------------------------------------------------------

/// One cache entry. Heap-allocated; lives until its reference count hits
/// zero, at which point the deleter consumes the value and the allocation
/// is freed.
struct LruHandle<V> {
    /// `None` only for list sentinels and momentarily while the deleter
    /// consumes a dying entry.
    value: Option<V>,
    deleter: Option<DeleterFn<V>>,
    charge: usize,
    key: Box<[u8]>,
    /// Hash of `key`; cached for sharding and cheap chain comparisons.
    hash: u32,
    /// Whether the cache itself still holds a reference.
    in_cache: bool,
    /// References, including the cache's own when `in_cache`.
    refs: u32,
    /// Chain pointer within one hash bucket.
    next_hash: *mut LruHandle<V>,
    /// Circular doubly-linked list pointers; meaningful iff `in_cache`.
    next: *mut LruHandle<V>,
    prev: *mut LruHandle<V>,
}

impl<V> LruHandle<V> {
    /// A detached sentinel for list heads.
    fn sentinel() -> *mut LruHandle<V> {
        let node = Box::into_raw(Box::new(LruHandle {
            value: None,
            deleter: None,
            charge: 0,
            key: Vec::new().into_boxed_slice(),
            hash: 0,
            in_cache: false,
            refs: 0,
            next_hash: ptr::null_mut(),
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }));
        unsafe {
            (*node).next = node;
            (*node).prev = node;
        }
        node
    }
}

/// Unlink `e` from whichever list it is on.
unsafe fn lru_remove<V>(e: *mut LruHandle<V>) {
    (*(*e).next).prev = (*e).prev;
    (*(*e).prev).next = (*e).next;
}

/// Append `e` just before `list`, making it the newest entry.
unsafe fn lru_append<V>(list: *mut LruHandle<V>, e: *mut LruHandle<V>) {
    (*e).next = list;
    (*e).prev = (*list).prev;
    (*(*e).prev).next = e;
    (*(*e).next).prev = e;
}

// ------------------------------------------------------------------------------------------------
// Hash table
// ------------------------------------------------------------------------------------------------

/// Open-chained hash table over handle pointers: a power-of-two bucket
/// array where each bucket is a singly-linked chain through `next_hash`,
/// doubled whenever the element count exceeds the bucket count.
struct HandleTable<V> {
    length: u32,
    elems: u32,
    list: Box<[*mut LruHandle<V>]>,
}

impl<V> HandleTable<V> {
    fn new() -> HandleTable<V> {
        let mut table = HandleTable {
            length: 0,
            elems: 0,
            list: Vec::new().into_boxed_slice(),
        };
        table.resize();
        table
    }

    unsafe fn lookup(&mut self, key: &[u8], hash: u32) -> *mut LruHandle<V> {
        *self.find_pointer(key, hash)
    }

    /// Insert `h`, returning a displaced entry with the same key (already
    /// unlinked from its bucket) or null.
    unsafe fn insert(&mut self, h: *mut LruHandle<V>) -> *mut LruHandle<V> {
        let ptr = self.find_pointer((*h).key.as_ref(), (*h).hash);
        let old = *ptr;
        (*h).next_hash = if old.is_null() {
            ptr::null_mut()
        } else {
            (*old).next_hash
        };
        *ptr = h;
        if old.is_null() {
            self.elems += 1;
            if self.elems > self.length {
                // Entries are fairly large; aim for an average chain
                // length of at most one.
                self.resize();
            }
        }
        old
    }

    unsafe fn remove(&mut self, key: &[u8], hash: u32) -> *mut LruHandle<V> {
        let ptr = self.find_pointer(key, hash);
        let result = *ptr;
        if !result.is_null() {
            *ptr = (*result).next_hash;
            self.elems -= 1;
        }
        result
    }

    /// Slot holding the entry matching `key`/`hash`, or the trailing null
    /// slot of its chain. Returning the slot (not the entry) lets insert
    /// and remove splice in place.
    unsafe fn find_pointer(&mut self, key: &[u8], hash: u32) -> *mut *mut LruHandle<V> {
        let bucket = (hash & (self.length - 1)) as usize;
        let mut ptr: *mut *mut LruHandle<V> = self.list.as_mut_ptr().add(bucket);
        while !(*ptr).is_null() && ((**ptr).hash != hash || (**ptr).key.as_ref() != key) {
            // Compare hashes first; comparing keys is much costlier.
            ptr = ptr::addr_of_mut!((**ptr).next_hash);
        }
        ptr
    }

    fn resize(&mut self) {
        let mut new_length: u32 = 4;
        while new_length < self.elems {
            new_length *= 2;
        }
        let mut new_list: Box<[*mut LruHandle<V>]> =
            vec![ptr::null_mut(); new_length as usize].into_boxed_slice();

        let mut count = 0;
        for bucket in 0..self.length as usize {
            let mut h = self.list[bucket];
            while !h.is_null() {
                unsafe {
                    let next = (*h).next_hash;
                    let hash = (*h).hash;
                    let slot = &mut new_list[(hash & (new_length - 1)) as usize];
                    (*h).next_hash = *slot;
                    *slot = h;
                    h = next;
                }
                count += 1;
            }
        }
        debug_assert_eq!(self.elems, count);
        self.list = new_list;
        self.length = new_length;
    }
}

// ------------------------------------------------------------------------------------------------
// One shard
// ------------------------------------------------------------------------------------------------

struct ShardState<V> {
    usage: usize,
    /// Head of the LRU list: `lru.prev` is the newest entry, `lru.next`
    /// the oldest.
    lru: *mut LruHandle<V>,
    /// Head of the in-use list, unordered.
    in_use: *mut LruHandle<V>,
    table: HandleTable<V>,
}

/// A single mutex-protected LRU unit.
struct LruShard<V> {
    capacity: usize,
    state: Mutex<ShardState<V>>,
}

/// Acquire one more reference, moving the entry to the in-use list if it
/// was idle.
unsafe fn ref_handle<V>(state: &mut ShardState<V>, e: *mut LruHandle<V>) {
    if (*e).refs == 1 && (*e).in_cache {
        lru_remove(e);
        lru_append(state.in_use, e);
    }
    (*e).refs += 1;
}

/// Drop one reference. At zero, run the deleter and free the entry; at
/// one (with the cache's reference remaining), park it on the LRU list.
unsafe fn unref<V>(state: &mut ShardState<V>, e: *mut LruHandle<V>) {
    debug_assert!((*e).refs > 0);
    (*e).refs -= 1;
    if (*e).refs == 0 {
        debug_assert!(!(*e).in_cache);
        let mut dead = Box::from_raw(e);
        if let (Some(deleter), Some(value)) = (dead.deleter.take(), dead.value.take()) {
            deleter(&dead.key, value);
        }
    } else if (*e).in_cache && (*e).refs == 1 {
        // Lost its only external reference; becomes an eviction
        // candidate at the newest end.
        lru_remove(e);
        lru_append(state.lru, e);
    }
}

/// Terminal step of every removal path: unlink from its list, clear
/// `in_cache`, subtract the charge, and drop the cache's reference.
/// `e` has already been removed from the hash table.
unsafe fn finish_erase<V>(state: &mut ShardState<V>, e: *mut LruHandle<V>) -> bool {
    if e.is_null() {
        return false;
    }
    debug_assert!((*e).in_cache);
    lru_remove(e);
    (*e).in_cache = false;
    state.usage -= (*e).charge;
    unref(state, e);
    true
}

impl<V> LruShard<V> {
    fn new(capacity: usize) -> LruShard<V> {
        LruShard {
            capacity,
            state: Mutex::new(ShardState {
                usage: 0,
                lru: LruHandle::sentinel(),
                in_use: LruHandle::sentinel(),
                table: HandleTable::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShardState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(
        &self,
        key: &[u8],
        hash: u32,
        value: V,
        charge: usize,
        deleter: DeleterFn<V>,
    ) -> *mut LruHandle<V> {
        let mut state = self.lock();

        let e = Box::into_raw(Box::new(LruHandle {
            value: Some(value),
            deleter: Some(deleter),
            charge,
            key: key.to_vec().into_boxed_slice(),
            hash,
            in_cache: false,
            refs: 1, // for the returned handle
            next_hash: ptr::null_mut(),
            next: ptr::null_mut(),
            prev: ptr::null_mut(),
        }));

        unsafe {
            if self.capacity > 0 {
                (*e).refs += 1; // for the cache's reference
                (*e).in_cache = true;
                lru_append(state.in_use, e);
                state.usage += charge;
                let displaced = state.table.insert(e);
                finish_erase(&mut state, displaced);
            }
            // With capacity 0 caching is turned off entirely; the entry
            // exists only for the returned handle.

            while state.usage > self.capacity && (*state.lru).next != state.lru {
                let old = (*state.lru).next;
                debug_assert_eq!((*old).refs, 1);
                let removed = state.table.remove((*old).key.as_ref(), (*old).hash);
                let erased = finish_erase(&mut state, removed);
                debug_assert!(erased);
            }
        }

        e
    }

    fn lookup(&self, key: &[u8], hash: u32) -> *mut LruHandle<V> {
        let mut state = self.lock();
        unsafe {
            let e = state.table.lookup(key, hash);
            if !e.is_null() {
                ref_handle(&mut state, e);
            }
            e
        }
    }

    fn release(&self, handle: *mut LruHandle<V>) {
        let mut state = self.lock();
        unsafe { unref(&mut state, handle) }
    }

    fn erase(&self, key: &[u8], hash: u32) {
        let mut state = self.lock();
        unsafe {
            let removed = state.table.remove(key, hash);
            finish_erase(&mut state, removed);
        }
    }

    /// Evict everything not currently referenced by a client.
    fn prune(&self) {
        let mut state = self.lock();
        unsafe {
            while (*state.lru).next != state.lru {
                let e = (*state.lru).next;
                debug_assert_eq!((*e).refs, 1);
                let removed = state.table.remove((*e).key.as_ref(), (*e).hash);
                let erased = finish_erase(&mut state, removed);
                debug_assert!(erased);
            }
        }
    }

    fn total_charge(&self) -> usize {
        self.lock().usage
    }
}

impl<V> Drop for LruShard<V> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        unsafe {
            // All client handles must have been released; CacheHandle
            // guards hold the cache alive, so this cannot fire.
            debug_assert!((*state.in_use).next == state.in_use);

            let mut e = (*state.lru).next;
            while e != state.lru {
                let next = (*e).next;
                debug_assert!((*e).in_cache);
                (*e).in_cache = false;
                debug_assert_eq!((*e).refs, 1);
                (*e).refs -= 1;
                let mut dead = Box::from_raw(e);
                if let (Some(deleter), Some(value)) = (dead.deleter.take(), dead.value.take()) {
                    deleter(&dead.key, value);
                }
                e = next;
            }

            drop(Box::from_raw(state.lru));
            drop(Box::from_raw(state.in_use));
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Sharded facade
// ------------------------------------------------------------------------------------------------

/// The shard array plus the ID allocator; shared between the cache value
/// and every outstanding handle so an entry can always find its way back
/// to its shard for release.
struct CacheInner<V> {
    shards: Vec<LruShard<V>>,
    last_id: Mutex<u64>,
}

// Entries move between threads with the cache (Send), and concurrent
// handles hand out `&V` from different threads (Sync needs V: Sync).
unsafe impl<V: Send> Send for CacheInner<V> {}
unsafe impl<V: Send + Sync> Sync for CacheInner<V> {}

/// The public cache: 16 [`LruShard`]s plus an ID allocator.
///
/// Cheap to clone; clones share the same shards.
pub struct ShardedLruCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> Clone for ShardedLruCache<V> {
    fn clone(&self) -> Self {
        ShardedLruCache {
            inner: Arc::clone(&self.inner),
        }
    }
}

fn shard_of(hash: u32) -> usize {
    (hash >> (32 - NUM_SHARD_BITS)) as usize
}

impl<V> ShardedLruCache<V> {
    /// A cache with `capacity` total charge, split evenly (rounding up)
    /// across the shards.
    pub fn new(capacity: usize) -> ShardedLruCache<V> {
        let per_shard = (capacity + (NUM_SHARDS - 1)) / NUM_SHARDS;
        ShardedLruCache {
            inner: Arc::new(CacheInner {
                shards: (0..NUM_SHARDS).map(|_| LruShard::new(per_shard)).collect(),
                last_id: Mutex::new(0),
            }),
        }
    }

    fn hash_key(key: &[u8]) -> u32 {
        hash(key, 0)
    }

    /// Insert a value with the given charge. The returned handle holds
    /// one reference; the entry cannot be evicted-and-destroyed while it
    /// (or any other handle) is alive.
    pub fn insert(
        &self,
        key: &[u8],
        value: V,
        charge: usize,
        deleter: DeleterFn<V>,
    ) -> CacheHandle<V> {
        let hash = Self::hash_key(key);
        let handle =
            self.inner.shards[shard_of(hash)].insert(key, hash, value, charge, deleter);
        CacheHandle {
            inner: Arc::clone(&self.inner),
            handle,
        }
    }

    /// Look up a key, taking a reference on hit.
    pub fn lookup(&self, key: &[u8]) -> Option<CacheHandle<V>> {
        let hash = Self::hash_key(key);
        let handle = self.inner.shards[shard_of(hash)].lookup(key, hash);
        if handle.is_null() {
            None
        } else {
            Some(CacheHandle {
                inner: Arc::clone(&self.inner),
                handle,
            })
        }
    }

    /// Drop the cache's reference to `key`, if present. Outstanding
    /// handles keep the value alive; the deleter runs at the last
    /// release.
    pub fn erase(&self, key: &[u8]) {
        let hash = Self::hash_key(key);
        self.inner.shards[shard_of(hash)].erase(key, hash);
    }

    /// Evict every unreferenced entry.
    pub fn prune(&self) {
        for shard in &self.inner.shards {
            shard.prune();
        }
    }

    /// Sum of charges across all shards.
    pub fn total_charge(&self) -> usize {
        self.inner.shards.iter().map(LruShard::total_charge).sum()
    }

    /// A fresh numeric ID for namespacing keys in a shared cache.
    pub fn new_id(&self) -> u64 {
        let mut last_id = self
            .inner
            .last_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *last_id += 1;
        *last_id
    }
}

// ------------------------------------------------------------------------------------------------
// RAII handle
// ------------------------------------------------------------------------------------------------

/// One reference to a cache entry; dereferences to the value and releases
/// the reference when dropped.
pub struct CacheHandle<V> {
    inner: Arc<CacheInner<V>>,
    handle: *mut LruHandle<V>,
}

unsafe impl<V: Send + Sync> Send for CacheHandle<V> {}
unsafe impl<V: Send + Sync> Sync for CacheHandle<V> {}

impl<V> CacheHandle<V> {
    /// The key this entry was inserted under.
    pub fn key(&self) -> &[u8] {
        unsafe { (*self.handle).key.as_ref() }
    }
}

impl<V> Deref for CacheHandle<V> {
    type Target = V;

    fn deref(&self) -> &V {
        // The value is present for the entry's whole life: it is only
        // taken after the final reference (including this one) is gone.
        unsafe {
            match (*self.handle).value.as_ref() {
                Some(value) => value,
                None => unreachable!("cache entry value taken while referenced"),
            }
        }
    }
}

impl<V> Drop for CacheHandle<V> {
    fn drop(&mut self) {
        let hash = unsafe { (*self.handle).hash };
        self.inner.shards[shard_of(hash)].release(self.handle);
    }
}
