//! Lock-free-read concurrent skiplist.
//!
//! # Thread safety
//!
//! Writes require external synchronisation (the engine's write lock).
//! Reads only require that the skiplist outlive them; they proceed with no
//! locking of any kind.
//!
//! # Invariants
//!
//! 1. Nodes are arena-allocated and never freed until the skiplist (and
//!    its arena) are dropped, so readers can never observe a dangling
//!    pointer.
//! 2. Everything in a node except its tower links is immutable once the
//!    node has been published. `insert` initialises the node fully, then
//!    publishes it level by level with release stores; readers traverse
//!    with acquire loads and therefore always see fully initialised nodes.
//! 3. `max_height` is read and written relaxed. A reader that observes a
//!    stale (smaller) value merely starts one level lower. A reader that
//!    observes the *new* value before the new levels are linked sees null
//!    in the head's upper slots, and null sorts after every key, so it
//!    immediately descends. Either way no entry is missed.
//!
//! Keys are opaque byte pointers into the arena; ordering is delegated to
//! a [`KeyComparator`]. There are no prev links: backward iteration
//! re-searches from the head.

use std::cmp::Ordering as CmpOrdering;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;

use super::arena::Arena;

/// Tallest tower a node may have.
pub const MAX_HEIGHT: usize = 12;

/// A node has a 1-in-`BRANCHING` chance of growing each extra level.
const BRANCHING: u32 = 4;

/// Total order over the opaque key pointers stored in the list.
pub trait KeyComparator: Send + Sync {
    /// Compare the entries `a` and `b` point at.
    ///
    /// # Safety
    ///
    /// Both pointers must reference entries previously handed to
    /// [`SkipList::insert`] (or otherwise encoded the same way) that are
    /// still owned by a live arena.
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> CmpOrdering;
}

/// One skiplist node: the key pointer plus a tower of forward links.
///
/// Only `next[0]` is declared; the remaining `height - 1` slots live in
/// the trailing bytes of the same arena allocation. Slot `i` is the
/// successor at level `i`.
#[repr(C)]
struct Node {
    key: *const u8,
    next: [AtomicPtr<Node>; 1],
}

impl Node {
    /// # Safety
    ///
    /// `level` must be below the height this node was allocated with.
    #[inline]
    unsafe fn next(&self, level: usize) -> *mut Node {
        // Acquire so we observe a fully initialised successor.
        (*self.next.as_ptr().add(level)).load(Ordering::Acquire)
    }

    #[inline]
    unsafe fn set_next(&self, level: usize, node: *mut Node) {
        // Release so anybody reading through this pointer sees a fully
        // initialised node.
        (*self.next.as_ptr().add(level)).store(node, Ordering::Release);
    }

    #[inline]
    unsafe fn no_barrier_next(&self, level: usize) -> *mut Node {
        (*self.next.as_ptr().add(level)).load(Ordering::Relaxed)
    }

    #[inline]
    unsafe fn no_barrier_set_next(&self, level: usize, node: *mut Node) {
        (*self.next.as_ptr().add(level)).store(node, Ordering::Relaxed)
    }
}

/// Sorted container keyed by opaque byte pointers; one writer, many
/// readers.
pub struct SkipList<C: KeyComparator> {
    comparator: C,
    arena: Arc<Arena>,
    head: *mut Node,
    /// Height of the entire list. Modified only by `insert`; read racily
    /// by readers (stale values are fine, see the module docs).
    max_height: AtomicUsize,
}

unsafe impl<C: KeyComparator> Send for SkipList<C> {}
unsafe impl<C: KeyComparator> Sync for SkipList<C> {}

impl<C: KeyComparator> SkipList<C> {
    /// Create a list allocating its nodes from `arena`. The arena must
    /// outlive every pointer handed to `insert`.
    pub fn new(comparator: C, arena: Arc<Arena>) -> SkipList<C> {
        let head = Self::new_node_in(&arena, ptr::null(), MAX_HEIGHT);
        SkipList {
            comparator,
            arena,
            head,
            max_height: AtomicUsize::new(1),
        }
    }

    /// Insert `key` into the list.
    ///
    /// Requires that nothing comparing equal to `key` is already present,
    /// and that callers serialise all `insert` invocations externally.
    pub fn insert(&self, key: *const u8) {
        let mut prev: [*mut Node; MAX_HEIGHT] = [ptr::null_mut(); MAX_HEIGHT];
        let existing = self.find_greater_or_equal(key, Some(&mut prev));
        debug_assert!(
            existing.is_null()
                || unsafe { self.comparator.compare(key, (*existing).key) } != CmpOrdering::Equal,
            "duplicate key inserted into skiplist"
        );

        let height = random_height();
        if height > self.max_height() {
            for slot in prev.iter_mut().take(height).skip(self.max_height()) {
                *slot = self.head;
            }
            // Relaxed is enough: see invariant (3) in the module docs.
            self.max_height.store(height, Ordering::Relaxed);
        }

        let node = Self::new_node_in(&self.arena, key, height);
        for (level, &prev_node) in prev.iter().enumerate().take(height) {
            unsafe {
                // The relaxed store into the new node is fine: nobody can
                // reach it until the release store below publishes it.
                (*node).no_barrier_set_next(level, (*prev_node).no_barrier_next(level));
                (*prev_node).set_next(level, node);
            }
        }
    }

    /// Whether an entry comparing equal to `key` is present.
    pub fn contains(&self, key: *const u8) -> bool {
        let node = self.find_greater_or_equal(key, None);
        !node.is_null() && unsafe { self.comparator.compare(key, (*node).key) } == CmpOrdering::Equal
    }

    pub fn iter(&self) -> SkipListIter<'_, C> {
        SkipListIter {
            list: self,
            node: ptr::null(),
        }
    }

    #[inline]
    fn max_height(&self) -> usize {
        self.max_height.load(Ordering::Relaxed)
    }

    fn new_node_in(arena: &Arena, key: *const u8, height: usize) -> *mut Node {
        let size = std::mem::size_of::<Node>()
            + (height - 1) * std::mem::size_of::<AtomicPtr<Node>>();
        let node = arena.allocate_aligned(size) as *mut Node;
        unsafe {
            ptr::addr_of_mut!((*node).key).write(key);
            let tower = ptr::addr_of_mut!((*node).next) as *mut AtomicPtr<Node>;
            for level in 0..height {
                tower.add(level).write(AtomicPtr::new(ptr::null_mut()));
            }
        }
        node
    }

    /// True if `key` sorts after the entry in `node` (null counts as
    /// infinitely large).
    fn key_is_after_node(&self, key: *const u8, node: *mut Node) -> bool {
        !node.is_null()
            && unsafe { self.comparator.compare((*node).key, key) } == CmpOrdering::Less
    }

    /// Earliest node at or after `key`, or null. If `prev` is given it is
    /// filled with the predecessor at every level.
    fn find_greater_or_equal(
        &self,
        key: *const u8,
        mut prev: Option<&mut [*mut Node; MAX_HEIGHT]>,
    ) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if self.key_is_after_node(key, next) {
                // Keep searching in this level's list.
                node = next;
            } else {
                if let Some(prev) = prev.as_deref_mut() {
                    prev[level] = node;
                }
                if level == 0 {
                    return next;
                }
                level -= 1;
            }
        }
    }

    /// Latest node strictly before `key`, or the head.
    fn find_less_than(&self, key: *const u8) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if next.is_null()
                || unsafe { self.comparator.compare((*next).key, key) } != CmpOrdering::Less
            {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }

    /// Last node in the list, or the head if empty.
    fn find_last(&self) -> *mut Node {
        let mut node = self.head;
        let mut level = self.max_height() - 1;
        loop {
            let next = unsafe { (*node).next(level) };
            if next.is_null() {
                if level == 0 {
                    return node;
                }
                level -= 1;
            } else {
                node = next;
            }
        }
    }
}

fn random_height() -> usize {
    let mut rng = rand::rng();
    let mut height = 1;
    while height < MAX_HEIGHT && rng.random_range(0..BRANCHING) == 0 {
        height += 1;
    }
    height
}

// ------------------------------------------------------------------------------------------------
// Iteration
// ------------------------------------------------------------------------------------------------

/// A cursor over a skiplist. Cheap to create; not positioned initially.
pub struct SkipListIter<'a, C: KeyComparator> {
    list: &'a SkipList<C>,
    node: *const Node,
}

impl<C: KeyComparator> SkipListIter<'_, C> {
    pub fn valid(&self) -> bool {
        !self.node.is_null()
    }

    /// Key pointer at the current position. Requires `valid()`.
    pub fn key(&self) -> *const u8 {
        debug_assert!(self.valid());
        unsafe { (*self.node).key }
    }

    pub fn next(&mut self) {
        debug_assert!(self.valid());
        self.node = unsafe { (*self.node).next(0) };
    }

    /// Retreat by re-searching for the last node before the current key;
    /// the list keeps no prev links.
    pub fn prev(&mut self) {
        debug_assert!(self.valid());
        let node = self.list.find_less_than(unsafe { (*self.node).key });
        self.node = if node == self.list.head {
            ptr::null()
        } else {
            node
        };
    }

    pub fn seek(&mut self, target: *const u8) {
        self.node = self.list.find_greater_or_equal(target, None);
    }

    pub fn seek_to_first(&mut self) {
        self.node = unsafe { (*self.list.head).next(0) };
    }

    pub fn seek_to_last(&mut self) {
        let node = self.list.find_last();
        self.node = if node == self.list.head {
            ptr::null()
        } else {
            node
        };
    }
}
