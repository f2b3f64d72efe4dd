//! Bump allocator backing the memtable.
//!
//! Memory is carved out of 4 KiB blocks. Nothing is ever freed
//! individually: allocations stay live until the arena itself drops, which
//! is what lets skiplist readers hold raw pointers into it without any
//! reclamation protocol.
//!
//! Allocation is called only by the (externally serialised) writer, so the
//! bump state sits behind a plain mutex that is never contended;
//! `memory_usage` is a relaxed atomic so concurrent observers can poll the
//! write-buffer size without touching the lock.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Size of a standard arena block.
const BLOCK_SIZE: usize = 4096;

/// Alignment of every block, and of `allocate_aligned` results.
const ALIGN: usize = {
    let ptr = std::mem::size_of::<*const u8>();
    if ptr > 8 {
        ptr
    } else {
        8
    }
};

struct ArenaState {
    /// Bump pointer into the current block.
    alloc_ptr: *mut u8,
    /// Bytes left in the current block.
    alloc_bytes_remaining: usize,
    /// Every block ever allocated, freed on drop.
    blocks: Vec<(*mut u8, Layout)>,
}

/// Bump allocator whose allocations live until the arena drops.
pub struct Arena {
    state: Mutex<ArenaState>,
    /// Total bytes held, including one pointer of bookkeeping per block.
    memory_usage: AtomicUsize,
}

// The raw pointers in ArenaState are owned allocations; all mutation goes
// through the mutex.
unsafe impl Send for Arena {}
unsafe impl Sync for Arena {}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            state: Mutex::new(ArenaState {
                alloc_ptr: std::ptr::null_mut(),
                alloc_bytes_remaining: 0,
                blocks: Vec::new(),
            }),
            memory_usage: AtomicUsize::new(0),
        }
    }

    /// Allocate `bytes` bytes with no alignment guarantee beyond 1.
    ///
    /// The returned memory is uninitialised and valid until the arena
    /// drops.
    pub fn allocate(&self, bytes: usize) -> *mut u8 {
        // Zero-byte allocations would return a pointer the next allocation
        // also returns; callers never need them.
        debug_assert!(bytes > 0);
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if bytes <= state.alloc_bytes_remaining {
            let result = state.alloc_ptr;
            state.alloc_ptr = unsafe { state.alloc_ptr.add(bytes) };
            state.alloc_bytes_remaining -= bytes;
            return result;
        }
        self.allocate_fallback(&mut state, bytes)
    }

    /// Allocate `bytes` bytes aligned to `max(pointer size, 8)`.
    pub fn allocate_aligned(&self, bytes: usize) -> *mut u8 {
        const { assert!((ALIGN & (ALIGN - 1)) == 0) };
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let current_mod = state.alloc_ptr as usize & (ALIGN - 1);
        let slop = if current_mod == 0 {
            0
        } else {
            ALIGN - current_mod
        };
        let needed = bytes + slop;

        let result = if needed <= state.alloc_bytes_remaining {
            let result = unsafe { state.alloc_ptr.add(slop) };
            state.alloc_ptr = unsafe { state.alloc_ptr.add(needed) };
            state.alloc_bytes_remaining -= needed;
            result
        } else {
            // Fresh blocks start at ALIGN-aligned addresses.
            self.allocate_fallback(&mut state, bytes)
        };
        debug_assert_eq!(result as usize & (ALIGN - 1), 0);
        result
    }

    /// Total bytes allocated from the system, plus per-block bookkeeping.
    ///
    /// Counts one pointer size per block on top of the block bytes, so the
    /// figure slightly overstates raw payload capacity; write-buffer
    /// thresholds are tuned against this metric.
    pub fn memory_usage(&self) -> usize {
        self.memory_usage.load(Ordering::Relaxed)
    }

    fn allocate_fallback(&self, state: &mut ArenaState, bytes: usize) -> *mut u8 {
        if bytes > BLOCK_SIZE / 4 {
            // More than a quarter block: give it a private block so the
            // tail of the current block is not wasted on it.
            return self.allocate_new_block(state, bytes);
        }

        // Waste whatever remains in the current block.
        let block = self.allocate_new_block(state, BLOCK_SIZE);
        state.alloc_ptr = unsafe { block.add(bytes) };
        state.alloc_bytes_remaining = BLOCK_SIZE - bytes;
        block
    }

    fn allocate_new_block(&self, state: &mut ArenaState, block_bytes: usize) -> *mut u8 {
        let layout = match Layout::from_size_align(block_bytes, ALIGN) {
            Ok(layout) => layout,
            Err(_) => unreachable!("block size overflows layout"),
        };
        let ptr = unsafe { alloc(layout) };
        if ptr.is_null() {
            handle_alloc_error(layout);
        }
        state.blocks.push((ptr, layout));
        self.memory_usage.fetch_add(
            block_bytes + std::mem::size_of::<*const u8>(),
            Ordering::Relaxed,
        );
        ptr
    }
}

impl Default for Arena {
    fn default() -> Self {
        Arena::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for &(ptr, layout) in &state.blocks {
            unsafe { dealloc(ptr, layout) };
        }
    }
}
