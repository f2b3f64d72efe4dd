//! # Memtable Module
//!
//! The mutable, in-memory write buffer of the storage engine: a sorted map
//! from internal keys to values, backed by an arena-allocated concurrent
//! skiplist.
//!
//! ## Entry format
//!
//! Each `add` produces **one contiguous arena allocation** and the
//! skiplist stores only its base pointer:
//!
//! ```text
//! varint32(user_key.len() + 8)   // internal key length
//! user_key bytes
//! tag (fixed64: sequence << 8 | value_type)
//! varint32(value.len())
//! value bytes
//! ```
//!
//! ## Design invariants
//!
//! - Writers are serialised externally (the engine's write lock); readers
//!   run concurrently with the writer without locks, inheriting the
//!   skiplist's publication contract.
//! - Entries are never mutated or removed; deletes are tombstone entries
//!   with a higher sequence number.
//! - `approximate_memory_usage` is readable from any thread and is the
//!   signal for "this buffer is full, flush it to a table".

#[cfg(test)]
mod tests;

pub mod arena;
pub mod skiplist;

use std::cmp::Ordering;
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::encoding::{decode_fixed64, put_length_prefixed_slice, varint_length};
use crate::error::Result;
use crate::iterator::Iter;
use crate::key::{
    pack_sequence_and_type, InternalKeyComparator, LookupKey, SequenceNumber, ValueType,
};
use arena::Arena;
use skiplist::{KeyComparator, SkipList, SkipListIter};

// ------------------------------------------------------------------------------------------------
// Raw entry decoding
// ------------------------------------------------------------------------------------------------

/// Decode the varint32 at `p`, returning the value and the address just
/// past it.
///
/// # Safety
///
/// `p` must point at a well-formed entry written by [`Memtable::add`]; the
/// prefix of such an entry is always a valid varint of at most 5 bytes.
#[inline]
unsafe fn decode_prefix(mut p: *const u8) -> (u32, *const u8) {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *p;
        p = p.add(1);
        result |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return (result, p);
        }
        shift += 7;
    }
}

/// The length-prefixed slice starting at `p`.
///
/// # Safety
///
/// Same contract as [`decode_prefix`].
#[inline]
unsafe fn length_prefixed_slice<'a>(p: *const u8) -> &'a [u8] {
    let (len, data) = decode_prefix(p);
    slice::from_raw_parts(data, len as usize)
}

/// Write `value` at `p` in varint32 form, returning the address just past
/// the last byte written.
///
/// # Safety
///
/// `p` must have room for `varint_length(value)` bytes.
#[inline]
unsafe fn encode_prefix(mut p: *mut u8, mut value: u32) -> *mut u8 {
    while value >= 0x80 {
        *p = (value as u8) | 0x80;
        p = p.add(1);
        value >>= 7;
    }
    *p = value as u8;
    p.add(1)
}

// ------------------------------------------------------------------------------------------------
// Skiplist comparator
// ------------------------------------------------------------------------------------------------

/// Compares skiplist entries by reading the length prefix on each side and
/// delegating to the internal-key comparator.
pub(crate) struct MemtableKeyComparator {
    comparator: InternalKeyComparator,
}

impl KeyComparator for MemtableKeyComparator {
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> Ordering {
        use crate::key::Comparator;
        let a = length_prefixed_slice(a);
        let b = length_prefixed_slice(b);
        self.comparator.compare(a, b)
    }
}

// ------------------------------------------------------------------------------------------------
// Memtable
// ------------------------------------------------------------------------------------------------

/// Outcome of a memtable point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemtableGetResult {
    /// The newest visible entry is a put with this value.
    Put(Vec<u8>),
    /// The newest visible entry is a deletion tombstone.
    Delete,
    /// The memtable holds nothing for this key.
    NotFound,
}

/// Arena-backed sorted write buffer.
pub struct Memtable {
    comparator: InternalKeyComparator,
    arena: Arc<Arena>,
    table: SkipList<MemtableKeyComparator>,
}

impl Memtable {
    pub fn new(comparator: InternalKeyComparator) -> Memtable {
        let arena = Arc::new(Arena::new());
        let table = SkipList::new(
            MemtableKeyComparator {
                comparator: comparator.clone(),
            },
            Arc::clone(&arena),
        );
        Memtable {
            comparator,
            arena,
            table,
        }
    }

    /// Bytes of arena memory backing this memtable.
    pub fn approximate_memory_usage(&self) -> usize {
        self.arena.memory_usage()
    }

    /// Insert an entry. Writers must be serialised externally; `sequence`
    /// must be unique per user key so no two entries compare equal.
    pub fn add(
        &self,
        sequence: SequenceNumber,
        value_type: ValueType,
        user_key: &[u8],
        value: &[u8],
    ) {
        let key_size = user_key.len();
        let value_size = value.len();
        let internal_key_size = key_size + 8;
        let encoded_len = varint_length(internal_key_size as u64)
            + internal_key_size
            + varint_length(value_size as u64)
            + value_size;

        let buf = self.arena.allocate(encoded_len);
        unsafe {
            let mut p = encode_prefix(buf, internal_key_size as u32);
            ptr::copy_nonoverlapping(user_key.as_ptr(), p, key_size);
            p = p.add(key_size);
            let tag = pack_sequence_and_type(sequence, value_type);
            ptr::copy_nonoverlapping(tag.to_le_bytes().as_ptr(), p, 8);
            p = p.add(8);
            p = encode_prefix(p, value_size as u32);
            ptr::copy_nonoverlapping(value.as_ptr(), p, value_size);
            debug_assert_eq!(p.add(value_size) as usize, buf as usize + encoded_len);
        }
        self.table.insert(buf);
    }

    /// Look up the newest entry visible at the lookup key's sequence.
    pub fn get(&self, key: &LookupKey) -> MemtableGetResult {
        use crate::key::Comparator;

        let mut iter = self.table.iter();
        iter.seek(key.memtable_key().as_ptr());
        if !iter.valid() {
            return MemtableGetResult::NotFound;
        }

        // The seek skipped every entry with a too-large sequence number;
        // all that is left to check is whether the user key matches.
        unsafe {
            let entry = iter.key();
            let (key_length, key_ptr) = decode_prefix(entry);
            let key_length = key_length as usize;
            let user_key = slice::from_raw_parts(key_ptr, key_length - 8);
            if self
                .comparator
                .user_comparator()
                .compare(user_key, key.user_key())
                != Ordering::Equal
            {
                return MemtableGetResult::NotFound;
            }

            let tag = decode_fixed64(slice::from_raw_parts(key_ptr.add(key_length - 8), 8));
            match ValueType::from_u8((tag & 0xff) as u8) {
                Some(ValueType::Value) => {
                    let value = length_prefixed_slice(key_ptr.add(key_length));
                    MemtableGetResult::Put(value.to_vec())
                }
                Some(ValueType::Deletion) => MemtableGetResult::Delete,
                // Entries are written by `add`, which only emits the two
                // known types.
                None => MemtableGetResult::NotFound,
            }
        }
    }

    pub fn iter(&self) -> MemtableIterator<'_> {
        MemtableIterator {
            iter: self.table.iter(),
            scratch: Vec::new(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Iterator adapter
// ------------------------------------------------------------------------------------------------

/// Adapts the skiplist cursor to the crate iterator surface, translating
/// between internal keys and the memtable's length-prefixed encoding.
pub struct MemtableIterator<'a> {
    iter: SkipListIter<'a, MemtableKeyComparator>,
    /// Re-encoded seek target (the skiplist compares memtable keys).
    scratch: Vec<u8>,
}

impl Iter for MemtableIterator<'_> {
    fn valid(&self) -> bool {
        self.iter.valid()
    }

    fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
    }

    fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
    }

    fn seek(&mut self, target: &[u8]) {
        self.scratch.clear();
        put_length_prefixed_slice(&mut self.scratch, target);
        self.iter.seek(self.scratch.as_ptr());
    }

    fn next(&mut self) {
        self.iter.next();
    }

    fn prev(&mut self) {
        self.iter.prev();
    }

    fn key(&self) -> &[u8] {
        unsafe { length_prefixed_slice(self.iter.key()) }
    }

    fn value(&self) -> &[u8] {
        unsafe {
            let internal_key = length_prefixed_slice(self.iter.key());
            length_prefixed_slice(internal_key.as_ptr().add(internal_key.len()))
        }
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
