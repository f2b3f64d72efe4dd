//! Ordered-set laws for the skiplist, tested over fixed-width keys.

use std::cmp::Ordering;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::memtable::arena::Arena;
use crate::memtable::skiplist::{KeyComparator, SkipList};

/// Compares 8-byte big-endian keys (byte order == numeric order).
struct U64Comparator;

impl KeyComparator for U64Comparator {
    unsafe fn compare(&self, a: *const u8, b: *const u8) -> Ordering {
        let a = std::slice::from_raw_parts(a, 8);
        let b = std::slice::from_raw_parts(b, 8);
        a.cmp(b)
    }
}

fn make_list() -> (SkipList<U64Comparator>, Arc<Arena>) {
    let arena = Arc::new(Arena::new());
    (SkipList::new(U64Comparator, Arc::clone(&arena)), arena)
}

fn encode_key(arena: &Arena, value: u64) -> *const u8 {
    let ptr = arena.allocate(8);
    unsafe {
        std::ptr::copy_nonoverlapping(value.to_be_bytes().as_ptr(), ptr, 8);
    }
    ptr
}

unsafe fn decode_key(ptr: *const u8) -> u64 {
    let bytes = std::slice::from_raw_parts(ptr, 8);
    u64::from_be_bytes(bytes.try_into().unwrap())
}

#[test]
fn empty_list() {
    let (list, arena) = make_list();
    assert!(!list.contains(encode_key(&arena, 10)));

    let mut iter = list.iter();
    assert!(!iter.valid());
    iter.seek_to_first();
    assert!(!iter.valid());
    iter.seek_to_last();
    assert!(!iter.valid());
    iter.seek(encode_key(&arena, 100));
    assert!(!iter.valid());
}

#[test]
fn insert_permutation_iterates_sorted() {
    let (list, arena) = make_list();

    let mut values: Vec<u64> = (0..500).map(|i| i * 3).collect();
    values.shuffle(&mut rand::rng());
    for &v in &values {
        list.insert(encode_key(&arena, v));
    }

    // contains() agrees with membership.
    for probe in 0..1500 {
        assert_eq!(list.contains(encode_key(&arena, probe)), probe % 3 == 0);
    }

    // Forward iteration yields the sorted set.
    let mut iter = list.iter();
    iter.seek_to_first();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(unsafe { decode_key(iter.key()) });
        iter.next();
    }
    let mut expected: Vec<u64> = values.clone();
    expected.sort_unstable();
    assert_eq!(seen, expected);
}

#[test]
fn seek_positions_at_lower_bound() {
    let (list, arena) = make_list();
    for v in [10u64, 20, 30] {
        list.insert(encode_key(&arena, v));
    }

    let mut iter = list.iter();
    iter.seek(encode_key(&arena, 15));
    assert!(iter.valid());
    assert_eq!(unsafe { decode_key(iter.key()) }, 20);

    iter.seek(encode_key(&arena, 20));
    assert_eq!(unsafe { decode_key(iter.key()) }, 20);

    iter.seek(encode_key(&arena, 31));
    assert!(!iter.valid());
}

#[test]
fn backward_iteration_via_research() {
    let (list, arena) = make_list();
    for v in 1..=20u64 {
        list.insert(encode_key(&arena, v));
    }

    let mut iter = list.iter();
    iter.seek_to_last();
    let mut seen = Vec::new();
    while iter.valid() {
        seen.push(unsafe { decode_key(iter.key()) });
        iter.prev();
    }
    let expected: Vec<u64> = (1..=20u64).rev().collect();
    assert_eq!(seen, expected);
}
