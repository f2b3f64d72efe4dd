//! The build-table driver: happy path, empty input, and failure cleanup.

use std::sync::Arc;

use tempfile::TempDir;

use crate::engine::filename::table_file_name;
use crate::engine::{build_table, FileMetaData, TableCache};
use crate::error::{Error, Result};
use crate::iterator::Iter;
use crate::key::{BytewiseComparator, InternalKeyComparator, LookupKey, ValueType};
use crate::memtable::Memtable;
use crate::options::ReadOptions;
use crate::key::parse_internal_key;

use super::helpers::{init_tracing, internal_options, populated_memtable};

#[test]
fn empty_iterator_writes_nothing() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let options = internal_options();
    let cache = TableCache::new(dir.path(), options.clone(), 100);

    let memtable = Memtable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
    let mut iter = memtable.iter();
    let mut meta = FileMetaData {
        number: 1,
        ..FileMetaData::default()
    };

    build_table(dir.path(), &options, &cache, &mut iter, &mut meta).unwrap();
    assert_eq!(meta.file_size, 0);
    assert!(!table_file_name(dir.path(), 1).exists());
}

#[test]
fn single_entry_build_then_point_get() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let options = internal_options();
    let cache = TableCache::new(dir.path(), options.clone(), 100);

    let memtable = Memtable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
    memtable.add(1, ValueType::Value, b"a", b"1");

    let mut iter = memtable.iter();
    let mut meta = FileMetaData {
        number: 1,
        ..FileMetaData::default()
    };
    build_table(dir.path(), &options, &cache, &mut iter, &mut meta).unwrap();

    assert!(meta.file_size > 0);
    assert_eq!(meta.smallest.user_key(), b"a");
    assert_eq!(meta.largest.user_key(), b"a");

    // Point-get through the table cache.
    let lookup = LookupKey::new(b"a", 1);
    let mut found = None;
    cache
        .get(
            &ReadOptions::default(),
            meta.number,
            meta.file_size,
            lookup.internal_key(),
            &mut |key, value| {
                let parsed = parse_internal_key(key).unwrap();
                if parsed.user_key == b"a" && parsed.value_type == ValueType::Value {
                    found = Some(value.to_vec());
                }
            },
        )
        .unwrap();
    assert_eq!(found, Some(b"1".to_vec()));
}

#[test]
fn built_table_iterates_in_insert_order() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let options = internal_options();
    let cache = TableCache::new(dir.path(), options.clone(), 100);

    let memtable = populated_memtable(500);
    let mut iter = memtable.iter();
    let mut meta = FileMetaData {
        number: 2,
        ..FileMetaData::default()
    };
    build_table(dir.path(), &options, &cache, &mut iter, &mut meta).unwrap();

    assert_eq!(meta.smallest.user_key(), b"key-000000");
    assert_eq!(meta.largest.user_key(), b"key-000499");

    let (mut table_iter, table) =
        cache.new_iterator(&ReadOptions::default(), meta.number, meta.file_size);
    assert!(table.is_some());

    table_iter.seek_to_first();
    let mut count = 0;
    let mut last_user_key: Option<Vec<u8>> = None;
    while table_iter.valid() {
        let parsed = parse_internal_key(table_iter.key()).unwrap();
        if let Some(last) = &last_user_key {
            assert!(last.as_slice() < parsed.user_key);
        }
        last_user_key = Some(parsed.user_key.to_vec());
        count += 1;
        table_iter.next();
    }
    table_iter.status().unwrap();
    assert_eq!(count, 500);
}

#[test]
fn multi_block_table_reaches_every_block() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let mut options = internal_options();
    options.block_size = 4 * 1024;
    let cache = TableCache::new(dir.path(), options.clone(), 100);

    // 10 KiB of 1 KiB values: at least three data blocks.
    let memtable = Memtable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
    for i in 0..10u64 {
        memtable.add(
            i + 1,
            ValueType::Value,
            format!("key-{i:02}").as_bytes(),
            &vec![i as u8; 1024],
        );
    }

    let mut iter = memtable.iter();
    let mut meta = FileMetaData {
        number: 3,
        ..FileMetaData::default()
    };
    build_table(dir.path(), &options, &cache, &mut iter, &mut meta).unwrap();
    assert!(meta.file_size > 10 * 1024);

    // Every key is reachable by a point lookup (index block routing).
    for i in 0..10u64 {
        let user_key = format!("key-{i:02}");
        let lookup = LookupKey::new(user_key.as_bytes(), i + 1);
        let mut found = None;
        cache
            .get(
                &ReadOptions::default(),
                meta.number,
                meta.file_size,
                lookup.internal_key(),
                &mut |_key, value| found = Some(value.to_vec()),
            )
            .unwrap();
        assert_eq!(found, Some(vec![i as u8; 1024]));
    }
}

/// An iterator that reports a sticky error after yielding some entries.
struct FailingIter {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    position: usize,
    failed: bool,
}

impl Iter for FailingIter {
    fn valid(&self) -> bool {
        !self.failed && self.position < self.entries.len()
    }
    fn seek_to_first(&mut self) {
        self.position = 0;
    }
    fn seek_to_last(&mut self) {
        self.position = self.entries.len().saturating_sub(1);
    }
    fn seek(&mut self, _target: &[u8]) {
        self.position = 0;
    }
    fn next(&mut self) {
        self.position += 1;
        if self.position >= self.entries.len() {
            self.failed = true;
        }
    }
    fn prev(&mut self) {
        self.position = self.position.saturating_sub(1);
    }
    fn key(&self) -> &[u8] {
        &self.entries[self.position].0
    }
    fn value(&self) -> &[u8] {
        &self.entries[self.position].1
    }
    fn status(&self) -> Result<()> {
        if self.failed {
            Err(Error::Io("simulated read failure".to_string()))
        } else {
            Ok(())
        }
    }
}

#[test]
fn source_iterator_error_discards_the_file() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let options = internal_options();
    let cache = TableCache::new(dir.path(), options.clone(), 100);

    let mut entries = Vec::new();
    for i in 0..5u64 {
        let mut key = format!("key-{i}").into_bytes();
        key.extend_from_slice(&crate::key::pack_sequence_and_type(i + 1, ValueType::Value).to_le_bytes());
        entries.push((key, b"v".to_vec()));
    }
    let mut iter = FailingIter {
        entries,
        position: 0,
        failed: false,
    };

    let mut meta = FileMetaData {
        number: 4,
        ..FileMetaData::default()
    };
    let result = build_table(dir.path(), &options, &cache, &mut iter, &mut meta);
    assert!(matches!(result, Err(Error::Io(_))));
    assert_eq!(meta.file_size, 0);
    assert!(!table_file_name(dir.path(), 4).exists());
}
