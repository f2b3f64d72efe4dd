//! Cache of open, parsed table files keyed by file number.
//!
//! Opening a table costs a file open, an mmap, and parsing its footer,
//! index block, and filter block; this cache amortises that across reads.
//! Entries are `Arc<Table>` values in a sharded LRU with charge 1 each,
//! so the capacity is simply "how many tables stay open".
//!
//! Open or parse failures are returned to the caller but **never
//! cached**: a transient failure (or a repaired file) heals on the next
//! lookup. Concurrent misses on one file may both parse it and race to
//! insert; the duplicate-key insert semantics keep the cache consistent
//! at the cost of one redundant parse.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, trace};

use crate::cache::{CacheHandle, ShardedLruCache};
use crate::encoding::encode_fixed64;
use crate::error::Result;
use crate::iterator::{error_iterator, Iter};
use crate::options::{Options, ReadOptions};
use crate::sstable::Table;

use super::filename::{sst_table_file_name, table_file_name};

/// File-number-keyed cache of open tables.
pub struct TableCache {
    dbname: PathBuf,
    options: Options,
    cache: ShardedLruCache<Arc<Table>>,
}

impl TableCache {
    /// A cache holding at most `entries` open tables for the database at
    /// `dbname`.
    pub fn new(dbname: &Path, options: Options, entries: usize) -> TableCache {
        TableCache {
            dbname: dbname.to_path_buf(),
            options,
            cache: ShardedLruCache::new(entries),
        }
    }

    /// Fetch the parsed table for `file_number`, opening and caching it
    /// on a miss. `file_size` bounds how much of the file belongs to the
    /// table.
    pub fn find_table(
        &self,
        file_number: u64,
        file_size: u64,
    ) -> Result<CacheHandle<Arc<Table>>> {
        let mut key = Vec::with_capacity(8);
        encode_fixed64(&mut key, file_number);

        if let Some(handle) = self.cache.lookup(&key) {
            trace!(file_number, "table cache hit");
            return Ok(handle);
        }

        let fname = table_file_name(&self.dbname, file_number);
        let file = match File::open(&fname) {
            Ok(file) => file,
            Err(_) => {
                // Older builds wrote ".sst"; accept both on read.
                let old_fname = sst_table_file_name(&self.dbname, file_number);
                File::open(&old_fname).map_err(crate::error::Error::from)?
            }
        };

        let table = Arc::new(Table::open(self.options.clone(), file, file_size)?);
        info!(file_number, file_size, "opened table file");
        Ok(self
            .cache
            .insert(&key, table, 1, Box::new(|_key, _table| {})))
    }

    /// Iterate the table for `file_number`. Always returns an iterator;
    /// open failures are folded into its status. The second element is
    /// the parsed table, when the caller wants metadata access too.
    pub fn new_iterator(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
    ) -> (Box<dyn Iter>, Option<Arc<Table>>) {
        let handle = match self.find_table(file_number, file_size) {
            Ok(handle) => handle,
            Err(e) => return (error_iterator(e), None),
        };

        let table = Arc::clone(&handle);
        let mut iter = Table::new_iterator(&table, options);
        // The cache reference is held for as long as the iterator lives.
        iter.register_cleanup(move || drop(handle));
        (Box::new(iter), Some(table))
    }

    /// Point lookup in the table for `file_number`; `callback` receives
    /// the entry found at or after `key`, if any.
    pub fn get(
        &self,
        options: &ReadOptions,
        file_number: u64,
        file_size: u64,
        key: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let handle = self.find_table(file_number, file_size)?;
        let result = handle.internal_get(options, key, callback);
        drop(handle);
        result
    }

    /// Drop the cached table for `file_number` (used after the file is
    /// deleted). Outstanding iterators keep their table alive.
    pub fn evict(&self, file_number: u64) {
        let mut key = Vec::with_capacity(8);
        encode_fixed64(&mut key, file_number);
        trace!(file_number, "evicting table");
        self.cache.erase(&key);
    }
}
