//! Table reader: opens an immutable table file and serves lookups and
//! scans from it.
//!
//! The whole file is memory-mapped read-only; block reads slice the map
//! and validate trailers, so opening a table costs one footer parse, one
//! index-block parse, and (if a filter policy is configured) one filter
//! block parse. Data blocks are decoded lazily, optionally through the
//! shared block cache.
//!
//! # Safety
//!
//! The map is created with `unsafe { Mmap::map(...) }`. This is sound for
//! table files because they are immutable once the builder renames or
//! syncs them: nothing writes to a table that readers can see, the map is
//! read-only, and every block boundary is validated before slicing.

use std::fs::File;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::trace;

use crate::encoding::encode_fixed64;
use crate::error::{Error, Result};
use crate::iterator::{error_iterator, Iter, TwoLevelIterator};
use crate::key::{BytewiseComparator, Comparator};
use crate::options::{Options, ReadOptions};
use crate::sstable::block::{Block, BlockIter};
use crate::sstable::filter::FilterBlockReader;
use crate::sstable::format::{read_block, BlockHandle, Footer, FOOTER_SIZE};

/// An open, parsed table file. Immutable and freely shareable.
pub struct Table {
    options: Options,
    file: Mmap,
    /// Namespaces this table's entries in the shared block cache.
    cache_id: u64,
    index_block: Block,
    filter: Option<FilterBlockReader>,
}

impl Table {
    /// Open the table stored in the first `size` bytes of `file`.
    ///
    /// Errors if the footer is malformed or the index block cannot be
    /// read; a missing or unreadable *filter* block merely disables
    /// filtering, since filters are an optimization, not data.
    pub fn open(options: Options, file: File, size: u64) -> Result<Table> {
        if (size as usize) < FOOTER_SIZE {
            return Err(Error::Corruption(
                "file is too short to be an sstable".to_string(),
            ));
        }
        let map = unsafe { Mmap::map(&file)? };
        if map.len() < size as usize {
            return Err(Error::Corruption(
                "file is too short to be an sstable".to_string(),
            ));
        }
        let contents = &map[..size as usize];

        let footer = Footer::decode_from(&contents[size as usize - FOOTER_SIZE..])?;

        // The index block is required to serve any read.
        let read_options = ReadOptions {
            verify_checksums: true,
            fill_cache: false,
        };
        let index_contents = read_block(contents, &read_options, &footer.index_handle)?;
        let index_block = Block::new(index_contents)?;

        let cache_id = options
            .block_cache
            .as_ref()
            .map_or(0, |cache| cache.new_id());

        let filter = Self::read_filter(&options, contents, &read_options, &footer);

        Ok(Table {
            options,
            file: map,
            cache_id,
            index_block,
            filter,
        })
    }

    /// Locate and parse the filter block named by the metaindex, if the
    /// open options carry a matching policy. Failures are swallowed:
    /// meta blocks are advisory.
    fn read_filter(
        options: &Options,
        contents: &[u8],
        read_options: &ReadOptions,
        footer: &Footer,
    ) -> Option<FilterBlockReader> {
        let policy = options.filter_policy.as_ref()?;

        let metaindex_contents =
            read_block(contents, read_options, &footer.metaindex_handle).ok()?;
        let metaindex = Block::new(metaindex_contents).ok()?;

        let mut key = String::from("filter.");
        key.push_str(policy.name());
        let mut iter = metaindex.iter(Arc::new(BytewiseComparator));
        iter.seek(key.as_bytes());
        if !iter.valid() || iter.key() != key.as_bytes() {
            return None;
        }

        let mut handle_input = iter.value();
        let handle = BlockHandle::decode_from(&mut handle_input).ok()?;
        let filter_contents = read_block(contents, read_options, &handle).ok()?;
        Some(FilterBlockReader::new(policy.clone(), filter_contents))
    }

    /// Decode (or fetch from the block cache) the data block addressed by
    /// `handle`.
    fn read_data_block(&self, options: &ReadOptions, handle: &BlockHandle) -> Result<Block> {
        let contents = &self.file[..];

        if let Some(cache) = &self.options.block_cache {
            let mut cache_key = Vec::with_capacity(16);
            encode_fixed64(&mut cache_key, self.cache_id);
            encode_fixed64(&mut cache_key, handle.offset);

            if let Some(cached) = cache.lookup(&cache_key) {
                trace!(offset = handle.offset, "block cache hit");
                return Ok((*cached).clone());
            }

            let block = Block::new(read_block(contents, options, handle)?)?;
            if options.fill_cache {
                let charge = block.size();
                let inserted =
                    cache.insert(&cache_key, block.clone(), charge, Box::new(|_key, _block| {}));
                drop(inserted);
            }
            return Ok(block);
        }

        Block::new(read_block(contents, options, handle)?)
    }

    fn block_iter(&self, options: &ReadOptions, handle: &BlockHandle) -> Result<BlockIter> {
        Ok(self
            .read_data_block(options, handle)?
            .iter(self.options.comparator.clone()))
    }

    /// Iterate the whole table in key order via a two-level iterator over
    /// the index block.
    ///
    /// Takes the table by `Arc` because the iterator's block-opening
    /// closure keeps the table alive for its whole lifetime.
    pub fn new_iterator(table: &Arc<Table>, options: &ReadOptions) -> TwoLevelIterator {
        let index_iter = Box::new(table.index_block.iter(table.options.comparator.clone()));
        let table = Arc::clone(table);
        TwoLevelIterator::new(
            index_iter,
            Box::new(move |read_options, index_value| {
                let mut input = index_value;
                match BlockHandle::decode_from(&mut input) {
                    Ok(handle) => match table.block_iter(read_options, &handle) {
                        Ok(iter) => Box::new(iter) as Box<dyn Iter>,
                        Err(e) => error_iterator(e),
                    },
                    Err(e) => error_iterator(e),
                }
            }),
            options.clone(),
        )
    }

    /// Point lookup: seek the index, consult the filter, and only then
    /// touch a data block. `callback` receives the entry found at or
    /// after `key`, if any; interpretation of that entry (sequence
    /// visibility, tombstones) is the caller's concern.
    pub fn internal_get(
        &self,
        options: &ReadOptions,
        key: &[u8],
        callback: &mut dyn FnMut(&[u8], &[u8]),
    ) -> Result<()> {
        let mut index_iter = self.index_block.iter(self.options.comparator.clone());
        index_iter.seek(key);
        if index_iter.valid() {
            let mut handle_input = index_iter.value();
            let handle = BlockHandle::decode_from(&mut handle_input)?;

            let filtered_out = self
                .filter
                .as_ref()
                .map_or(false, |filter| !filter.key_may_match(handle.offset, key));
            if filtered_out {
                trace!(offset = handle.offset, "filter rejected point lookup");
            } else {
                let mut block_iter = self.block_iter(options, &handle)?;
                block_iter.seek(key);
                if block_iter.valid() {
                    callback(block_iter.key(), block_iter.value());
                }
                block_iter.status()?;
            }
        }
        index_iter.status()
    }
}
