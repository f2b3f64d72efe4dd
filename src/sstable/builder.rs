//! Table builder: streams sorted entries into a complete SSTable file.
//!
//! # Protocol
//!
//! ```text
//! let mut builder = TableBuilder::new(options, file);
//! for (key, value) in sorted_entries {
//!     builder.add(key, value)?;
//! }
//! builder.finish()?;
//! builder.sync()?;
//! ```
//!
//! Keys must arrive strictly ascending under `options.comparator`. The
//! builder cuts a data block whenever the running estimate reaches
//! `options.block_size`, emits one index entry per data block, and feeds
//! every key to the filter block.
//!
//! Index entries are deferred: the entry for a finished data block is not
//! written until the first key of the *next* block is known, so the index
//! can use a short separator between the two instead of the block's full
//! last key. (Between `"the quick brown fox"` and `"the who"`, the index
//! can store just `"the r"`.)
//!
//! On the first I/O error the builder latches the error, ignores further
//! `add` calls, and returns the error from `finish`; the caller deletes
//! the partial file.

use std::fs::File;
use std::io::{BufWriter, Write};

use tracing::error;

use crate::error::{Error, Result};
use crate::options::{CompressionType, Options};
use crate::sstable::block::BlockBuilder;
use crate::sstable::filter::FilterBlockBuilder;
use crate::sstable::format::{mask_crc, BlockHandle, Footer, CRC32C, FOOTER_SIZE};

/// Index blocks restart on every entry so seeks decode exactly one key.
const INDEX_BLOCK_RESTART_INTERVAL: usize = 1;

/// Builds one immutable table file.
pub struct TableBuilder {
    options: Options,
    file: BufWriter<File>,
    /// Bytes written so far; the offset the next block will start at.
    offset: u64,
    status: Result<()>,
    data_block: BlockBuilder,
    index_block: BlockBuilder,
    /// Last key passed to `add` (or its shortened separator while an
    /// index entry is pending).
    last_key: Vec<u8>,
    num_entries: u64,
    closed: bool,
    filter_block: Option<FilterBlockBuilder>,

    /// True when a data block has been flushed but its index entry is
    /// still waiting for the next block's first key. Implies the data
    /// block is empty.
    pending_index_entry: bool,
    /// Handle of the flushed-but-unindexed data block.
    pending_handle: BlockHandle,
}

impl TableBuilder {
    pub fn new(options: Options, file: File) -> TableBuilder {
        let mut filter_block = options
            .filter_policy
            .as_ref()
            .map(|policy| FilterBlockBuilder::new(policy.clone()));
        if let Some(filter) = &mut filter_block {
            filter.start_block(0);
        }
        TableBuilder {
            data_block: BlockBuilder::new(options.block_restart_interval),
            index_block: BlockBuilder::new(INDEX_BLOCK_RESTART_INTERVAL),
            options,
            file: BufWriter::new(file),
            offset: 0,
            status: Ok(()),
            last_key: Vec::new(),
            num_entries: 0,
            closed: false,
            filter_block,
            pending_index_entry: false,
            pending_handle: BlockHandle::default(),
        }
    }

    /// Append an entry. `key` must be greater than every previously added
    /// key.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.closed);
        if self.status.is_err() {
            return;
        }
        if self.num_entries > 0 {
            debug_assert!(
                self.options.comparator.compare(key, &self.last_key) == std::cmp::Ordering::Greater,
                "keys added out of order"
            );
        }

        if self.pending_index_entry {
            debug_assert!(self.data_block.is_empty());
            self.options
                .comparator
                .find_shortest_separator(&mut self.last_key, key);
            let mut handle_encoding = Vec::new();
            self.pending_handle.encode_to(&mut handle_encoding);
            self.index_block.add(&self.last_key, &handle_encoding);
            self.pending_index_entry = false;
        }

        if let Some(filter) = &mut self.filter_block {
            filter.add_key(key);
        }

        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.num_entries += 1;
        self.data_block.add(key, value);

        if self.data_block.current_size_estimate() >= self.options.block_size {
            self.flush();
        }
    }

    /// Cut the current data block and write it out.
    pub fn flush(&mut self) {
        debug_assert!(!self.closed);
        if self.status.is_err() || self.data_block.is_empty() {
            return;
        }
        debug_assert!(!self.pending_index_entry);

        let raw = self.data_block.finish();
        match self.write_block(raw) {
            Ok(handle) => {
                self.pending_handle = handle;
                self.pending_index_entry = true;
                if let Err(e) = self.file.flush() {
                    self.status = Err(e.into());
                }
            }
            Err(e) => self.status = Err(e),
        }
        self.data_block.reset();

        if let Some(filter) = &mut self.filter_block {
            filter.start_block(self.offset);
        }
    }

    /// Write all trailing metadata and the footer. After this the file
    /// contents are complete (but not yet durable; see [`Self::sync`]).
    pub fn finish(&mut self) -> Result<()> {
        self.flush();
        debug_assert!(!self.closed);
        self.closed = true;

        let mut filter_block_handle = None;

        // Filter block, stored uncompressed.
        if self.status.is_ok() {
            if let Some(filter) = &mut self.filter_block {
                let contents = filter.finish();
                match Self::write_raw_block(
                    &mut self.file,
                    &mut self.offset,
                    &contents,
                    CompressionType::None,
                ) {
                    Ok(handle) => filter_block_handle = Some(handle),
                    Err(e) => self.status = Err(e),
                }
            }
        }

        // Metaindex block: one entry per meta block (just the filter for
        // now).
        let mut metaindex_block_handle = BlockHandle::default();
        if self.status.is_ok() {
            let mut metaindex_block = BlockBuilder::new(self.options.block_restart_interval);
            if let (Some(handle), Some(policy)) =
                (filter_block_handle, self.options.filter_policy.as_ref())
            {
                let mut key = String::from("filter.");
                key.push_str(policy.name());
                let mut handle_encoding = Vec::new();
                handle.encode_to(&mut handle_encoding);
                metaindex_block.add(key.as_bytes(), &handle_encoding);
            }
            let raw = metaindex_block.finish();
            match self.write_block(raw) {
                Ok(handle) => metaindex_block_handle = handle,
                Err(e) => self.status = Err(e),
            }
        }

        // Index block, with the final pending entry keyed by a short
        // successor of the table's last key.
        let mut index_block_handle = BlockHandle::default();
        if self.status.is_ok() {
            if self.pending_index_entry {
                self.options.comparator.find_short_successor(&mut self.last_key);
                let mut handle_encoding = Vec::new();
                self.pending_handle.encode_to(&mut handle_encoding);
                self.index_block.add(&self.last_key, &handle_encoding);
                self.pending_index_entry = false;
            }
            let raw = self.index_block.finish();
            match self.write_block(raw) {
                Ok(handle) => index_block_handle = handle,
                Err(e) => self.status = Err(e),
            }
        }

        // Footer.
        if self.status.is_ok() {
            let footer = Footer {
                metaindex_handle: metaindex_block_handle,
                index_handle: index_block_handle,
            };
            let mut footer_encoding = Vec::new();
            footer.encode_to(&mut footer_encoding);
            if let Err(e) = self.file.write_all(&footer_encoding) {
                self.status = Err(Error::from(e));
            } else {
                self.offset += FOOTER_SIZE as u64;
            }
        }

        if let Err(e) = &self.status {
            error!(error = %e, "table build failed");
        }
        self.status.clone()
    }

    /// Abandon the build; the file contents are unspecified afterwards.
    pub fn abandon(&mut self) {
        debug_assert!(!self.closed);
        self.closed = true;
    }

    /// Flush buffered bytes and force them to stable storage.
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Entries added so far.
    pub fn num_entries(&self) -> u64 {
        self.num_entries
    }

    /// Size of the file generated so far. Accurate after a successful
    /// `finish`.
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn status(&self) -> Result<()> {
        self.status.clone()
    }

    fn write_block(&mut self, raw: Vec<u8>) -> Result<BlockHandle> {
        let compression = match self.options.compression {
            CompressionType::None => CompressionType::None,
            // No compression backend is linked into this build; store the
            // raw bytes exactly as if the block had not shrunk by the
            // required 1/8.
            CompressionType::Snappy => CompressionType::None,
        };
        Self::write_raw_block(&mut self.file, &mut self.offset, &raw, compression)
    }

    fn write_raw_block(
        file: &mut BufWriter<File>,
        offset: &mut u64,
        contents: &[u8],
        compression: CompressionType,
    ) -> Result<BlockHandle> {
        let handle = BlockHandle::new(*offset, contents.len() as u64);
        file.write_all(contents)?;

        let mut trailer = [0u8; 5];
        trailer[0] = compression as u8;
        let mut digest = CRC32C.digest();
        digest.update(contents);
        digest.update(&trailer[..1]);
        let crc = mask_crc(digest.finalize());
        trailer[1..5].copy_from_slice(&crc.to_le_bytes());
        file.write_all(&trailer)?;

        *offset += contents.len() as u64 + trailer.len() as u64;
        Ok(handle)
    }
}
