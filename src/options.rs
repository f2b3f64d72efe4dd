//! Tunables shared across table construction and reads.
//!
//! [`Options`] is an immutable value passed by reference (or cloned; all
//! heavyweight members sit behind `Arc`). Only `block_size` and
//! `compression` are meaningful to vary between operations on the same
//! writer.

use std::sync::Arc;

use crate::cache::ShardedLruCache;
use crate::key::{BytewiseComparator, Comparator};
use crate::sstable::block::Block;
use crate::sstable::filter::FilterPolicy;

/// How block contents are transformed before landing on disk.
///
/// The discriminants are stored verbatim in each block trailer, so they are
/// part of the on-disk format and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// Store raw block bytes.
    None = 0,
    /// Snappy-compressed block bytes. No backend is linked into this build:
    /// the writer falls back to [`CompressionType::None`], and reading a
    /// block that carries this tag reports corruption.
    Snappy = 1,
}

impl CompressionType {
    pub fn from_u8(byte: u8) -> Option<CompressionType> {
        match byte {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

/// Construction-time and open-time options for tables.
#[derive(Clone)]
pub struct Options {
    /// Order applied to keys inside blocks and across the table.
    pub comparator: Arc<dyn Comparator>,

    /// Approximate uncompressed size of a data block; the builder flushes
    /// once the estimate reaches this threshold.
    pub block_size: usize,

    /// Number of entries between restart points in data blocks.
    pub block_restart_interval: usize,

    /// Transform applied to blocks on write.
    pub compression: CompressionType,

    /// Policy used to build and probe per-table filter blocks. `None`
    /// disables filters entirely.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    /// Cache for decoded data blocks, shared across tables. `None` reads
    /// every block from the file each time.
    pub block_cache: Option<ShardedLruCache<Block>>,

    /// Upper bound on simultaneously open table files; the table cache is
    /// sized from this.
    pub max_open_files: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            comparator: Arc::new(BytewiseComparator),
            block_size: 4 * 1024,
            block_restart_interval: 16,
            compression: CompressionType::None,
            filter_policy: None,
            block_cache: None,
            max_open_files: 1000,
        }
    }
}

/// Per-read options.
#[derive(Clone)]
pub struct ReadOptions {
    /// Verify the CRC32C trailer of every block read. On by default: a
    /// flipped bit anywhere in a block must surface as corruption rather
    /// than silently wrong data.
    pub verify_checksums: bool,

    /// Whether blocks read for this operation should populate the block
    /// cache. Bulk scans typically turn this off.
    pub fill_cache: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            verify_checksums: true,
            fill_cache: true,
        }
    }
}
