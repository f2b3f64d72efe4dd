//! Filter blocks: per-table membership filters consulted before data
//! block reads.
//!
//! # Layout
//!
//! One filter is generated for every 2 KiB (`FILTER_BASE`) of table file.
//! For a data block starting at file offset `o`, the applicable filter is
//! `filter[o / FILTER_BASE]`; a filter covers the keys of every data block
//! whose *first byte* falls in its stride. Strides containing no block
//! start get an empty filter, and empty filters reject every probe.
//!
//! ```text
//! filter_0 ‖ filter_1 ‖ … ‖ filter_{m-1}
//! fixed32 offset_of_filter_i   (for each i)
//! fixed32 offset_of_offset_array
//! byte    base_lg              (= 11)
//! ```
//!
//! The filter payload itself is opaque to this module: a [`FilterPolicy`]
//! builds it from a batch of keys and answers probes against it.

use std::sync::Arc;

use bloomfilter::Bloom;

use crate::encoding::{decode_fixed32, encode_fixed32};
use crate::key::extract_user_key;

/// Base-2 log of the filter stride.
pub const FILTER_BASE_LG: usize = 11;

/// Byte stride of the file covered by one filter (2 KiB).
pub const FILTER_BASE: usize = 1 << FILTER_BASE_LG;

// ------------------------------------------------------------------------------------------------
// Policy
// ------------------------------------------------------------------------------------------------

/// Builds and probes the per-stride filter payloads.
///
/// Implementations must never produce false negatives: if a key was in
/// the batch passed to `create_filter`, `key_may_match` on the resulting
/// filter must return true. False positives are allowed at whatever rate
/// the policy trades space for.
pub trait FilterPolicy: Send + Sync {
    /// Name recorded in the table's metaindex; reading a table applies a
    /// policy only if the names match.
    fn name(&self) -> &'static str;

    /// Append a filter covering `keys` to `dst`. Never called with an
    /// empty batch.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Whether `key` may have been in the batch `filter` was built from.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Bloom-filter policy.
#[derive(Debug, Clone, Copy)]
pub struct BloomFilterPolicy {
    false_positive_rate: f64,
}

impl BloomFilterPolicy {
    /// A policy targeting the given per-probe false-positive rate.
    pub fn new(false_positive_rate: f64) -> BloomFilterPolicy {
        BloomFilterPolicy {
            false_positive_rate,
        }
    }
}

impl Default for BloomFilterPolicy {
    fn default() -> Self {
        BloomFilterPolicy::new(0.01)
    }
}

impl FilterPolicy for BloomFilterPolicy {
    fn name(&self) -> &'static str {
        "stratadb.BloomFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        // `keys` is non-empty by contract, so construction cannot fail on
        // the item count.
        if let Ok(mut bloom) =
            Bloom::<Vec<u8>>::new_for_fp_rate(keys.len(), self.false_positive_rate)
        {
            for key in keys {
                bloom.set(&key.to_vec());
            }
            dst.extend_from_slice(bloom.as_slice());
        }
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        match Bloom::<Vec<u8>>::from_slice(filter) {
            Ok(bloom) => bloom.check(&key.to_vec()),
            // A filter we cannot parse must not hide keys.
            Err(_) => true,
        }
    }
}

/// Adapts a user-key policy to internal keys by stripping the 8-byte tag
/// before delegating.
///
/// Tables store internal keys, but a point lookup probes with whatever
/// sequence number its snapshot dictates; filtering must therefore ignore
/// the tag entirely.
pub struct InternalFilterPolicy {
    user_policy: Arc<dyn FilterPolicy>,
}

impl InternalFilterPolicy {
    pub fn wrap(user_policy: Arc<dyn FilterPolicy>) -> Arc<dyn FilterPolicy> {
        Arc::new(InternalFilterPolicy { user_policy })
    }
}

impl FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &'static str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let user_keys: Vec<&[u8]> = keys.iter().map(|key| extract_user_key(key)).collect();
        self.user_policy.create_filter(&user_keys, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy.key_may_match(extract_user_key(key), filter)
    }
}

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Accumulates the filter block for one table as data blocks are cut.
///
/// The table builder calls `start_block(offset)` every time a data block
/// is flushed, then keeps feeding keys; `finish` emits the offsets array
/// and trailer byte.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened contents of the keys pending for the current filter.
    keys: Vec<u8>,
    /// Start offset of each pending key within `keys`.
    start: Vec<usize>,
    /// Filter block contents built so far.
    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(policy: Arc<dyn FilterPolicy>) -> FilterBlockBuilder {
        FilterBlockBuilder {
            policy,
            keys: Vec::new(),
            start: Vec::new(),
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Note that the next data block will start at `block_offset`,
    /// emitting filters (possibly empty) for every stride boundary
    /// crossed since the last call.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset / FILTER_BASE as u64) as usize;
        debug_assert!(filter_index >= self.filter_offsets.len());
        while filter_index > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    /// Buffer a key for the filter covering the current data block.
    pub fn add_key(&mut self, key: &[u8]) {
        self.start.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    /// Flush any pending filter and append the offset array, its
    /// position, and the base log. Returns the completed block contents.
    pub fn finish(&mut self) -> Vec<u8> {
        if !self.start.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        for &offset in &self.filter_offsets {
            encode_fixed32(&mut self.result, offset);
        }
        encode_fixed32(&mut self.result, array_offset);
        self.result.push(FILTER_BASE_LG as u8);
        std::mem::take(&mut self.result)
    }

    fn generate_filter(&mut self) {
        let num_keys = self.start.len();
        if num_keys == 0 {
            // Fast path: an empty filter for a stride with no blocks.
            self.filter_offsets.push(self.result.len() as u32);
            return;
        }

        // Reconstruct key slices from the flattened buffer.
        self.start.push(self.keys.len()); // simplifies length computation
        let tmp_keys: Vec<&[u8]> = (0..num_keys)
            .map(|i| &self.keys[self.start[i]..self.start[i + 1]])
            .collect();

        self.filter_offsets.push(self.result.len() as u32);
        self.policy.create_filter(&tmp_keys, &mut self.result);

        self.keys.clear();
        self.start.clear();
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// Probes a serialized filter block.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    /// Offset of the fixed32 offset array within `data`.
    offset_array: usize,
    /// Number of filters.
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Parse the trailer of `contents`. Malformed contents produce a
    /// reader that answers "may match" for everything rather than an
    /// error: a broken filter must never hide a key.
    pub fn new(policy: Arc<dyn FilterPolicy>, contents: Vec<u8>) -> FilterBlockReader {
        let mut reader = FilterBlockReader {
            policy,
            data: Vec::new(),
            offset_array: 0,
            num: 0,
            base_lg: 0,
        };

        let n = contents.len();
        if n < 5 {
            // 1 byte base_lg + 4 bytes offset-array position, minimum.
            return reader;
        }
        let base_lg = contents[n - 1];
        let last_word = decode_fixed32(&contents[n - 5..]) as usize;
        if last_word > n - 5 {
            return reader;
        }

        reader.num = (n - 5 - last_word) / 4;
        reader.offset_array = last_word;
        reader.base_lg = base_lg;
        reader.data = contents;
        reader
    }

    /// Whether `key` may be present in the data block starting at file
    /// offset `block_offset`.
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        let index = (block_offset >> self.base_lg) as usize;
        if index < self.num {
            let slot = self.offset_array + index * 4;
            let start = decode_fixed32(&self.data[slot..]) as usize;
            let limit = decode_fixed32(&self.data[slot + 4..]) as usize;
            if start <= limit && limit <= self.offset_array {
                if start == limit {
                    // Empty filters match no keys.
                    return false;
                }
                return self.policy.key_may_match(key, &self.data[start..limit]);
            }
            // Inconsistent offsets: treat as a potential match rather
            // than risk a false negative.
        }
        true
    }
}
