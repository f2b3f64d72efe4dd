//! Prefix-compressed key/value blocks.
//!
//! # Entry format
//!
//! Keys within a block share prefixes with their predecessor:
//!
//! ```text
//! varint32 shared_key_prefix_length
//! varint32 non_shared_key_suffix_length
//! varint32 value_length
//! non_shared key suffix bytes
//! value bytes
//! ```
//!
//! Every `block_restart_interval` entries the builder emits a **restart
//! point**: an entry with `shared == 0` whose byte offset is recorded in a
//! trailing fixed32 array (followed by a fixed32 count). Restart points
//! bound both the cost of reconstructing a key's prefix chain and the
//! search work: the reader binary-searches the restart array, then scans
//! linearly within one restart run.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::encoding::{decode_fixed32, encode_fixed32, get_varint32, put_varint32};
use crate::error::{Error, Result};
use crate::iterator::Iter;
use crate::key::Comparator;

// ------------------------------------------------------------------------------------------------
// Builder
// ------------------------------------------------------------------------------------------------

/// Accumulates sorted entries into the serialized block format.
pub struct BlockBuilder {
    block_restart_interval: usize,
    buffer: Vec<u8>,
    /// Byte offsets of restart entries; always starts with 0.
    restarts: Vec<u32>,
    /// Entries emitted since the last restart.
    counter: usize,
    finished: bool,
    last_key: Vec<u8>,
}

impl BlockBuilder {
    pub fn new(block_restart_interval: usize) -> BlockBuilder {
        assert!(block_restart_interval >= 1);
        BlockBuilder {
            block_restart_interval,
            buffer: Vec::new(),
            restarts: vec![0],
            counter: 0,
            finished: false,
            last_key: Vec::new(),
        }
    }

    /// Discard all state and start a fresh block.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.restarts.clear();
        self.restarts.push(0);
        self.counter = 0;
        self.finished = false;
        self.last_key.clear();
    }

    /// Append an entry. Keys must be added in ascending order under the
    /// comparator the block will be read with; `finish` must not have
    /// been called since the last `reset`.
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(!self.finished);
        debug_assert!(self.counter <= self.block_restart_interval);

        let mut shared = 0;
        if self.counter < self.block_restart_interval {
            // Share a prefix with the previous key.
            let min_length = self.last_key.len().min(key.len());
            while shared < min_length && self.last_key[shared] == key[shared] {
                shared += 1;
            }
        } else {
            // Restart compression.
            self.restarts.push(self.buffer.len() as u32);
            self.counter = 0;
        }
        let non_shared = key.len() - shared;

        put_varint32(&mut self.buffer, shared as u32);
        put_varint32(&mut self.buffer, non_shared as u32);
        put_varint32(&mut self.buffer, value.len() as u32);
        self.buffer.extend_from_slice(&key[shared..]);
        self.buffer.extend_from_slice(value);

        self.last_key.truncate(shared);
        self.last_key.extend_from_slice(&key[shared..]);
        debug_assert_eq!(self.last_key, key);
        self.counter += 1;
    }

    /// Append the restart array and return the completed block contents,
    /// leaving the builder empty. Call `reset` before reuse.
    pub fn finish(&mut self) -> Vec<u8> {
        for &restart in &self.restarts {
            encode_fixed32(&mut self.buffer, restart);
        }
        encode_fixed32(&mut self.buffer, self.restarts.len() as u32);
        self.finished = true;
        std::mem::take(&mut self.buffer)
    }

    /// Uncompressed size of the block `finish` would currently produce.
    pub fn current_size_estimate(&self) -> usize {
        self.buffer.len() + self.restarts.len() * 4 + 4
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

// ------------------------------------------------------------------------------------------------
// Reader
// ------------------------------------------------------------------------------------------------

/// A parsed, immutable block. Cheap to clone: the contents are shared, so
/// the block cache can hand out copies without duplicating bytes.
#[derive(Clone)]
pub struct Block {
    data: Arc<[u8]>,
    /// Offset of the restart array within `data`.
    restart_offset: usize,
    num_restarts: u32,
}

impl Block {
    /// Take ownership of raw block contents, validating the restart array
    /// framing.
    pub fn new(contents: Vec<u8>) -> Result<Block> {
        let size = contents.len();
        if size < 4 {
            return Err(Error::Corruption("bad block contents".to_string()));
        }
        let num_restarts = decode_fixed32(&contents[size - 4..]);
        let max_restarts_allowed = (size - 4) / 4;
        if num_restarts as usize > max_restarts_allowed {
            // The size is too small for the claimed restart count.
            return Err(Error::Corruption("bad block contents".to_string()));
        }
        let restart_offset = size - 4 - 4 * num_restarts as usize;
        Ok(Block {
            data: contents.into(),
            restart_offset,
            num_restarts,
        })
    }

    /// Bytes held by this block.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn iter(&self, comparator: Arc<dyn Comparator>) -> BlockIter {
        BlockIter {
            comparator,
            data: Arc::clone(&self.data),
            restart_offset: self.restart_offset,
            num_restarts: self.num_restarts,
            current: self.restart_offset,
            restart_index: self.num_restarts,
            key: Vec::new(),
            value_offset: 0,
            value_len: 0,
            status: Ok(()),
        }
    }
}

/// Decode the three varint lengths of the entry at `offset`.
///
/// Returns `(shared, non_shared, value_len, payload_offset)`, or `None`
/// if the entry is malformed or overruns `limit`.
#[inline]
fn decode_entry(data: &[u8], offset: usize, limit: usize) -> Option<(usize, usize, usize, usize)> {
    if limit < offset + 3 {
        return None;
    }
    let mut cursor = &data[offset..limit];
    let shared = get_varint32(&mut cursor)? as usize;
    let non_shared = get_varint32(&mut cursor)? as usize;
    let value_len = get_varint32(&mut cursor)? as usize;
    let payload_offset = limit - cursor.len();
    if cursor.len() < non_shared + value_len {
        return None;
    }
    Some((shared, non_shared, value_len, payload_offset))
}

/// Cursor over one block's entries.
pub struct BlockIter {
    comparator: Arc<dyn Comparator>,
    data: Arc<[u8]>,
    restart_offset: usize,
    num_restarts: u32,

    /// Offset of the current entry; `>= restart_offset` means invalid.
    current: usize,
    /// Index of the restart run containing `current`.
    restart_index: u32,
    /// Fully reconstructed key of the current entry.
    key: Vec<u8>,
    value_offset: usize,
    value_len: usize,
    status: Result<()>,
}

impl BlockIter {
    #[inline]
    fn next_entry_offset(&self) -> usize {
        self.value_offset + self.value_len
    }

    fn restart_point(&self, index: u32) -> usize {
        debug_assert!(index < self.num_restarts);
        decode_fixed32(&self.data[self.restart_offset + 4 * index as usize..]) as usize
    }

    fn seek_to_restart_point(&mut self, index: u32) {
        self.key.clear();
        self.restart_index = index;
        // Leave `current` to be set by parse_next_key: position the value
        // cursor so next_entry_offset lands on the restart entry.
        self.value_offset = self.restart_point(index);
        self.value_len = 0;
    }

    fn corruption_error(&mut self) {
        self.current = self.restart_offset;
        self.restart_index = self.num_restarts;
        if self.status.is_ok() {
            self.status = Err(Error::Corruption("bad entry in block".to_string()));
        }
        self.key.clear();
        self.value_offset = 0;
        self.value_len = 0;
    }

    /// Decode the entry at `next_entry_offset`, leaving the cursor on it.
    /// Returns false at the end of the block or on corruption.
    fn parse_next_key(&mut self) -> bool {
        self.current = self.next_entry_offset();
        if self.current >= self.restart_offset {
            // No more entries; mark invalid without an error.
            self.current = self.restart_offset;
            self.restart_index = self.num_restarts;
            return false;
        }

        match decode_entry(&self.data, self.current, self.restart_offset) {
            Some((shared, non_shared, value_len, payload_offset)) if self.key.len() >= shared => {
                self.key.truncate(shared);
                self.key
                    .extend_from_slice(&self.data[payload_offset..payload_offset + non_shared]);
                self.value_offset = payload_offset + non_shared;
                self.value_len = value_len;
                while self.restart_index + 1 < self.num_restarts
                    && self.restart_point(self.restart_index + 1) < self.current
                {
                    self.restart_index += 1;
                }
                true
            }
            _ => {
                self.corruption_error();
                false
            }
        }
    }
}

impl Iter for BlockIter {
    fn valid(&self) -> bool {
        self.current < self.restart_offset
    }

    fn seek_to_first(&mut self) {
        if self.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(0);
        self.parse_next_key();
    }

    fn seek_to_last(&mut self) {
        if self.num_restarts == 0 {
            return;
        }
        self.seek_to_restart_point(self.num_restarts - 1);
        while self.parse_next_key() && self.next_entry_offset() < self.restart_offset {
            // Keep skipping to the last entry.
        }
    }

    fn seek(&mut self, target: &[u8]) {
        if self.num_restarts == 0 {
            return;
        }
        // Binary search in the restart array for the last restart point
        // with a key < target.
        let mut left: u32 = 0;
        let mut right: u32 = self.num_restarts - 1;
        while left < right {
            let mid = (left + right + 1) / 2;
            let region_offset = self.restart_point(mid);
            match decode_entry(&self.data, region_offset, self.restart_offset) {
                Some((shared, non_shared, _, payload_offset)) if shared == 0 => {
                    let mid_key = &self.data[payload_offset..payload_offset + non_shared];
                    if self.comparator.compare(mid_key, target) == Ordering::Less {
                        // Key at mid is smaller than target: blocks before
                        // mid are uninteresting.
                        left = mid;
                    } else {
                        // Key at mid is >= target: blocks at or after mid
                        // are uninteresting.
                        right = mid - 1;
                    }
                }
                _ => {
                    // Restart entries must not share a prefix.
                    self.corruption_error();
                    return;
                }
            }
        }

        // Linear scan within the restart run for the first key >= target.
        self.seek_to_restart_point(left);
        loop {
            if !self.parse_next_key() {
                return;
            }
            if self.comparator.compare(&self.key, target) != Ordering::Less {
                return;
            }
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.parse_next_key();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());

        // Scan backwards to a restart point before `current`, then walk
        // forward until just before it again; there are no prev links.
        let original = self.current;
        while self.restart_point(self.restart_index) >= original {
            if self.restart_index == 0 {
                // No entries before the first one.
                self.current = self.restart_offset;
                self.restart_index = self.num_restarts;
                return;
            }
            self.restart_index -= 1;
        }

        self.seek_to_restart_point(self.restart_index);
        while self.parse_next_key() && self.next_entry_offset() < original {
            // Loop until the end of the previous entry hits `original`.
        }
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.key
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        &self.data[self.value_offset..self.value_offset + self.value_len]
    }

    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}
