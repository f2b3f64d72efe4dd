//! The polymorphic iterator surface.
//!
//! Every cursor in the engine, from block iterators to the two-level
//! table iterator, speaks the same object-safe [`Iter`] trait so
//! they can be composed and handed across module boundaries as
//! `Box<dyn Iter>`.
//!
//! # Contract
//!
//! - `key()`/`value()` may only be called while `valid()` is true, and the
//!   returned slices are only guaranteed until the next positioning call.
//! - Errors are **sticky**: once `status()` is non-ok it stays non-ok and
//!   `valid()` returns false.
//! - Dropping an iterator runs its registered cleanups in registration
//!   order. The first cleanup is stored inline; only a second registration
//!   allocates.

use crate::error::{Error, Result};
use crate::options::ReadOptions;

/// An ordered cursor over key/value byte slices.
pub trait Iter {
    /// Whether the iterator is positioned at an entry.
    fn valid(&self) -> bool;

    /// Position at the first entry. `valid()` iff the source is non-empty.
    fn seek_to_first(&mut self);

    /// Position at the last entry. `valid()` iff the source is non-empty.
    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= `target`.
    fn seek(&mut self, target: &[u8]);

    /// Advance to the next entry. Requires `valid()`.
    fn next(&mut self);

    /// Retreat to the previous entry. Requires `valid()`.
    fn prev(&mut self);

    /// Key at the current entry. Requires `valid()`.
    fn key(&self) -> &[u8];

    /// Value at the current entry. Requires `valid()`.
    fn value(&self) -> &[u8];

    /// First error this iterator encountered, if any.
    fn status(&self) -> Result<()>;
}

// ------------------------------------------------------------------------------------------------
// Cleanup list
// ------------------------------------------------------------------------------------------------

type CleanupFn = Box<dyn FnOnce() + Send>;

/// An ordered list of actions run exactly once when the owner drops.
///
/// The head cell is inline so the common one-cleanup case costs no extra
/// allocation beyond the closure itself.
#[derive(Default)]
pub struct CleanupList {
    head: Option<CleanupFn>,
    rest: Vec<CleanupFn>,
}

impl CleanupList {
    pub fn new() -> Self {
        CleanupList::default()
    }

    /// Append a cleanup; it will run after all previously registered ones.
    pub fn register<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        if self.head.is_none() {
            self.head = Some(Box::new(f));
        } else {
            self.rest.push(Box::new(f));
        }
    }
}

impl Drop for CleanupList {
    fn drop(&mut self) {
        if let Some(head) = self.head.take() {
            head();
        }
        for cleanup in self.rest.drain(..) {
            cleanup();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Empty / error iterators
// ------------------------------------------------------------------------------------------------

struct EmptyIterator {
    status: Result<()>,
}

impl Iter for EmptyIterator {
    fn valid(&self) -> bool {
        false
    }
    fn seek_to_first(&mut self) {}
    fn seek_to_last(&mut self) {}
    fn seek(&mut self, _target: &[u8]) {}
    fn next(&mut self) {
        panic!("next() on an empty iterator");
    }
    fn prev(&mut self) {
        panic!("prev() on an empty iterator");
    }
    fn key(&self) -> &[u8] {
        panic!("key() on an empty iterator");
    }
    fn value(&self) -> &[u8] {
        panic!("value() on an empty iterator");
    }
    fn status(&self) -> Result<()> {
        self.status.clone()
    }
}

/// An iterator over nothing with ok status.
pub fn empty_iterator() -> Box<dyn Iter> {
    Box::new(EmptyIterator { status: Ok(()) })
}

/// An iterator over nothing that reports the given error.
pub fn error_iterator(error: Error) -> Box<dyn Iter> {
    Box::new(EmptyIterator {
        status: Err(error),
    })
}

// ------------------------------------------------------------------------------------------------
// Two-level iterator
// ------------------------------------------------------------------------------------------------

/// Opens the iterator for one data block, given the encoded block handle
/// stored as the index entry's value.
pub type BlockFunction = Box<dyn FnMut(&ReadOptions, &[u8]) -> Box<dyn Iter> + Send>;

/// Composes an index iterator with per-block data iterators.
///
/// The index iterator yields `separator_key → encoded block handle`; this
/// iterator lazily opens the pointed-at block and walks its entries,
/// skipping empty blocks in whichever direction it is moving.
pub struct TwoLevelIterator {
    index_iter: Box<dyn Iter>,
    block_function: BlockFunction,
    options: ReadOptions,
    status: Result<()>,
    data_iter: Option<Box<dyn Iter>>,
    /// Handle backing `data_iter`, used to avoid re-opening the same block.
    data_block_handle: Vec<u8>,
    cleanups: CleanupList,
}

impl TwoLevelIterator {
    pub fn new(
        index_iter: Box<dyn Iter>,
        block_function: BlockFunction,
        options: ReadOptions,
    ) -> Self {
        TwoLevelIterator {
            index_iter,
            block_function,
            options,
            status: Ok(()),
            data_iter: None,
            data_block_handle: Vec::new(),
            cleanups: CleanupList::new(),
        }
    }

    /// Run `f` when this iterator is dropped.
    pub fn register_cleanup<F: FnOnce() + Send + 'static>(&mut self, f: F) {
        self.cleanups.register(f);
    }

    fn save_error(&mut self, result: Result<()>) {
        if self.status.is_ok() {
            if let Err(e) = result {
                self.status = Err(e);
            }
        }
    }

    fn set_data_iterator(&mut self, data_iter: Option<Box<dyn Iter>>) {
        if let Some(old) = &self.data_iter {
            let status = old.status();
            self.save_error(status);
        }
        self.data_iter = data_iter;
    }

    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.set_data_iterator(None);
            return;
        }
        let handle = self.index_iter.value().to_vec();
        if self.data_iter.is_some() && handle == self.data_block_handle {
            // data_iter already points at this block.
            return;
        }
        let iter = (self.block_function)(&self.options, &handle);
        self.data_block_handle = handle;
        self.set_data_iterator(Some(iter));
    }

    fn skip_empty_data_blocks_forward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_first();
            }
        }
    }

    fn skip_empty_data_blocks_backward(&mut self) {
        while self.data_iter.as_ref().map_or(true, |d| !d.valid()) {
            if !self.index_iter.valid() {
                self.set_data_iterator(None);
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(data) = &mut self.data_iter {
                data.seek_to_last();
            }
        }
    }
}

impl Iter for TwoLevelIterator {
    fn valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|d| d.valid())
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_first();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek_to_last();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(data) = &mut self.data_iter {
            data.seek(target);
        }
        self.skip_empty_data_blocks_forward();
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        if let Some(data) = &mut self.data_iter {
            data.next();
        }
        self.skip_empty_data_blocks_forward();
    }

    fn prev(&mut self) {
        debug_assert!(self.valid());
        if let Some(data) = &mut self.data_iter {
            data.prev();
        }
        self.skip_empty_data_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        self.data_iter.as_ref().expect("valid iterator").key()
    }

    fn value(&self) -> &[u8] {
        self.data_iter.as_ref().expect("valid iterator").value()
    }

    fn status(&self) -> Result<()> {
        self.index_iter.status()?;
        if let Some(data) = &self.data_iter {
            data.status()?;
        }
        self.status.clone()
    }
}
