//! Flush driver: drain a sorted iterator into a brand-new table file.
//!
//! This is the step that turns a full memtable into an on-disk table.
//! The contract is all-or-nothing: on success the file is synced, named
//! into place, and verified readable through the table cache; on any
//! failure (including an error latched in the source iterator) the
//! partial file is deleted and the error surfaced.

use std::fs::{remove_file, File};
use std::path::Path;

use tracing::{error, info};

use crate::error::Result;
use crate::iterator::Iter;
use crate::key::InternalKey;
use crate::options::{Options, ReadOptions};
use crate::sstable::TableBuilder;

use super::filename::table_file_name;
use super::table_cache::TableCache;

/// Everything the version machinery records about one table file.
#[derive(Debug, Clone, Default)]
pub struct FileMetaData {
    /// File number; the on-disk name derives from it.
    pub number: u64,
    /// Bytes in the finished file; 0 if nothing was written.
    pub file_size: u64,
    /// Smallest internal key in the table.
    pub smallest: InternalKey,
    /// Largest internal key in the table.
    pub largest: InternalKey,
}

/// Build table file `meta.number` from the entries of `iter` (which must
/// yield internal keys in ascending order).
///
/// An empty iterator writes no file and leaves `meta.file_size == 0`;
/// that is success, not an error.
pub fn build_table(
    dbname: &Path,
    options: &Options,
    table_cache: &TableCache,
    iter: &mut dyn Iter,
    meta: &mut FileMetaData,
) -> Result<()> {
    meta.file_size = 0;
    iter.seek_to_first();

    let fname = table_file_name(dbname, meta.number);
    let mut status = Ok(());

    if iter.valid() {
        status = (|| -> Result<()> {
            let file = File::create(&fname)?;
            let mut builder = TableBuilder::new(options.clone(), file);

            meta.smallest.decode_from(iter.key());
            while iter.valid() {
                let key = iter.key();
                meta.largest.decode_from(key);
                builder.add(key, iter.value());
                iter.next();
            }

            builder.finish()?;
            meta.file_size = builder.file_size();
            let entries = builder.num_entries();
            debug_assert!(meta.file_size > 0);
            builder.sync()?;
            drop(builder);

            // Verify that the table is usable before publishing it.
            let (verify_iter, _) =
                table_cache.new_iterator(&ReadOptions::default(), meta.number, meta.file_size);
            verify_iter.status()?;

            info!(
                number = meta.number,
                file_size = meta.file_size,
                entries,
                "built table file"
            );
            Ok(())
        })();
    }

    // An error latched in the source iterator poisons the whole build.
    if let Err(e) = iter.status() {
        status = Err(e);
    }

    if status.is_ok() && meta.file_size > 0 {
        // Keep it.
    } else {
        if let Err(e) = &status {
            error!(number = meta.number, error = %e, "discarding partial table file");
        }
        let _ = remove_file(&fname);
        meta.file_size = 0;
    }
    status
}
