//! Engine-side glue around the table layer: database file naming, the
//! open-table cache, and the memtable-to-table flush driver.
//!
//! Everything here operates on a database *directory*: a flat set of
//! files whose names encode their role and 64-bit file number (see
//! [`filename`]). The write-ahead log, manifest, and compaction machinery
//! that also live in that directory are external collaborators; this
//! module only needs to recognise their names.

#[cfg(test)]
mod tests;

pub mod build;
pub mod filename;
pub mod table_cache;

pub use build::{build_table, FileMetaData};
pub use filename::{parse_file_name, FileType};
pub use table_cache::TableCache;
