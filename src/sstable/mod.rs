//! Sorted String Table (SSTable) module.
//!
//! An SSTable is an **immutable**, sorted map from internal keys to values,
//! stored as a self-describing file. Once written it is never modified;
//! updates and deletions appear as newer entries in later tables.
//!
//! # On-disk layout
//!
//! ```text
//! [data block 0][trailer 0]
//! [data block 1][trailer 1]
//! ...
//! [filter block][trailer]        (present iff a filter policy is set)
//! [metaindex block][trailer]
//! [index block][trailer]
//! [footer]                       (exactly 48 bytes)
//! ```
//!
//! Every `trailer` is one compression-type byte followed by a masked
//! CRC32C over `block bytes ‖ type byte`. A [`BlockHandle`] addresses the
//! block bytes *excluding* the trailer. The footer carries the metaindex
//! and index handles (padded to 40 bytes) and the table magic number.
//!
//! - **Data blocks** hold prefix-compressed key/value entries with a
//!   restart array for binary search ([`block`]).
//! - **Filter block** holds one filter per 2 KiB of file, built from every
//!   key added to the data blocks ([`filter`]).
//! - **Metaindex block** maps `"filter.<policy name>"` to the filter
//!   block's handle.
//! - **Index block** maps separator keys to data-block handles, one entry
//!   per data block, restart interval 1.
//!
//! # Concurrency
//!
//! Tables are immutable, so an open [`Table`] may be shared and read from
//! any number of threads without locking. The writer side
//! ([`TableBuilder`]) is strictly single-threaded and assumes exclusive
//! ownership of its output file.

#[cfg(test)]
mod tests;

pub mod block;
pub mod builder;
pub mod filter;
pub mod format;
pub mod table;

pub use block::{Block, BlockBuilder};
pub use builder::TableBuilder;
pub use filter::{BloomFilterPolicy, FilterBlockBuilder, FilterBlockReader, FilterPolicy};
pub use format::{BlockHandle, Footer, BLOCK_TRAILER_SIZE, FOOTER_SIZE, TABLE_MAGIC_NUMBER};
pub use table::Table;
