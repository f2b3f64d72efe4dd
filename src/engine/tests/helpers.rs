//! Shared fixtures for engine-level tests.

use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::fmt::Subscriber;

use crate::key::{BytewiseComparator, InternalKeyComparator, ValueType};
use crate::memtable::Memtable;
use crate::options::Options;
use crate::sstable::filter::InternalFilterPolicy;
use crate::sstable::BloomFilterPolicy;

pub fn init_tracing() {
    let _ = Subscriber::builder()
        .with_max_level(Level::TRACE)
        .try_init();
}

/// Options configured for internal-key tables, the way the engine builds
/// them: internal-key comparator and a tag-stripping bloom filter.
pub fn internal_options() -> Options {
    Options {
        comparator: Arc::new(InternalKeyComparator::new(Arc::new(BytewiseComparator))),
        filter_policy: Some(InternalFilterPolicy::wrap(Arc::new(
            BloomFilterPolicy::default(),
        ))),
        ..Options::default()
    }
}

/// A memtable holding `(key-{i}, value-{i})` puts at sequences 1..=n.
pub fn populated_memtable(n: u64) -> Memtable {
    let memtable = Memtable::new(InternalKeyComparator::new(Arc::new(BytewiseComparator)));
    for i in 0..n {
        memtable.add(
            i + 1,
            ValueType::Value,
            format!("key-{i:06}").as_bytes(),
            format!("value-{i}").as_bytes(),
        );
    }
    memtable
}
