//! Filter block construction and probing.

use std::sync::Arc;

use crate::sstable::filter::{
    BloomFilterPolicy, FilterBlockBuilder, FilterBlockReader, FilterPolicy, InternalFilterPolicy,
    FILTER_BASE,
};

fn bloom() -> Arc<dyn FilterPolicy> {
    Arc::new(BloomFilterPolicy::default())
}

#[test]
fn empty_builder_produces_probeable_block() {
    let mut builder = FilterBlockBuilder::new(bloom());
    let contents = builder.finish();
    // offset-array position + base_lg trailer only.
    assert_eq!(contents.len(), 5);

    let reader = FilterBlockReader::new(bloom(), contents);
    // No filters at all: conservatively may-match.
    assert!(reader.key_may_match(0, b"foo"));
    assert!(reader.key_may_match(100_000, b"foo"));
}

#[test]
fn single_stride_no_false_negatives() {
    let mut builder = FilterBlockBuilder::new(bloom());
    builder.start_block(100);
    builder.add_key(b"foo");
    builder.add_key(b"bar");
    builder.add_key(b"box");
    let reader = FilterBlockReader::new(bloom(), builder.finish());

    assert!(reader.key_may_match(100, b"foo"));
    assert!(reader.key_may_match(100, b"bar"));
    assert!(reader.key_may_match(100, b"box"));
}

#[test]
fn strides_with_no_blocks_reject_probes() {
    let mut builder = FilterBlockBuilder::new(bloom());
    builder.start_block(0);
    builder.add_key(b"key-in-first-stride");
    // Jump far ahead: every stride in between gets an empty filter.
    builder.start_block(9 * FILTER_BASE as u64);
    builder.add_key(b"key-in-late-stride");
    let reader = FilterBlockReader::new(bloom(), builder.finish());

    assert!(reader.key_may_match(0, b"key-in-first-stride"));
    assert!(reader.key_may_match(9 * FILTER_BASE as u64, b"key-in-late-stride"));

    // Empty filters in between match nothing.
    for stride in 1..9u64 {
        assert!(!reader.key_may_match(stride * FILTER_BASE as u64, b"key-in-first-stride"));
    }
}

#[test]
fn keys_are_scoped_to_their_stride() {
    let mut builder = FilterBlockBuilder::new(bloom());
    builder.start_block(0);
    for i in 0..50u32 {
        builder.add_key(format!("first-{i}").as_bytes());
    }
    builder.start_block(3 * FILTER_BASE as u64);
    for i in 0..50u32 {
        builder.add_key(format!("second-{i}").as_bytes());
    }
    let reader = FilterBlockReader::new(bloom(), builder.finish());

    // Every key matches in its own stride.
    for i in 0..50u32 {
        assert!(reader.key_may_match(0, format!("first-{i}").as_bytes()));
        assert!(reader.key_may_match(3 * FILTER_BASE as u64, format!("second-{i}").as_bytes()));
    }
}

#[test]
fn out_of_range_stride_is_conservative() {
    let mut builder = FilterBlockBuilder::new(bloom());
    builder.start_block(0);
    builder.add_key(b"k");
    let reader = FilterBlockReader::new(bloom(), builder.finish());

    // Far beyond any built filter: may match, never a false negative.
    assert!(reader.key_may_match(100 * FILTER_BASE as u64, b"k"));
}

#[test]
fn malformed_contents_are_conservative() {
    let reader = FilterBlockReader::new(bloom(), vec![]);
    assert!(reader.key_may_match(0, b"k"));

    let reader = FilterBlockReader::new(bloom(), vec![1, 2, 3]);
    assert!(reader.key_may_match(0, b"k"));

    // Offset-array position pointing past the end.
    let mut bogus = vec![0u8; 5];
    bogus[0..4].copy_from_slice(&100u32.to_le_bytes());
    bogus[4] = 11;
    let reader = FilterBlockReader::new(bloom(), bogus);
    assert!(reader.key_may_match(0, b"k"));
}

#[test]
fn internal_policy_ignores_sequence_tags() {
    use crate::key::{append_internal_key, ValueType};

    let policy = InternalFilterPolicy::wrap(bloom());
    let mut builder = FilterBlockBuilder::new(policy.clone());
    builder.start_block(0);

    let mut stored = Vec::new();
    append_internal_key(&mut stored, b"user-key", 7, ValueType::Value);
    builder.add_key(&stored);
    let reader = FilterBlockReader::new(policy, builder.finish());

    // Probing with any other sequence/type still hits.
    let mut probe = Vec::new();
    append_internal_key(&mut probe, b"user-key", 123_456, ValueType::Deletion);
    assert!(reader.key_may_match(0, &probe));
}
