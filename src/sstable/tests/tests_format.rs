//! Block handles, footer framing, and CRC masking.

use crate::sstable::format::*;

#[test]
fn block_handle_roundtrip() {
    for &(offset, size) in &[(0u64, 0u64), (1, 2), (127, 128), (u64::MAX, u64::MAX >> 1)] {
        let handle = BlockHandle::new(offset, size);
        let mut encoded = Vec::new();
        handle.encode_to(&mut encoded);
        assert!(encoded.len() <= MAX_ENCODED_HANDLE_LENGTH);

        let mut input = encoded.as_slice();
        let decoded = BlockHandle::decode_from(&mut input).unwrap();
        assert_eq!(decoded, handle);
        assert!(input.is_empty());
    }
}

#[test]
fn block_handle_truncated_fails() {
    let mut encoded = Vec::new();
    BlockHandle::new(1 << 40, 1 << 30).encode_to(&mut encoded);
    encoded.pop();
    let mut input = encoded.as_slice();
    assert!(BlockHandle::decode_from(&mut input).is_err());
}

#[test]
fn footer_is_exactly_48_bytes_and_roundtrips() {
    let footer = Footer {
        metaindex_handle: BlockHandle::new(4096, 250),
        index_handle: BlockHandle::new(4351, 1024),
    };
    let mut encoded = Vec::new();
    footer.encode_to(&mut encoded);
    assert_eq!(encoded.len(), FOOTER_SIZE);

    let decoded = Footer::decode_from(&encoded).unwrap();
    assert_eq!(decoded.metaindex_handle, footer.metaindex_handle);
    assert_eq!(decoded.index_handle, footer.index_handle);
}

#[test]
fn footer_magic_is_little_endian_at_the_tail() {
    let mut encoded = Vec::new();
    Footer::default().encode_to(&mut encoded);
    let tail: [u8; 8] = encoded[FOOTER_SIZE - 8..].try_into().unwrap();
    assert_eq!(u64::from_le_bytes(tail), TABLE_MAGIC_NUMBER);
}

#[test]
fn footer_rejects_bad_magic() {
    let mut encoded = Vec::new();
    Footer::default().encode_to(&mut encoded);
    encoded[FOOTER_SIZE - 1] ^= 0x01;
    assert!(Footer::decode_from(&encoded).is_err());
}

#[test]
fn crc_mask_roundtrips_and_differs() {
    for &crc in &[0u32, 1, 0xdead_beef, u32::MAX] {
        let masked = mask_crc(crc);
        assert_ne!(masked, crc);
        assert_eq!(unmask_crc(masked), crc);
    }
}
