//! Tests for fixed-width little-endian encoding.

use crate::encoding::*;

#[test]
fn fixed32_layout_is_little_endian() {
    let mut buf = Vec::new();
    encode_fixed32(&mut buf, 0x04030201);
    assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
}

#[test]
fn fixed64_layout_is_little_endian() {
    let mut buf = Vec::new();
    encode_fixed64(&mut buf, 0x0807060504030201);
    assert_eq!(buf, [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
}

#[test]
fn fixed32_roundtrip_sweep() {
    // Walk a 1-bit window across the whole range plus both endpoints.
    let mut values = vec![0u32, u32::MAX];
    for shift in 0..32 {
        values.push(1 << shift);
        values.push((1 << shift) - 1);
    }

    let mut buf = Vec::new();
    for &v in &values {
        encode_fixed32(&mut buf, v);
    }
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(decode_fixed32(&buf[i * 4..]), v);
    }
}

#[test]
fn fixed64_roundtrip_sweep() {
    let mut values = vec![0u64, u64::MAX];
    for shift in 0..64 {
        values.push(1 << shift);
        values.push((1 << shift) - 1);
    }

    let mut buf = Vec::new();
    for &v in &values {
        encode_fixed64(&mut buf, v);
    }
    for (i, &v) in values.iter().enumerate() {
        assert_eq!(decode_fixed64(&buf[i * 8..]), v);
    }
}

#[test]
fn fixed_decode_ignores_trailing_bytes() {
    let mut buf = Vec::new();
    encode_fixed32(&mut buf, 0xdeadbeef);
    buf.extend_from_slice(&[0xff; 16]);
    assert_eq!(decode_fixed32(&buf), 0xdeadbeef);
}
