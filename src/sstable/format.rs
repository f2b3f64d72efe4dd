//! On-disk framing: block handles, the table footer, and checksummed
//! block reads.
//!
//! The byte-for-byte layout here is the compatibility contract between
//! writers and readers; see the module docs of [`super`] for the overall
//! file structure.

use crc::{Crc, CRC_32_ISCSI};

use crate::encoding::{
    decode_fixed32, encode_fixed32, get_varint64, put_varint64,
};
use crate::error::{Error, Result};
use crate::options::{CompressionType, ReadOptions};

/// 1-byte compression type + fixed32 masked CRC.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Two padded block handles + fixed64 magic.
pub const FOOTER_SIZE: usize = 48;

/// Identifies a file as an SSTable. Stored little-endian at the very end
/// of the footer.
pub const TABLE_MAGIC_NUMBER: u64 = 0xdb4775248b80fb57;

/// Largest encoding of a [`BlockHandle`]: two maximal varint64s.
pub const MAX_ENCODED_HANDLE_LENGTH: usize = 10 + 10;

/// CRC32C (Castagnoli), the polynomial used by every block trailer.
pub(crate) const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282ead8;

/// Mask a CRC so that CRCs of byte strings containing embedded CRCs do
/// not collide with them.
#[inline]
pub fn mask_crc(crc: u32) -> u32 {
    ((crc >> 15) | (crc << 17)).wrapping_add(MASK_DELTA)
}

/// Inverse of [`mask_crc`].
#[inline]
pub fn unmask_crc(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    (rot >> 17) | (rot << 15)
}

// ------------------------------------------------------------------------------------------------
// Block handle
// ------------------------------------------------------------------------------------------------

/// File offset and byte length of a block, excluding its trailer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> BlockHandle {
        BlockHandle { offset, size }
    }

    /// Append `varint64(offset) ‖ varint64(size)`.
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        put_varint64(dst, self.offset);
        put_varint64(dst, self.size);
    }

    /// Parse a handle from the front of `input`, advancing the cursor.
    pub fn decode_from(input: &mut &[u8]) -> Result<BlockHandle> {
        match (get_varint64(input), get_varint64(input)) {
            (Some(offset), Some(size)) => Ok(BlockHandle { offset, size }),
            _ => Err(Error::Corruption("bad block handle".to_string())),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// Footer
// ------------------------------------------------------------------------------------------------

/// The fixed-size tail of every table file.
#[derive(Debug, Clone, Copy, Default)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    /// Append the footer: both handles, zero-padded to 40 bytes, then the
    /// magic number as two fixed32 halves (low half first).
    pub fn encode_to(&self, dst: &mut Vec<u8>) {
        let original_size = dst.len();
        self.metaindex_handle.encode_to(dst);
        self.index_handle.encode_to(dst);
        dst.resize(original_size + 2 * MAX_ENCODED_HANDLE_LENGTH, 0);
        encode_fixed32(dst, (TABLE_MAGIC_NUMBER & 0xffff_ffff) as u32);
        encode_fixed32(dst, (TABLE_MAGIC_NUMBER >> 32) as u32);
        debug_assert_eq!(dst.len(), original_size + FOOTER_SIZE);
    }

    /// Parse a footer from exactly the last [`FOOTER_SIZE`] bytes of a
    /// table file.
    pub fn decode_from(input: &[u8]) -> Result<Footer> {
        if input.len() < FOOTER_SIZE {
            return Err(Error::Corruption(
                "file is too short to be an sstable".to_string(),
            ));
        }
        let input = &input[input.len() - FOOTER_SIZE..];
        let magic_lo = u64::from(decode_fixed32(&input[FOOTER_SIZE - 8..]));
        let magic_hi = u64::from(decode_fixed32(&input[FOOTER_SIZE - 4..]));
        let magic = (magic_hi << 32) | magic_lo;
        if magic != TABLE_MAGIC_NUMBER {
            return Err(Error::Corruption(
                "not an sstable (bad magic number)".to_string(),
            ));
        }

        let mut cursor = &input[..FOOTER_SIZE - 8];
        let metaindex_handle = BlockHandle::decode_from(&mut cursor)?;
        let index_handle = BlockHandle::decode_from(&mut cursor)?;
        Ok(Footer {
            metaindex_handle,
            index_handle,
        })
    }
}

// ------------------------------------------------------------------------------------------------
// Block reads
// ------------------------------------------------------------------------------------------------

/// Read and validate the block addressed by `handle` from `file` (the
/// full mapped table bytes).
///
/// Verifies the trailer CRC when `options.verify_checksums` is set and
/// rejects unknown or unsupported compression types. Returns the raw
/// block contents.
pub fn read_block(file: &[u8], options: &ReadOptions, handle: &BlockHandle) -> Result<Vec<u8>> {
    let offset = handle.offset as usize;
    let n = handle.size as usize;
    let end = offset
        .checked_add(n)
        .and_then(|v| v.checked_add(BLOCK_TRAILER_SIZE));
    let end = match end {
        Some(end) if end <= file.len() => end,
        _ => return Err(Error::Corruption("truncated block read".to_string())),
    };

    let data = &file[offset..end];
    let type_byte = data[n];

    if options.verify_checksums {
        let stored = unmask_crc(decode_fixed32(&data[n + 1..]));
        let mut digest = CRC32C.digest();
        digest.update(&data[..n + 1]);
        let actual = digest.finalize();
        if actual != stored {
            return Err(Error::Corruption("block checksum mismatch".to_string()));
        }
    }

    match CompressionType::from_u8(type_byte) {
        Some(CompressionType::None) => Ok(data[..n].to_vec()),
        Some(CompressionType::Snappy) => {
            // No decompression backend is linked into this build; a table
            // written by it never carries this tag.
            Err(Error::Corruption(
                "corrupted compressed block contents".to_string(),
            ))
        }
        None => Err(Error::Corruption("bad block type".to_string())),
    }
}
