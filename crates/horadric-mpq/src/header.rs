//! MPQ archive header.

use horadric_common::BinaryReader;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Error, Result};

/// Size in bytes of a table record (hash or block entry).
pub(crate) const TABLE_RECORD_SIZE: u64 = 16;

/// The 32-byte archive header found at offset 0.
///
/// Only the original (version 0) layout is supported. Later format versions
/// extend this header and are rejected by [`MpqHeader::parse`].
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[repr(C, packed)]
pub struct MpqHeader {
    /// Signature, `MPQ\x1A`
    pub magic: [u8; 4],
    /// Size of the header in bytes
    pub header_size: u32,
    /// Size of the whole archive in bytes
    pub archive_size: u32,
    /// Format version, 0 for the original layout
    pub format_version: u16,
    /// Sector size as a power of two above 512
    pub sector_size_shift: u16,
    /// Offset of the encrypted hash table
    pub hash_table_offset: u32,
    /// Offset of the encrypted block table
    pub block_table_offset: u32,
    /// Number of hash table entries
    pub hash_table_entries: u32,
    /// Number of block table entries
    pub block_table_entries: u32,
}

impl MpqHeader {
    /// Archive signature bytes.
    pub const MAGIC: [u8; 4] = *b"MPQ\x1A";

    /// Archive signature as u32.
    pub const SIGNATURE: u32 = 0x1A51_504D;

    /// Size of the header in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// The only format version this reader accepts.
    pub const SUPPORTED_VERSION: u16 = 0;

    /// Largest accepted sector size shift (4 MiB sectors).
    pub const MAX_SECTOR_SIZE_SHIFT: u16 = 13;

    /// Parse and validate a header.
    ///
    /// The signature is checked before anything else, then the format
    /// version; no offset is trusted until both pass.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut reader = BinaryReader::new(data);

        let magic: [u8; 4] = reader.read_array()?;
        if magic != Self::MAGIC {
            return Err(Error::InvalidSignature {
                expected: Self::SIGNATURE,
                actual: u32::from_le_bytes(magic),
            });
        }

        let mut reader = BinaryReader::new(data);
        let header: Self = reader.read_struct()?;

        let version = header.format_version;
        if version != Self::SUPPORTED_VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        let shift = header.sector_size_shift;
        if shift > Self::MAX_SECTOR_SIZE_SHIFT {
            return Err(Error::InvalidSectorSizeShift(shift));
        }

        Ok(header)
    }

    /// Size in bytes of one sector.
    #[inline]
    pub fn sector_size(&self) -> usize {
        512usize << self.sector_size_shift
    }

    /// Size in bytes of the hash table.
    #[inline]
    pub fn hash_table_size(&self) -> u64 {
        u64::from(self.hash_table_entries) * TABLE_RECORD_SIZE
    }

    /// Size in bytes of the block table.
    #[inline]
    pub fn block_table_size(&self) -> u64 {
        u64::from(self.block_table_entries) * TABLE_RECORD_SIZE
    }

    /// Check that both tables lie within a source of `source_len` bytes.
    pub fn validate_bounds(&self, source_len: u64) -> Result<()> {
        let tables = [
            ("hash", self.hash_table_offset, self.hash_table_size()),
            ("block", self.block_table_offset, self.block_table_size()),
        ];

        for (table, offset, length) in tables {
            let offset = u64::from(offset);
            if offset + length > source_len {
                return Err(Error::TableOutOfBounds {
                    table,
                    offset,
                    length,
                    source_len,
                });
            }
        }

        Ok(())
    }
}
