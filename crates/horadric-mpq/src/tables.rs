//! Hash and block tables.
//!
//! The hash table maps a file name's two hash halves to an index into the
//! block table; the block table records where each file's bytes live and how
//! they are stored. Both tables are stored encrypted.

use std::collections::HashMap;

use bitflags::bitflags;
use horadric_common::BinaryReader;
use tracing::debug;

use crate::crypto::{self, HashKind};
use crate::header::{MpqHeader, TABLE_RECORD_SIZE};
use crate::source::ByteSource;
use crate::Result;

/// Name whose table-key hash decrypts the hash table.
const HASH_TABLE_KEY: &str = "(hash table)";

/// Name whose table-key hash decrypts the block table.
const BLOCK_TABLE_KEY: &str = "(block table)";

bitflags! {
    /// Block table flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BlockFlags: u32 {
        /// Sectors are PKWARE imploded, without a compression mask byte
        const IMPLODE = 0x0000_0100;
        /// Sectors carry a compression mask byte
        const COMPRESS = 0x0000_0200;
        /// File data is encrypted
        const ENCRYPTED = 0x0001_0000;
        /// Encryption key is adjusted by the block offset
        const FIX_KEY = 0x0002_0000;
        /// File is a patch
        const PATCH_FILE = 0x0010_0000;
        /// File is stored as one unit instead of sectors
        const SINGLE_UNIT = 0x0100_0000;
        /// File is a deletion marker
        const DELETE_MARKER = 0x0200_0000;
        /// Sectors are followed by a CRC table
        const SECTOR_CRC = 0x0400_0000;
        /// The block holds a file
        const EXISTS = 0x8000_0000;

        const _ = !0;
    }
}

impl BlockFlags {
    /// Flags whose presence makes a block unreadable by this crate.
    pub const UNSUPPORTED: Self = Self::ENCRYPTED
        .union(Self::SINGLE_UNIT)
        .union(Self::SECTOR_CRC);

    /// The subset of these flags that this crate cannot handle.
    #[inline]
    pub fn unsupported(self) -> Self {
        self & Self::UNSUPPORTED
    }
}

/// Hash table entry (16 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashEntry {
    /// Name hash, `NameA` variant
    pub hash_a: u32,
    /// Name hash, `NameB` variant
    pub hash_b: u32,
    /// Windows LANGID of the file, 0 for neutral
    pub locale: u16,
    /// Platform the file is meant for
    pub platform: u16,
    /// Index into the block table, or a sentinel
    pub block_index: u32,
}

impl HashEntry {
    /// Block index of a slot that was never used.
    pub const EMPTY: u32 = 0xFFFF_FFFF;

    /// Block index of a slot whose file was deleted.
    pub const DELETED: u32 = 0xFFFF_FFFE;

    fn read(reader: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            hash_a: reader.read_u32()?,
            hash_b: reader.read_u32()?,
            locale: reader.read_u16()?,
            platform: reader.read_u16()?,
            block_index: reader.read_u32()?,
        })
    }

    /// Check if this slot holds a file reference.
    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.block_index < Self::DELETED
    }

    /// Composite lookup key.
    #[inline]
    pub fn key(&self) -> (u32, u32) {
        (self.hash_b, self.hash_a)
    }
}

/// Block table entry (16 bytes on disk).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockEntry {
    /// Offset of the file data from the start of the archive
    pub file_offset: u32,
    /// Size of the stored data, sector table included
    pub archived_size: u32,
    /// Size of the file once extracted
    pub uncompressed_size: u32,
    /// Storage flags
    pub flags: BlockFlags,
}

impl BlockEntry {
    fn read(reader: &mut BinaryReader<'_>) -> Result<Self> {
        Ok(Self {
            file_offset: reader.read_u32()?,
            archived_size: reader.read_u32()?,
            uncompressed_size: reader.read_u32()?,
            flags: BlockFlags::from_bits_retain(reader.read_u32()?),
        })
    }

    /// Check if the block holds a file.
    #[inline]
    pub fn exists(&self) -> bool {
        self.flags.contains(BlockFlags::EXISTS)
    }
}

/// Decrypted and indexed hash and block tables.
///
/// Lookups use the `(hash_b, hash_a)` pair. Colliding names are not
/// detected: when two slots share a key, the one earlier in the table wins.
#[derive(Debug, Default)]
pub struct TableIndex {
    hashes: HashMap<(u32, u32), HashEntry>,
    blocks: Vec<BlockEntry>,
}

impl TableIndex {
    /// Read, decrypt and index both tables named by `header`.
    pub fn load(source: &dyn ByteSource, header: &MpqHeader) -> Result<Self> {
        let hash_table = read_table(
            source,
            header.hash_table_offset,
            header.hash_table_size(),
            crypto::hash(HASH_TABLE_KEY, HashKind::TableKey)?,
        )?;
        let block_table = read_table(
            source,
            header.block_table_offset,
            header.block_table_size(),
            crypto::hash(BLOCK_TABLE_KEY, HashKind::TableKey)?,
        )?;

        let index = Self::parse(&hash_table, &block_table)?;
        debug!(
            "Loaded MPQ tables: {} hash slots in use, {} blocks",
            index.hashes.len(),
            index.blocks.len()
        );
        Ok(index)
    }

    /// Index already-decrypted table bytes.
    ///
    /// Trailing bytes that do not form a whole record are ignored.
    pub fn parse(hash_table: &[u8], block_table: &[u8]) -> Result<Self> {
        let record = TABLE_RECORD_SIZE as usize;

        let mut reader = BinaryReader::new(block_table);
        let blocks = (0..block_table.len() / record)
            .map(|_| BlockEntry::read(&mut reader))
            .collect::<Result<Vec<_>>>()?;

        let mut reader = BinaryReader::new(hash_table);
        let mut hashes = HashMap::with_capacity(hash_table.len() / record);
        for _ in 0..hash_table.len() / record {
            let entry = HashEntry::read(&mut reader)?;
            if entry.is_occupied() {
                hashes.entry(entry.key()).or_insert(entry);
            }
        }

        Ok(Self { hashes, blocks })
    }

    /// Find the hash entry for `name`.
    pub fn lookup(&self, name: impl AsRef<[u8]>) -> Result<Option<&HashEntry>> {
        let name = name.as_ref();
        let hash_a = crypto::hash(name, HashKind::NameA)?;
        let hash_b = crypto::hash(name, HashKind::NameB)?;
        Ok(self.hashes.get(&(hash_b, hash_a)))
    }

    /// Resolve `name` to its block.
    ///
    /// Returns `None` when no entry matches, the entry points past the block
    /// table, or the block is not flagged as existing.
    pub fn resolve(&self, name: impl AsRef<[u8]>) -> Result<Option<&BlockEntry>> {
        Ok(self
            .lookup(name)?
            .and_then(|entry| self.block(entry.block_index))
            .filter(|block| block.exists()))
    }

    /// Get a block by index.
    #[inline]
    pub fn block(&self, index: u32) -> Option<&BlockEntry> {
        self.blocks.get(index as usize)
    }

    /// All block entries, in table order.
    #[inline]
    pub fn blocks(&self) -> &[BlockEntry] {
        &self.blocks
    }

    /// Number of occupied hash slots.
    #[inline]
    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    /// Check if no hash slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

fn read_table(source: &dyn ByteSource, offset: u32, size: u64, key: u32) -> Result<Vec<u8>> {
    let data = source.read_at(u64::from(offset), size as usize)?;
    let mut data = data.into_owned();
    crypto::decrypt(&mut data, key);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash_record(name: &[u8], block_index: u32) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&crypto::hash(name, HashKind::NameA).unwrap().to_le_bytes());
        data.extend_from_slice(&crypto::hash(name, HashKind::NameB).unwrap().to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&block_index.to_le_bytes());
        data
    }

    fn block_record(offset: u32, archived: u32, size: u32, flags: BlockFlags) -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&offset.to_le_bytes());
        data.extend_from_slice(&archived.to_le_bytes());
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&flags.bits().to_le_bytes());
        data
    }

    #[test]
    fn test_flag_values() {
        assert_eq!(BlockFlags::EXISTS.bits(), 0x8000_0000);
        assert_eq!(BlockFlags::ENCRYPTED.bits(), 0x0001_0000);
        assert_eq!(BlockFlags::SINGLE_UNIT.bits(), 0x0100_0000);
        assert_eq!(BlockFlags::SECTOR_CRC.bits(), 0x0400_0000);

        let flags = BlockFlags::EXISTS | BlockFlags::COMPRESS | BlockFlags::SECTOR_CRC;
        assert_eq!(flags.unsupported(), BlockFlags::SECTOR_CRC);
        let imploded = BlockFlags::EXISTS | BlockFlags::IMPLODE;
        assert!(imploded.unsupported().is_empty());
    }

    #[test]
    fn test_unknown_flag_bits_are_kept() {
        let flags = BlockFlags::from_bits_retain(0x8000_0001);
        assert!(flags.contains(BlockFlags::EXISTS));
        assert_eq!(flags.bits(), 0x8000_0001);
    }

    #[test]
    fn test_slot_sentinels() {
        let mut entry = HashEntry {
            hash_a: 0,
            hash_b: 0,
            locale: 0,
            platform: 0,
            block_index: HashEntry::EMPTY,
        };
        assert!(!entry.is_occupied());
        entry.block_index = HashEntry::DELETED;
        assert!(!entry.is_occupied());
        entry.block_index = 3;
        assert!(entry.is_occupied());
    }

    #[test]
    fn test_resolve() {
        let mut hashes = hash_record(b"a.txt", 0);
        hashes.extend(hash_record(b"b.txt", 1));
        hashes.extend(hash_record(b"gone.txt", 2));
        hashes.extend(hash_record(b"dangling.txt", 9));

        let mut blocks = block_record(32, 10, 10, BlockFlags::EXISTS);
        blocks.extend(block_record(42, 0, 0, BlockFlags::EXISTS));
        blocks.extend(block_record(42, 5, 5, BlockFlags::empty()));

        let index = TableIndex::parse(&hashes, &blocks).unwrap();

        assert_eq!(index.len(), 4);
        assert_eq!(index.blocks().len(), 3);
        assert_eq!(index.resolve("A.TXT").unwrap().unwrap().file_offset, 32);
        assert_eq!(index.resolve("b.txt").unwrap().unwrap().archived_size, 0);
        assert!(index.resolve("gone.txt").unwrap().is_none());
        assert!(index.resolve("dangling.txt").unwrap().is_none());
        assert!(index.resolve("missing.txt").unwrap().is_none());
    }

    #[test]
    fn test_first_duplicate_wins() {
        let mut hashes = hash_record(b"dup.txt", 1);
        hashes.extend(hash_record(b"dup.txt", 0));

        let mut blocks = block_record(100, 1, 1, BlockFlags::EXISTS);
        blocks.extend(block_record(200, 1, 1, BlockFlags::EXISTS));

        let index = TableIndex::parse(&hashes, &blocks).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup("dup.txt").unwrap().unwrap().block_index, 1);
        assert_eq!(index.resolve("dup.txt").unwrap().unwrap().file_offset, 200);
    }

    #[test]
    fn test_empty_slots_are_skipped() {
        let mut hashes = vec![0xFF; 16];
        hashes.extend(hash_record(b"a.txt", 0));

        let index = TableIndex::parse(&hashes, &block_record(0, 0, 0, BlockFlags::EXISTS)).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_resolve_byte_names() {
        let hashes = hash_record(b"caf\xE9.txt", 0);
        let blocks = block_record(32, 4, 4, BlockFlags::EXISTS);

        let index = TableIndex::parse(&hashes, &blocks).unwrap();

        assert!(index.resolve(b"CAF\xE9.TXT").unwrap().is_some());
        assert!(index.resolve("caf\u{e9}.txt").unwrap().is_none());
    }
}
