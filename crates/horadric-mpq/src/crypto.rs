//! MPQ name hashing and table decryption.
//!
//! Both algorithms are driven by a 1280-entry table of pseudo-random
//! constants. The table is generated once per process and shared by every
//! archive. All arithmetic is modulo 2^32.

use std::sync::OnceLock;

use byteorder::{ByteOrder, LittleEndian};

use crate::{Error, Result};

/// Number of entries in the encryption table (5 rows of 256).
pub const ENCRYPTION_TABLE_SIZE: usize = 0x500;

const TABLE_SEED: u32 = 0x0010_0001;
const TABLE_MODULUS: u32 = 0x002A_AAAB;

const HASH_SEED1: u32 = 0x7FED_7FED;
const HASH_SEED2: u32 = 0xEEEE_EEEE;

/// Row of the table used by the decryption stream.
const DECRYPT_ROW: usize = 0x400;

static TABLE: OnceLock<EncryptionTable> = OnceLock::new();

/// The constant table shared by hashing and decryption.
pub struct EncryptionTable {
    values: [u32; ENCRYPTION_TABLE_SIZE],
}

impl EncryptionTable {
    /// Get the process-wide table, generating it on first use.
    pub fn global() -> &'static Self {
        TABLE.get_or_init(Self::generate)
    }

    fn generate() -> Self {
        let mut values = [0u32; ENCRYPTION_TABLE_SIZE];
        let mut seed = TABLE_SEED;

        for column in 0..0x100 {
            for row in 0..5 {
                seed = (seed * 125 + 3) % TABLE_MODULUS;
                let high = (seed & 0xFFFF) << 16;
                seed = (seed * 125 + 3) % TABLE_MODULUS;
                let low = seed & 0xFFFF;
                values[column + row * 0x100] = high | low;
            }
        }

        Self { values }
    }

    /// Get a table entry, or `None` if `index` is out of range.
    #[inline]
    pub fn get(&self, index: usize) -> Option<u32> {
        self.values.get(index).copied()
    }

    /// All table entries.
    #[inline]
    pub fn as_slice(&self) -> &[u32] {
        &self.values
    }
}

impl std::fmt::Debug for EncryptionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionTable")
            .field("len", &self.values.len())
            .finish()
    }
}

/// Hash variants. The discriminant selects the table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum HashKind {
    /// First half of a file's lookup key.
    NameA = 1,
    /// Second half of a file's lookup key.
    NameB = 2,
    /// Key used to decrypt the hash and block tables.
    TableKey = 3,
}

/// Hash a file name.
///
/// Names are hashed byte by byte; ASCII `a`-`z` is folded to upper case and
/// every other byte, including path separators, is used as-is. Archive
/// names are usually in a single-byte code page, so a name such as
/// `caf\xE9.txt` must be passed as bytes rather than as UTF-8 text.
pub fn hash(name: impl AsRef<[u8]>, kind: HashKind) -> Result<u32> {
    let table = EncryptionTable::global();
    let row = (kind as usize) << 8;
    let mut seed1 = HASH_SEED1;
    let mut seed2 = HASH_SEED2;

    for &byte in name.as_ref() {
        let ch = byte.to_ascii_uppercase();
        let index = row + usize::from(ch);
        let value = table.get(index).ok_or(Error::HashIndexOutOfRange(index))?;

        seed1 = value ^ seed1.wrapping_add(seed2);
        seed2 = u32::from(ch)
            .wrapping_add(seed1)
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }

    Ok(seed1)
}

/// Decrypt `data` in place as a run of little-endian u32 words.
///
/// Trailing bytes that do not fill a whole word are left untouched.
pub fn decrypt(data: &mut [u8], key: u32) {
    let table = &EncryptionTable::global().values;
    let mut seed1 = key;
    let mut seed2 = HASH_SEED2;

    for word in data.chunks_exact_mut(4) {
        seed2 = seed2.wrapping_add(table[DECRYPT_ROW + (seed1 & 0xFF) as usize]);

        let plain = LittleEndian::read_u32(word) ^ seed1.wrapping_add(seed2);
        LittleEndian::write_u32(word, plain);

        seed1 = (!seed1 << 0x15).wrapping_add(0x1111_1111) | (seed1 >> 0x0B);
        seed2 = plain
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }
}

/// Inverse of [`decrypt`], used to build fixtures.
#[cfg(test)]
pub(crate) fn encrypt(data: &mut [u8], key: u32) {
    let table = &EncryptionTable::global().values;
    let mut seed1 = key;
    let mut seed2 = HASH_SEED2;

    for word in data.chunks_exact_mut(4) {
        seed2 = seed2.wrapping_add(table[DECRYPT_ROW + (seed1 & 0xFF) as usize]);

        let plain = LittleEndian::read_u32(word);
        LittleEndian::write_u32(word, plain ^ seed1.wrapping_add(seed2));

        seed1 = (!seed1 << 0x15).wrapping_add(0x1111_1111) | (seed1 >> 0x0B);
        seed2 = plain
            .wrapping_add(seed2)
            .wrapping_add(seed2 << 5)
            .wrapping_add(3);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_known_values() {
        let table = EncryptionTable::global();
        assert_eq!(table.as_slice().len(), 1280);
        assert_eq!(table.get(0), Some(0x55C6_36E2));
        assert_eq!(table.get(1), Some(0x02BE_0170));
        assert_eq!(table.get(0x100), Some(0x76F8_C1B1));
        assert_eq!(table.get(0x4FF), Some(0x7303_286C));
        assert_eq!(table.get(0x500), None);
    }

    #[test]
    fn test_table_is_shared() {
        let first = EncryptionTable::global();
        assert!(std::ptr::eq(first, EncryptionTable::global()));
    }

    #[test]
    fn test_table_keys() {
        assert_eq!(
            hash("(hash table)", HashKind::TableKey).unwrap(),
            0xC3AF_3770
        );
        assert_eq!(
            hash("(block table)", HashKind::TableKey).unwrap(),
            0xEC83_B3A3
        );
    }

    #[test]
    fn test_name_hashes() {
        assert_eq!(hash("test.txt", HashKind::NameA).unwrap(), 0x7D9A_A20D);
        assert_eq!(hash("test.txt", HashKind::NameB).unwrap(), 0x9FEE_7CA0);
        assert_eq!(hash("(listfile)", HashKind::NameA).unwrap(), 0xFD65_7910);
        assert_eq!(hash("(listfile)", HashKind::NameB).unwrap(), 0x4E9B_98A7);
    }

    #[test]
    fn test_case_folding() {
        for kind in [HashKind::NameA, HashKind::NameB, HashKind::TableKey] {
            assert_eq!(
                hash("TEST.TXT", kind).unwrap(),
                hash("test.txt", kind).unwrap()
            );
            assert_eq!(hash("zz", kind).unwrap(), hash("ZZ", kind).unwrap());
        }
    }

    #[test]
    fn test_separators_are_not_normalised() {
        assert_ne!(
            hash("data\\global.txt", HashKind::NameA).unwrap(),
            hash("data/global.txt", HashKind::NameA).unwrap()
        );
    }

    #[test]
    fn test_high_bytes_are_hashed_as_is() {
        // Code page 1252 `é` is one byte; its UTF-8 form is two.
        let latin1 = hash(b"caf\xE9.txt", HashKind::NameA).unwrap();
        assert_eq!(latin1, 0xDBC4_9AC6);
        assert_ne!(latin1, hash("caf\u{e9}.txt", HashKind::NameA).unwrap());
        assert_eq!(latin1, hash(b"CAF\xE9.TXT", HashKind::NameA).unwrap());
    }

    #[test]
    fn test_hash_is_stable() {
        let first = hash("units\\human\\footman.mdx", HashKind::NameB).unwrap();
        for _ in 0..4 {
            assert_eq!(
                hash("units\\human\\footman.mdx", HashKind::NameB).unwrap(),
                first
            );
        }
    }

    #[test]
    fn test_decrypt_known_vector() {
        let cipher: [u32; 4] = [0x2B14_C013, 0x7EF0_8E76, 0x3C48_E611, 0x8D00_903C];
        let mut data = Vec::new();
        for word in cipher {
            data.extend_from_slice(&word.to_le_bytes());
        }

        decrypt(&mut data, 0x1234_5678);

        let plain: Vec<u32> = data.chunks_exact(4).map(LittleEndian::read_u32).collect();
        assert_eq!(plain, vec![1, 2, 3, 0xDEAD_BEEF]);
    }

    #[test]
    fn test_decrypt_leaves_tail_bytes() {
        let mut data = vec![0u8; 10];
        data[8] = 0xAB;
        data[9] = 0xCD;

        decrypt(&mut data, 0xC3AF_3770);

        assert_eq!(&data[8..], &[0xAB, 0xCD]);
        assert_ne!(&data[..8], &[0u8; 8]);
    }

    #[test]
    fn test_encrypt_inverts_decrypt() {
        let original: Vec<u8> = (0u8..64).collect();
        let mut data = original.clone();

        encrypt(&mut data, 0xEC83_B3A3);
        assert_ne!(data, original);
        decrypt(&mut data, 0xEC83_B3A3);
        assert_eq!(data, original);
    }
}
