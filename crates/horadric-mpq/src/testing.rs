//! Fixtures for tests: synthetic archives and an instrumented byte source.

use std::borrow::Cow;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use flate2::write::ZlibEncoder;
use flate2::Compression;
use zerocopy::IntoBytes;

use crate::crypto::{self, HashKind};
use crate::decompress::CompressionMask;
use crate::header::MpqHeader;
use crate::source::{BufferSource, ByteSource};
use crate::tables::{BlockFlags, HashEntry};
use crate::Result;

/// zlib-compress `data`.
pub(crate) fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Lay out `data` as sectors, storing each one encoded when that is smaller.
pub(crate) fn sectors(
    data: &[u8],
    sector_size: usize,
    encode: impl Fn(&[u8]) -> Vec<u8>,
) -> Vec<u8> {
    let chunks: Vec<&[u8]> = data.chunks(sector_size).collect();
    let table_len = (chunks.len() + 1) * 4;

    let mut offsets = vec![table_len as u32];
    let mut body = Vec::new();
    for chunk in chunks {
        let encoded = encode(chunk);
        if encoded.len() < chunk.len() {
            body.extend(encoded);
        } else {
            body.extend_from_slice(chunk);
        }
        offsets.push((table_len + body.len()) as u32);
    }

    let mut out: Vec<u8> = offsets.iter().flat_map(|o| o.to_le_bytes()).collect();
    out.extend(body);
    out
}

/// Sectors stored raw.
pub(crate) fn raw_sectors(data: &[u8], sector_size: usize) -> Vec<u8> {
    sectors(data, sector_size, |chunk| chunk.to_vec())
}

/// Sectors zlib-compressed behind a compression mask byte.
pub(crate) fn zlib_sectors(data: &[u8], sector_size: usize) -> Vec<u8> {
    sectors(data, sector_size, |chunk| {
        let mut out = vec![CompressionMask::ZLIB.bits()];
        out.extend(zlib(chunk));
        out
    })
}

struct PendingFile {
    name: Vec<u8>,
    flags: BlockFlags,
    uncompressed_size: u32,
    payload: Vec<u8>,
}

/// Builds version 0 archives in memory.
///
/// Layout: header, file payloads in insertion order, hash table, block
/// table. Each file gets one hash slot and one block; unused hash slots are
/// left empty.
pub(crate) struct ArchiveBuilder {
    sector_size_shift: u16,
    format_version: u16,
    hash_table_entries: u32,
    files: Vec<PendingFile>,
}

impl ArchiveBuilder {
    pub(crate) fn new() -> Self {
        Self {
            sector_size_shift: 3,
            format_version: 0,
            hash_table_entries: 16,
            files: Vec::new(),
        }
    }

    pub(crate) fn sector_size_shift(mut self, shift: u16) -> Self {
        self.sector_size_shift = shift;
        self
    }

    pub(crate) fn format_version(mut self, version: u16) -> Self {
        self.format_version = version;
        self
    }

    pub(crate) fn sector_size(&self) -> usize {
        512 << self.sector_size_shift
    }

    /// Add a block with a hand-made payload.
    pub(crate) fn block(
        mut self,
        name: impl AsRef<[u8]>,
        flags: BlockFlags,
        uncompressed_size: u32,
        payload: Vec<u8>,
    ) -> Self {
        self.files.push(PendingFile {
            name: name.as_ref().to_vec(),
            flags,
            uncompressed_size,
            payload,
        });
        self
    }

    /// Add a file stored as raw sectors.
    pub(crate) fn file(self, name: impl AsRef<[u8]>, data: &[u8]) -> Self {
        let payload = raw_sectors(data, self.sector_size());
        self.block(name, BlockFlags::EXISTS, data.len() as u32, payload)
    }

    /// Add a file stored as zlib sectors.
    pub(crate) fn zlib_file(self, name: impl AsRef<[u8]>, data: &[u8]) -> Self {
        let payload = zlib_sectors(data, self.sector_size());
        self.block(
            name,
            BlockFlags::EXISTS | BlockFlags::COMPRESS,
            data.len() as u32,
            payload,
        )
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut data = vec![0u8; MpqHeader::SIZE];
        let mut block_table = Vec::new();
        let mut slots = Vec::new();

        for (index, file) in self.files.iter().enumerate() {
            let offset = data.len() as u32;
            data.extend_from_slice(&file.payload);

            block_table.extend(offset.to_le_bytes());
            block_table.extend((file.payload.len() as u32).to_le_bytes());
            block_table.extend(file.uncompressed_size.to_le_bytes());
            block_table.extend(file.flags.bits().to_le_bytes());

            slots.push(HashEntry {
                hash_a: crypto::hash(&file.name, HashKind::NameA).unwrap(),
                hash_b: crypto::hash(&file.name, HashKind::NameB).unwrap(),
                locale: 0,
                platform: 0,
                block_index: index as u32,
            });
        }

        let hash_entries = self.hash_table_entries.max(slots.len() as u32);
        let mut hash_table = vec![0xFFu8; hash_entries as usize * 16];
        for (slot, entry) in hash_table.chunks_exact_mut(16).zip(&slots) {
            slot[0..4].copy_from_slice(&entry.hash_a.to_le_bytes());
            slot[4..8].copy_from_slice(&entry.hash_b.to_le_bytes());
            slot[8..10].copy_from_slice(&entry.locale.to_le_bytes());
            slot[10..12].copy_from_slice(&entry.platform.to_le_bytes());
            slot[12..16].copy_from_slice(&entry.block_index.to_le_bytes());
        }

        crypto::encrypt(
            &mut hash_table,
            crypto::hash("(hash table)", HashKind::TableKey).unwrap(),
        );
        crypto::encrypt(
            &mut block_table,
            crypto::hash("(block table)", HashKind::TableKey).unwrap(),
        );

        let hash_table_offset = data.len() as u32;
        data.extend(hash_table);
        let block_table_offset = data.len() as u32;
        data.extend(block_table);

        let header = MpqHeader {
            magic: MpqHeader::MAGIC,
            header_size: MpqHeader::SIZE as u32,
            archive_size: data.len() as u32,
            format_version: self.format_version,
            sector_size_shift: self.sector_size_shift,
            hash_table_offset,
            block_table_offset,
            hash_table_entries: hash_entries,
            block_table_entries: self.files.len() as u32,
        };
        data[..MpqHeader::SIZE].copy_from_slice(header.as_bytes());
        data
    }
}

/// A buffer source that counts reads and can slow them down.
#[derive(Debug)]
pub(crate) struct CountingSource {
    inner: BufferSource,
    reads: AtomicUsize,
    delay: Duration,
}

impl CountingSource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            inner: BufferSource::new(data),
            reads: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ByteSource for CountingSource {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.inner.read_at(offset, length)
    }

    fn size(&self) -> Result<u64> {
        self.inner.size()
    }
}
