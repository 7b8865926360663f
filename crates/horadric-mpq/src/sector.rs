//! Sector offset tables and file extraction.
//!
//! A file's archived range starts with a table of `sector_count + 1` u32
//! offsets, relative to the start of the range. Sector `i` occupies
//! `offsets[i]..offsets[i + 1]`. A sector whose span equals its expected
//! length is stored raw; anything else goes through the [`SectorCodec`].

use std::ops::Range;

use horadric_common::BinaryReader;
use tracing::{debug, trace};

use crate::decompress::{Sector, SectorCodec};
use crate::header::MpqHeader;
use crate::source::ByteSource;
use crate::tables::BlockEntry;
use crate::{Error, Result};

/// Validated sector offset table of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorTable {
    offsets: Vec<u32>,
}

impl SectorTable {
    /// Number of sectors needed for a file of `uncompressed_size` bytes.
    #[inline]
    pub fn sector_count(uncompressed_size: u32, sector_size: usize) -> usize {
        (uncompressed_size as usize).div_ceil(sector_size)
    }

    /// Parse and validate the table at the start of a file's archived bytes.
    ///
    /// Offsets must not decrease, consecutive offsets may differ by at most
    /// `sector_size`, and none may point past `data`.
    pub fn parse(data: &[u8], sector_count: usize, sector_size: usize) -> Result<Self> {
        let entries = sector_count + 1;
        let offsets = BinaryReader::new(data)
            .read_u32_table(entries)
            .map_err(|_| {
                Error::CorruptSectorTable(format!(
                    "{entries} offsets do not fit in {} archived bytes",
                    data.len()
                ))
            })?;

        for (i, pair) in offsets.windows(2).enumerate() {
            let (start, end) = (pair[0], pair[1]);
            if end < start {
                return Err(Error::CorruptSectorTable(format!(
                    "offset {} ({end}) is below offset {i} ({start})",
                    i + 1
                )));
            }
            if (end - start) as usize > sector_size {
                return Err(Error::CorruptSectorTable(format!(
                    "sector {i} spans {} bytes, more than the sector size {sector_size}",
                    end - start
                )));
            }
        }

        if let Some(&last) = offsets.last() {
            if last as usize > data.len() {
                return Err(Error::CorruptSectorTable(format!(
                    "final offset {last} exceeds archived size {}",
                    data.len()
                )));
            }
        }

        Ok(Self { offsets })
    }

    /// Number of sectors described by the table.
    #[inline]
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    /// Check if the table describes no sectors.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The raw offsets.
    #[inline]
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Byte range of sector `index` within the archived data.
    pub fn span(&self, index: usize) -> Option<Range<usize>> {
        let start = *self.offsets.get(index)? as usize;
        let end = *self.offsets.get(index + 1)? as usize;
        Some(start..end)
    }

    /// Byte ranges of every sector, in order.
    pub fn spans(&self) -> impl Iterator<Item = Range<usize>> + '_ {
        self.offsets
            .windows(2)
            .map(|pair| pair[0] as usize..pair[1] as usize)
    }
}

/// Extract the file described by `block`.
///
/// The result is exactly `uncompressed_size` bytes, or an error; partial
/// output is never returned.
pub fn extract(
    source: &dyn ByteSource,
    header: &MpqHeader,
    block: &BlockEntry,
    codec: &dyn SectorCodec,
) -> Result<Vec<u8>> {
    if block.archived_size == 0 {
        return Ok(Vec::new());
    }

    let unsupported = block.flags.unsupported();
    if !unsupported.is_empty() {
        return Err(Error::UnsupportedFlags(unsupported));
    }

    let sector_size = header.sector_size();
    let total = block.uncompressed_size as usize;
    let sector_count = SectorTable::sector_count(block.uncompressed_size, sector_size);

    debug!(
        "Extracting block at {:#x}: {} -> {} bytes in {} sectors",
        block.file_offset, block.archived_size, block.uncompressed_size, sector_count
    );

    let archived = source.read_at(u64::from(block.file_offset), block.archived_size as usize)?;
    let table = SectorTable::parse(&archived, sector_count, sector_size)?;

    // `uncompressed_size` is untrusted until the sectors decode; grow with them.
    let mut output = Vec::new();
    for (index, span) in table.spans().enumerate() {
        let expected_len = sector_size.min(total - index * sector_size);
        let data = &archived[span];

        if data.len() == expected_len {
            trace!("Sector {index}: {expected_len} bytes stored raw");
            output.reserve(expected_len);
            output.extend_from_slice(data);
            continue;
        }

        let sector = Sector {
            index,
            data,
            expected_len,
            flags: block.flags,
        };
        let decoded = codec.decode(&sector)?;
        if decoded.len() != expected_len {
            return Err(sector.error(format!(
                "decoded to {} bytes, expected {expected_len}",
                decoded.len()
            )));
        }

        trace!("Sector {index}: {} -> {expected_len} bytes", data.len());
        output.reserve(expected_len);
        output.extend_from_slice(&decoded);
    }

    Ok(output)
}
