//! Sector decompression.
//!
//! A sector whose stored span is shorter than its expected length is handed
//! to a [`SectorCodec`]. The [`StandardCodec`] handles the methods found in
//! version 0 archives: PKWARE implode (either as a block flag or as a
//! mask bit), zlib and sparse.

use std::borrow::Cow;
use std::fmt;
use std::io::Read;

use bitflags::bitflags;
use flate2::read::ZlibDecoder;
use horadric_common::BinaryReader;
use tracing::trace;

use crate::explode::explode;
use crate::tables::BlockFlags;
use crate::{Error, Result};

bitflags! {
    /// Compression mask stored in the first byte of a `COMPRESS` sector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CompressionMask: u8 {
        /// Huffman coding (WAVE files)
        const HUFFMAN = 0x01;
        /// zlib deflate
        const ZLIB = 0x02;
        /// PKWARE Data Compression Library
        const PKWARE = 0x08;
        /// bzip2
        const BZIP2 = 0x10;
        /// Runs of zero bytes
        const SPARSE = 0x20;
        /// IMA ADPCM, mono
        const ADPCM_MONO = 0x40;
        /// IMA ADPCM, stereo
        const ADPCM_STEREO = 0x80;

        const _ = !0;
    }
}

impl CompressionMask {
    /// LZMA is a whole mask value rather than a bit.
    pub const LZMA: u8 = 0x12;

    /// Methods the [`StandardCodec`] can decode.
    pub const SUPPORTED: Self = Self::ZLIB.union(Self::PKWARE).union(Self::SPARSE);
}

/// One compressed sector awaiting decode.
#[derive(Debug, Clone, Copy)]
pub struct Sector<'a> {
    /// Position of the sector within its file
    pub index: usize,
    /// Stored sector bytes
    pub data: &'a [u8],
    /// Length the decoded sector must have
    pub expected_len: usize,
    /// Flags of the block the sector belongs to
    pub flags: BlockFlags,
}

impl Sector<'_> {
    /// Build a decode error for this sector.
    pub fn error(&self, reason: impl fmt::Display) -> Error {
        Error::SectorDecode {
            index: self.index,
            reason: reason.to_string(),
        }
    }
}

/// Decodes stored sectors into their original bytes.
///
/// The pipeline only calls a codec for sectors that are not stored raw, and
/// checks the returned length itself.
pub trait SectorCodec: Send + Sync + fmt::Debug {
    /// Decode one sector.
    fn decode(&self, sector: &Sector<'_>) -> Result<Vec<u8>>;
}

/// The default codec: PKWARE, zlib and sparse.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardCodec;

impl SectorCodec for StandardCodec {
    fn decode(&self, sector: &Sector<'_>) -> Result<Vec<u8>> {
        if sector.flags.contains(BlockFlags::IMPLODE) {
            return decompress_pkware(sector, sector.data);
        }

        if !sector.flags.contains(BlockFlags::COMPRESS) {
            return Err(sector.error(format!(
                "{} stored bytes for {} expected in an uncompressed block",
                sector.data.len(),
                sector.expected_len
            )));
        }

        let (&mask, payload) = sector
            .data
            .split_first()
            .ok_or_else(|| sector.error("empty compressed sector"))?;

        if mask == CompressionMask::LZMA {
            return Err(Error::UnsupportedCompression(mask));
        }
        let methods = CompressionMask::from_bits_retain(mask);
        if !methods.difference(CompressionMask::SUPPORTED).is_empty() {
            return Err(Error::UnsupportedCompression(mask));
        }

        trace!(
            "Decoding sector {} with mask {:?} ({} bytes)",
            sector.index,
            methods,
            payload.len()
        );

        let mut data = Cow::Borrowed(payload);
        if methods.contains(CompressionMask::PKWARE) {
            data = Cow::Owned(decompress_pkware(sector, &data)?);
        }
        if methods.contains(CompressionMask::ZLIB) {
            data = Cow::Owned(decompress_zlib(sector, &data)?);
        }
        if methods.contains(CompressionMask::SPARSE) {
            data = Cow::Owned(decompress_sparse(sector, &data)?);
        }

        Ok(data.into_owned())
    }
}

fn decompress_pkware(sector: &Sector<'_>, data: &[u8]) -> Result<Vec<u8>> {
    trace!("PKWARE explode of {} bytes", data.len());
    explode(data, sector.expected_len).map_err(|e| sector.error(e))
}

fn decompress_zlib(sector: &Sector<'_>, data: &[u8]) -> Result<Vec<u8>> {
    trace!("zlib inflate of {} bytes", data.len());

    // One byte past the limit is enough to notice oversized output.
    let mut decoder = ZlibDecoder::new(data).take(sector.expected_len as u64 + 1);
    let mut output = Vec::with_capacity(sector.expected_len);
    decoder
        .read_to_end(&mut output)
        .map_err(|e| sector.error(format!("zlib: {e}")))?;

    Ok(output)
}

/// Expand a sparse stream.
///
/// The stream is a big-endian u32 output size followed by runs. A control
/// byte with the high bit set introduces `(b & 0x7F) + 1` literal bytes;
/// otherwise it stands for `(b & 0x7F) + 3` zero bytes. Output not covered
/// by any run is zero.
fn decompress_sparse(sector: &Sector<'_>, data: &[u8]) -> Result<Vec<u8>> {
    trace!("Sparse expansion of {} bytes", data.len());

    let mut reader = BinaryReader::new(data);
    let size = reader
        .read_u32_be()
        .map_err(|e| sector.error(format!("sparse: {e}")))? as usize;
    if size > sector.expected_len {
        return Err(sector.error(format!(
            "sparse: declared size {size} exceeds {}",
            sector.expected_len
        )));
    }

    let mut output = Vec::with_capacity(size);
    while !reader.is_empty() && output.len() < size {
        let control = reader
            .read_u8()
            .map_err(|e| sector.error(format!("sparse: {e}")))?;
        let run = usize::from(control & 0x7F);

        if control & 0x80 != 0 {
            let literal = reader
                .read_bytes(run + 1)
                .map_err(|e| sector.error(format!("sparse: {e}")))?;
            output.extend_from_slice(literal);
        } else {
            output.resize(output.len() + run + 3, 0);
        }
    }

    output.resize(size, 0);
    Ok(output)
}
