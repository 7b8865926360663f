//! MPQ archive reader for Blizzard game asset containers.
//!
//! MPQ ("Mo'PaQ") archives package the assets of Diablo, StarCraft and
//! Warcraft III. This crate reads the original (version 0) format:
//!
//! - Encrypted hash and block tables, loaded lazily and once per archive
//! - Name lookup through the MPQ hash scheme (case-insensitive)
//! - Sector-based extraction with PKWARE implode, zlib and sparse decoding
//! - File, memory-mapped and in-memory backends behind [`ByteSource`]
//! - Parallel extraction with rayon (with `parallel` feature)
//!
//! Per-file encryption, single-unit files and sector checksums are reported
//! as unsupported rather than guessed at.
//!
//! # Example
//!
//! ```no_run
//! use horadric_mpq::MpqArchive;
//!
//! let archive = MpqArchive::open("war3.mpq")?;
//!
//! if let Some(names) = archive.list()? {
//!     for name in names {
//!         println!("{}", String::from_utf8_lossy(&name));
//!     }
//! }
//!
//! let data = archive.extract("war3map.j")?;
//! # Ok::<(), horadric_mpq::Error>(())
//! ```

mod archive;
pub mod crypto;
mod decompress;
mod error;
mod explode;
mod header;
mod listfile;
mod sector;
mod source;
mod tables;

#[cfg(test)]
mod testing;

pub use archive::{MpqArchive, MpqEntry, OpenOptions};
pub use decompress::{CompressionMask, Sector, SectorCodec, StandardCodec};
pub use error::{Error, ErrorKind, Result};
pub use explode::{explode, ExplodeError};
pub use header::MpqHeader;
pub use listfile::{parse_listfile, LISTFILE_NAME};
pub use sector::{extract, SectorTable};
pub use source::{BufferSource, ByteSource, FileSource, MmapSource};
pub use tables::{BlockEntry, BlockFlags, HashEntry, TableIndex};
