//! MPQ archive reader.
//!
//! [`MpqArchive`] ties the pieces together: the header is read and checked
//! when the archive is opened, the hash and block tables are loaded on first
//! use, and files are extracted sector by sector through a [`SectorCodec`].

use std::borrow::Cow;
use std::path::Path;
use std::sync::Arc;

use horadric_common::SingleFlight;
use tracing::debug;

use crate::decompress::{SectorCodec, StandardCodec};
use crate::header::MpqHeader;
use crate::listfile::{parse_listfile, LISTFILE_NAME};
use crate::sector;
use crate::source::{BufferSource, ByteSource, FileSource, MmapSource};
use crate::tables::{BlockFlags, TableIndex};
use crate::{Error, Result};

/// A file located in an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpqEntry {
    /// Name the entry was looked up by, as raw bytes
    pub name: Vec<u8>,
    /// Index into the block table
    pub block_index: u32,
    /// Offset of the stored data from the start of the archive
    pub file_offset: u32,
    /// Size of the stored data
    pub archived_size: u32,
    /// Size of the extracted file
    pub uncompressed_size: u32,
    /// Storage flags
    pub flags: BlockFlags,
    /// Windows LANGID, 0 for neutral
    pub locale: u16,
    /// Target platform
    pub platform: u16,
}

impl MpqEntry {
    /// Check if the entry's sectors are compressed or imploded.
    #[inline]
    pub fn is_compressed(&self) -> bool {
        self.flags.intersects(BlockFlags::COMPRESS | BlockFlags::IMPLODE)
    }

    /// Check if the entry can be extracted by this crate.
    #[inline]
    pub fn is_supported(&self) -> bool {
        self.flags.unsupported().is_empty()
    }

    /// The entry name for display, with invalid UTF-8 replaced.
    pub fn display_name(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.name)
    }
}

/// Options for opening an archive.
///
/// ```no_run
/// use horadric_mpq::OpenOptions;
///
/// let archive = OpenOptions::new()
///     .mmap(true)
///     .load_tables(true)
///     .open("war3.mpq")?;
/// # Ok::<(), horadric_mpq::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    mmap: bool,
    load_tables: bool,
    codec: Arc<dyn SectorCodec>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            mmap: false,
            load_tables: false,
            codec: Arc::new(StandardCodec),
        }
    }
}

impl OpenOptions {
    /// Default options: positional file reads, lazy tables, [`StandardCodec`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory-map the archive file instead of reading it on demand.
    pub fn mmap(mut self, mmap: bool) -> Self {
        self.mmap = mmap;
        self
    }

    /// Load the hash and block tables while opening.
    pub fn load_tables(mut self, load_tables: bool) -> Self {
        self.load_tables = load_tables;
        self
    }

    /// Decode sectors with `codec`.
    pub fn codec(mut self, codec: impl SectorCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Open the archive at `path`.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<MpqArchive> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        let source: Box<dyn ByteSource> = if self.mmap {
            Box::new(MmapSource::open(path)?)
        } else {
            Box::new(FileSource::new(path))
        };

        MpqArchive::with_options(name, source, self)
    }

    /// Open an archive held in memory.
    pub fn from_bytes(&self, data: impl Into<Arc<[u8]>>) -> Result<MpqArchive> {
        MpqArchive::with_options(
            "memory".to_string(),
            Box::new(BufferSource::new(data)),
            self,
        )
    }

    /// Open an archive over any byte source.
    pub fn from_source(&self, source: Box<dyn ByteSource>) -> Result<MpqArchive> {
        MpqArchive::with_options("source".to_string(), source, self)
    }
}

/// A read-only MPQ archive.
///
/// The archive is `Send + Sync`; share it by reference or `Arc` and call
/// [`extract`](Self::extract) from as many threads as needed.
///
/// ```no_run
/// use horadric_mpq::MpqArchive;
///
/// let archive = MpqArchive::open("war3.mpq")?;
///
/// if let Some(script) = archive.extract("scripts\\war3map.j")? {
///     println!("{} bytes", script.len());
/// }
/// # Ok::<(), horadric_mpq::Error>(())
/// ```
pub struct MpqArchive {
    name: String,
    source: Box<dyn ByteSource>,
    header: MpqHeader,
    tables: SingleFlight<Arc<TableIndex>, Error>,
    codec: Arc<dyn SectorCodec>,
}

impl MpqArchive {
    /// Open the archive at `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    /// Open an archive held in memory with default options.
    pub fn from_bytes(data: impl Into<Arc<[u8]>>) -> Result<Self> {
        OpenOptions::new().from_bytes(data)
    }

    /// Open an archive over any byte source with default options.
    pub fn from_source(source: Box<dyn ByteSource>) -> Result<Self> {
        OpenOptions::new().from_source(source)
    }

    fn with_options(
        name: String,
        source: Box<dyn ByteSource>,
        options: &OpenOptions,
    ) -> Result<Self> {
        let size = source.size()?;
        let head_len = size.min(MpqHeader::SIZE as u64) as usize;
        let header = MpqHeader::parse(&source.read_at(0, head_len)?)?;
        header.validate_bounds(size)?;

        let hash_entries = header.hash_table_entries;
        let block_entries = header.block_table_entries;
        debug!(
            "Opened MPQ archive {}: {} bytes, {} hash slots, {} blocks, {} byte sectors",
            name,
            size,
            hash_entries,
            block_entries,
            header.sector_size()
        );

        let archive = Self {
            name,
            source,
            header,
            tables: SingleFlight::new(),
            codec: Arc::clone(&options.codec),
        };

        if options.load_tables {
            archive.tables()?;
        }

        Ok(archive)
    }

    /// Get the archive name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the archive header.
    #[inline]
    pub fn header(&self) -> &MpqHeader {
        &self.header
    }

    /// Size in bytes of one sector.
    #[inline]
    pub fn sector_size(&self) -> usize {
        self.header.sector_size()
    }

    /// Check whether the tables have been loaded.
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.tables.is_ready()
    }

    /// The hash and block tables, loaded on first call.
    ///
    /// Concurrent first calls share a single load. A failed load is reported
    /// to every caller waiting on it and retried by the next call.
    pub fn tables(&self) -> Result<Arc<TableIndex>> {
        self.tables.get_or_try_init(|| self.load_tables())
    }

    fn load_tables(&self) -> Result<Arc<TableIndex>> {
        let index = TableIndex::load(self.source.as_ref(), &self.header)?;
        Ok(Arc::new(index))
    }

    /// Check if `name` resolves to an existing file.
    ///
    /// Names are hashed as raw bytes, so `&str`, `&[u8]` and the names
    /// returned by [`list`](Self::list) are all accepted. Only the tables are
    /// consulted; the file's data is not read.
    pub fn exists(&self, name: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.tables()?.resolve(name)?.is_some())
    }

    /// Look up `name` without reading its data.
    pub fn find(&self, name: impl AsRef<[u8]>) -> Result<Option<MpqEntry>> {
        let name = name.as_ref();
        let tables = self.tables()?;
        let Some(hash) = tables.lookup(name)? else {
            return Ok(None);
        };
        let Some(block) = tables
            .block(hash.block_index)
            .filter(|block| block.exists())
        else {
            return Ok(None);
        };

        Ok(Some(MpqEntry {
            name: name.to_vec(),
            block_index: hash.block_index,
            file_offset: block.file_offset,
            archived_size: block.archived_size,
            uncompressed_size: block.uncompressed_size,
            flags: block.flags,
            locale: hash.locale,
            platform: hash.platform,
        }))
    }

    /// Extract `name`.
    ///
    /// Returns `Ok(None)` if the name does not resolve. The returned bytes
    /// are always the file's full uncompressed size.
    pub fn extract(&self, name: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let tables = self.tables()?;
        let Some(block) = tables.resolve(name)? else {
            return Ok(None);
        };

        let codec = self.codec.as_ref();
        sector::extract(self.source.as_ref(), &self.header, block, codec).map(Some)
    }

    /// Number of blocks flagged as existing files.
    pub fn file_count(&self) -> Result<usize> {
        Ok(self
            .tables()?
            .blocks()
            .iter()
            .filter(|block| block.exists())
            .count())
    }

    /// Names listed in the archive's `(listfile)`, if it has one.
    ///
    /// Names are raw bytes and can be passed straight back to
    /// [`extract`](Self::extract).
    pub fn list(&self) -> Result<Option<Vec<Vec<u8>>>> {
        let listfile = self.extract(LISTFILE_NAME)?;
        Ok(listfile.map(|data| parse_listfile(&data)))
    }

    /// Extract several files in parallel.
    ///
    /// Results are returned in the order of `names`.
    #[cfg(feature = "parallel")]
    pub fn extract_many<S>(&self, names: &[S]) -> Vec<Result<Option<Vec<u8>>>>
    where
        S: AsRef<[u8]> + Sync,
    {
        use rayon::prelude::*;

        names
            .par_iter()
            .map(|name| self.extract(name.as_ref()))
            .collect()
    }
}

impl std::fmt::Debug for MpqArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpqArchive")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("sector_size", &self.sector_size())
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
