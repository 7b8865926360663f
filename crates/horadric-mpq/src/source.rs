//! Random-access byte sources backing an archive.
//!
//! The engine only needs positional reads, so every backend implements the
//! small [`ByteSource`] trait:
//!
//! - [`FileSource`] - opens the file on first use and issues positional reads
//! - [`BufferSource`] - an archive already resident in memory
//! - [`MmapSource`] - a memory-mapped file with zero-copy reads
//!
//! All three report failures the same way: [`Error::Io`] carrying the
//! requested offset and length.

use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use horadric_common::SingleFlight;
use memmap2::Mmap;
use tracing::debug;

use crate::{Error, Result};

/// Positional, cursor-free reads over archive bytes.
///
/// Implementations must be safe to call from several threads at once; reads
/// at different offsets do not affect each other.
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Read exactly `length` bytes starting at `offset`.
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>>;

    /// Total number of bytes available.
    fn size(&self) -> Result<u64>;
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        (**self).read_at(offset, length)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        (**self).read_at(offset, length)
    }

    fn size(&self) -> Result<u64> {
        (**self).size()
    }
}

/// Borrow `length` bytes at `offset` from a resident slice.
fn slice_at(data: &[u8], offset: u64, length: usize) -> Result<&[u8]> {
    usize::try_from(offset)
        .ok()
        .and_then(|start| Some(start..start.checked_add(length)?))
        .and_then(|range| data.get(range))
        .ok_or_else(|| {
            Error::io(
                offset,
                length,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range exceeds source of {} bytes", data.len()),
                ),
            )
        })
}

/// An archive held in memory.
#[derive(Clone)]
pub struct BufferSource {
    data: Arc<[u8]>,
}

impl BufferSource {
    /// Wrap resident archive bytes.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }

    /// The wrapped bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl ByteSource for BufferSource {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        slice_at(&self.data, offset, length).map(Cow::Borrowed)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }
}

impl fmt::Debug for BufferSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferSource")
            .field("len", &self.data.len())
            .finish()
    }
}

/// An opened archive file and its length at open time.
#[derive(Debug)]
struct OpenFile {
    file: File,
    len: u64,
}

/// An archive file read on demand.
///
/// The file is opened on the first read, at most once, and kept open for the
/// source's lifetime. Reads are positional, so there is no shared cursor.
pub struct FileSource {
    path: PathBuf,
    file: SingleFlight<Arc<OpenFile>, Error>,
}

impl FileSource {
    /// Create a source for `path`. Nothing is opened yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: SingleFlight::new(),
        }
    }

    /// Path of the archive file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check whether the file handle has been opened.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.file.is_ready()
    }

    fn open_file(&self) -> Result<Arc<OpenFile>> {
        self.file.get_or_try_init(|| {
            debug!("Opening archive file {}", self.path.display());
            let file = File::open(&self.path).map_err(|e| Error::io(0, 0, e))?;
            let len = file.metadata().map_err(|e| Error::io(0, 0, e))?.len();
            Ok(Arc::new(OpenFile { file, len }))
        })
    }
}

impl ByteSource for FileSource {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        let open = self.open_file()?;

        let end = offset.checked_add(length as u64);
        if end.map_or(true, |end| end > open.len) {
            return Err(Error::io(
                offset,
                length,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("range exceeds source of {} bytes", open.len),
                ),
            ));
        }

        let mut buffer = vec![0u8; length];
        read_exact_at(&open.file, &mut buffer, offset).map_err(|e| Error::io(offset, length, e))?;
        Ok(Cow::Owned(buffer))
    }

    fn size(&self) -> Result<u64> {
        Ok(self.open_file()?.len)
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;

    file.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;

    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// A memory-mapped archive file.
pub struct MmapSource {
    path: PathBuf,
    mmap: Mmap,
}

impl MmapSource {
    /// Map the archive at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(0, 0, e))?;
        // The archive is treated as immutable while mapped.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::io(0, 0, e))?;

        debug!("Mapped archive {} ({} bytes)", path.display(), mmap.len());
        Ok(Self {
            path: path.to_path_buf(),
            mmap,
        })
    }

    /// Path of the mapped file.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ByteSource for MmapSource {
    fn read_at(&self, offset: u64, length: usize) -> Result<Cow<'_, [u8]>> {
        slice_at(&self.mmap, offset, length).map(Cow::Borrowed)
    }

    fn size(&self) -> Result<u64> {
        Ok(self.mmap.len() as u64)
    }
}

impl fmt::Debug for MmapSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MmapSource")
            .field("path", &self.path)
            .field("len", &self.mmap.len())
            .finish()
    }
}
