//! Random-access byte sources for MMDB files.
//!
//! The reader never assumes the whole file is a slice in memory. Everything
//! goes through [`ByteSource`], which hands out bounds-checked byte ranges.
//! Three storage backends are provided:
//!
//! - owned buffers (`Vec<u8>`, also used for decompressed `.gz` files)
//! - memory-mapped files (zero-copy, shared between processes)
//! - a shared file handle, where seek+read pairs are serialized by a mutex
//!
//! # Example
//!
//! ```no_run
//! use mmdb_reader::source::{ByteSource, DatabaseStorage};
//!
//! let storage = DatabaseStorage::mmap("GeoLite2-City.mmdb")?;
//! let first = storage.read(0, 6)?;
//! println!("first node: {:02x?}", &first[..]);
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```

use crate::error::{MmdbError, Result};
use flate2::read::GzDecoder;
use memmap2::Mmap;
use std::borrow::Cow;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Random-access, read-only byte provider.
///
/// Implementations must be safe to share between threads; lookups on one
/// [`Database`](crate::Database) may run concurrently.
pub trait ByteSource: Send + Sync {
    /// Total length of the source in bytes
    fn len(&self) -> u64;

    /// Read exactly `len` bytes starting at `offset`.
    ///
    /// Fails with [`MmdbError::Truncated`] if the range extends past [`len`](Self::len).
    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>>;

    /// Whether the source holds no bytes
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounds check shared by the slice-backed sources
#[inline]
fn slice_range(data: &[u8], offset: u64, len: usize) -> Result<&[u8]> {
    let end = offset
        .checked_add(len as u64)
        .filter(|&end| end <= data.len() as u64)
        .ok_or(MmdbError::Truncated {
            offset,
            len: len as u64,
        })?;
    Ok(&data[offset as usize..end as usize])
}

impl ByteSource for [u8] {
    fn len(&self) -> u64 {
        <[u8]>::len(self) as u64
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        slice_range(self, offset, len).map(Cow::Borrowed)
    }
}

impl ByteSource for Vec<u8> {
    fn len(&self) -> u64 {
        self.as_slice().len() as u64
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        slice_range(self, offset, len).map(Cow::Borrowed)
    }
}

impl ByteSource for Mmap {
    fn len(&self) -> u64 {
        self[..].len() as u64
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        slice_range(&self[..], offset, len).map(Cow::Borrowed)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &S {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        (**self).read(offset, len)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Arc<S> {
    fn len(&self) -> u64 {
        (**self).len()
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        (**self).read(offset, len)
    }
}

/// A single file handle shared by all readers.
///
/// Every read is a seek followed by `read_exact`; the pair runs under a mutex
/// so concurrent lookups cannot interleave their cursor movements.
pub struct FileSource {
    file: Mutex<File>,
    len: u64,
}

impl FileSource {
    /// Open `path` for positional reads
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MmdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        Self::from_file(file)
    }

    /// Wrap an already-open file
    pub fn from_file(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(MmdbError::Truncated {
                offset,
                len: len as u64,
            });
        }

        let mut buf = vec![0u8; len];
        let mut file = self
            .file
            .lock()
            .map_err(|_| MmdbError::Io("file handle lock poisoned".to_string()))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buf)?;
        Ok(Cow::Owned(buf))
    }
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource").field("len", &self.len).finish()
    }
}

/// Storage for database data - owned, memory-mapped, or a shared file handle
pub enum DatabaseStorage {
    /// Bytes held in memory
    Owned(Vec<u8>),
    /// Memory-mapped file
    Mmap(Mmap),
    /// Positional reads through one locked file handle
    File(FileSource),
}

impl DatabaseStorage {
    /// Memory-map `path`
    pub fn mmap<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MmdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        // SAFETY: the mapping is read-only. Replacing the file on disk while it
        // is mapped is the caller's responsibility, as with every mmap reader.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| MmdbError::Io(format!("Failed to mmap {}: {}", path.display(), e)))?;
        Ok(DatabaseStorage::Mmap(mmap))
    }

    /// Read the whole of `path` into memory, decompressing `.gz` files
    pub fn read_to_memory<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| MmdbError::Io(format!("Failed to open {}: {}", path.display(), e)))?;

        let mut data = Vec::new();
        if is_gzip_path(path) {
            GzDecoder::new(file).read_to_end(&mut data).map_err(|e| {
                MmdbError::Io(format!("Failed to decompress {}: {}", path.display(), e))
            })?;
        } else {
            let mut file = file;
            file.read_to_end(&mut data)?;
        }
        Ok(DatabaseStorage::Owned(data))
    }

    /// Open a shared file handle for positional reads
    pub fn file<P: AsRef<Path>>(path: P) -> Result<Self> {
        FileSource::open(path).map(DatabaseStorage::File)
    }

    /// Short name of the backend, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            DatabaseStorage::Owned(_) => "memory",
            DatabaseStorage::Mmap(_) => "mmap",
            DatabaseStorage::File(_) => "file",
        }
    }
}

impl ByteSource for DatabaseStorage {
    fn len(&self) -> u64 {
        match self {
            DatabaseStorage::Owned(v) => ByteSource::len(v),
            DatabaseStorage::Mmap(m) => ByteSource::len(m),
            DatabaseStorage::File(f) => f.len(),
        }
    }

    fn read(&self, offset: u64, len: usize) -> Result<Cow<'_, [u8]>> {
        match self {
            DatabaseStorage::Owned(v) => v.read(offset, len),
            DatabaseStorage::Mmap(m) => m.read(offset, len),
            DatabaseStorage::File(f) => f.read(offset, len),
        }
    }
}

impl fmt::Debug for DatabaseStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseStorage")
            .field("kind", &self.kind())
            .field("len", &ByteSource::len(self))
            .finish()
    }
}

/// Files ending in `.gz` (case-insensitive) are treated as gzip-compressed
pub(crate) fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}
