//! Database API
//!
//! [`Database`] ties the pieces together: at open time it locates and
//! decodes the metadata, derives the tree geometry and the IPv4 start node;
//! each lookup walks the search tree and decodes the record it lands on.
//!
//! A database is immutable after opening. Lookups take `&self` and may run
//! from many threads at once.

use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::mmdb::{parse_metadata, Ipv4Start, LookupResult, Metadata, MmdbHeader, Networks, SearchTree};
use crate::source::{is_gzip_path, ByteSource, DatabaseStorage};
use crate::validation::{self, VerifyReport};
use std::net::IpAddr;
use std::path::Path;
use tracing::debug;

/// How [`OpenOptions::open`] gets at the file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    /// Memory-map the file
    #[default]
    Mmap,
    /// Read the whole file into memory
    InMemory,
    /// Keep one file handle and read on demand
    FileHandle,
}

/// Options for opening a database file
///
/// Gzip-compressed files (`.gz`) are always decompressed into memory.
///
/// # Example
///
/// ```no_run
/// use mmdb_reader::Database;
///
/// let db = Database::options().in_memory().open("GeoLite2-Country.mmdb")?;
/// # Ok::<(), mmdb_reader::MmdbError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    kind: SourceKind,
}

impl OpenOptions {
    /// Default options (memory-mapped)
    pub fn new() -> Self {
        Self::default()
    }

    /// Memory-map the file
    pub fn mmap(self) -> Self {
        self.source_kind(SourceKind::Mmap)
    }

    /// Read the whole file into memory
    pub fn in_memory(self) -> Self {
        self.source_kind(SourceKind::InMemory)
    }

    /// Read through a single shared file handle
    pub fn file_handle(self) -> Self {
        self.source_kind(SourceKind::FileHandle)
    }

    /// Choose the storage backend
    pub fn source_kind(mut self, kind: SourceKind) -> Self {
        self.kind = kind;
        self
    }

    /// Open `path` with these options
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<Database> {
        let path = path.as_ref();
        let storage = if is_gzip_path(path) {
            if self.kind != SourceKind::InMemory {
                debug!(
                    "{} is gzip-compressed, reading into memory",
                    path.display()
                );
            }
            DatabaseStorage::read_to_memory(path)?
        } else {
            match self.kind {
                SourceKind::Mmap => DatabaseStorage::mmap(path)?,
                SourceKind::InMemory => DatabaseStorage::read_to_memory(path)?,
                SourceKind::FileHandle => DatabaseStorage::file(path)?,
            }
        };

        debug!("opening {} ({})", path.display(), storage.kind());
        Database::from_source(storage)
    }
}

/// An open MMDB database
///
/// # Examples
///
/// ```no_run
/// use mmdb_reader::Database;
///
/// let db = Database::open("GeoLite2-City.mmdb")?;
///
/// if let Some(record) = db.lookup("1.1.1.1".parse().unwrap())? {
///     println!("{:?}", record.get_path(&["country", "iso_code"]));
/// }
/// # Ok::<(), mmdb_reader::MmdbError>(())
/// ```
pub struct Database<S: ByteSource = DatabaseStorage> {
    source: S,
    header: MmdbHeader,
    metadata: Metadata,
    raw_metadata: DataValue,
    /// Where IPv4 lookups start, found once at open
    ipv4_start: Ipv4Start,
}

impl Database {
    /// Open a database file using memory mapping
    ///
    /// Files ending in `.gz` are decompressed into memory instead.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open(path)
    }

    /// Options for choosing how the file is read
    pub fn options() -> OpenOptions {
        OpenOptions::new()
    }

    /// Create database from raw bytes
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::from_source(DatabaseStorage::Owned(data))
    }
}

impl<S: ByteSource> Database<S> {
    /// Open a database over any byte source
    pub fn from_source(source: S) -> Result<Self> {
        let parsed = parse_metadata(&source)?;
        let ipv4_start = SearchTree::new(&source, &parsed.header).find_ipv4_start()?;

        debug!(
            "opened {} database: {} nodes, {}-bit records, IPv{}, IPv4 start record {} at depth {}",
            parsed.metadata.database_type.as_deref().unwrap_or("untyped"),
            parsed.header.node_count,
            parsed.header.record_size.bits(),
            parsed.header.ip_version.number(),
            ipv4_start.record,
            ipv4_start.depth
        );

        Ok(Self {
            source,
            header: parsed.header,
            metadata: parsed.metadata,
            raw_metadata: parsed.raw,
            ipv4_start,
        })
    }

    /// Look up the record for `ip`
    ///
    /// Returns `Ok(None)` when the address has no data. IPv6 addresses on an
    /// IPv4 database fail with [`MmdbError::AddressFamilyMismatch`].
    pub fn lookup(&self, ip: IpAddr) -> Result<Option<DataValue>> {
        Ok(self.lookup_prefix(ip)?.map(|(value, _)| value))
    }

    /// Look up the record for `ip` together with its network prefix length
    pub fn lookup_prefix(&self, ip: IpAddr) -> Result<Option<(DataValue, u8)>> {
        match self.lookup_offset(ip)? {
            Some(found) => Ok(Some((self.decode_at(found.data_offset)?, found.prefix_len))),
            None => Ok(None),
        }
    }

    /// Parse `ip` and look it up
    pub fn lookup_str(&self, ip: &str) -> Result<Option<DataValue>> {
        let addr: IpAddr = ip
            .trim()
            .parse()
            .map_err(|_| MmdbError::InvalidAddress(ip.to_string()))?;
        self.lookup(addr)
    }

    /// Walk the tree only, returning the data offset and prefix length
    pub fn lookup_offset(&self, ip: IpAddr) -> Result<Option<LookupResult>> {
        self.search_tree().lookup(ip, self.ipv4_start)
    }

    /// Decode the record at `data_offset` (relative to the data section)
    pub fn decode_at(&self, data_offset: u64) -> Result<DataValue> {
        if data_offset >= self.header.data_section_size() {
            return Err(MmdbError::corrupt(format!(
                "data offset {} beyond the {} byte data section",
                data_offset,
                self.header.data_section_size()
            )));
        }

        DataDecoder::new(&self.source, self.header.data_section_start)
            .with_end(self.header.data_section_end)
            .decode_value(self.header.data_section_start + data_offset)
    }

    /// Typed metadata
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// The metadata map as decoded, including fields not in [`Metadata`]
    pub fn raw_metadata(&self) -> &DataValue {
        &self.raw_metadata
    }

    /// Section layout
    pub fn header(&self) -> &MmdbHeader {
        &self.header
    }

    /// The underlying byte source
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Where IPv4 lookups begin in the tree
    pub fn ipv4_start(&self) -> Ipv4Start {
        self.ipv4_start
    }

    /// Low-level access to the search tree
    pub fn search_tree(&self) -> SearchTree<'_, S> {
        SearchTree::new(&self.source, &self.header)
    }

    /// Iterate every network with data, in address order
    pub fn networks(&self) -> Networks<'_, S> {
        self.search_tree().networks()
    }

    /// Check the whole file: tree, separator and every record
    pub fn verify(&self) -> VerifyReport {
        validation::verify(self)
    }
}

impl<S: ByteSource> std::fmt::Debug for Database<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("len", &self.source.len())
            .field("header", &self.header)
            .field("database_type", &self.metadata.database_type)
            .finish()
    }
}
