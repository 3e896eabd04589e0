/// Error types for the mmdb-reader library
use std::fmt;

/// Result type alias for reader operations
pub type Result<T> = std::result::Result<T, MmdbError>;

/// Main error type for opening, decoding and querying MMDB files
///
/// "Address not present" is never an error; lookups report it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MmdbError {
    /// A read of `len` bytes at `offset` would run past the end of the source
    Truncated {
        /// Offset of the attempted read
        offset: u64,
        /// Number of bytes requested
        len: u64,
    },

    /// Structurally invalid data: bad control byte, unknown type,
    /// impossible container size, malformed pointer or tree record
    CorruptFormat(String),

    /// The metadata marker was not found
    MetadataNotFound,

    /// Well-formed metadata describing something this reader does not support
    UnsupportedFormat(String),

    /// IPv6 address looked up in an IPv4-only database
    AddressFamilyMismatch,

    /// A textual IP address or network could not be parsed
    InvalidAddress(String),

    /// Invalid input handed to the database builder
    InvalidInput(String),

    /// I/O errors from opening, mapping or reading a file
    Io(String),
}

impl MmdbError {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        MmdbError::CorruptFormat(msg.into())
    }
}

impl fmt::Display for MmdbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MmdbError::Truncated { offset, len } => write!(
                f,
                "Truncated database: read of {} bytes at offset {} runs past end of data",
                len, offset
            ),
            MmdbError::CorruptFormat(msg) => write!(f, "Corrupt MMDB format: {}", msg),
            MmdbError::MetadataNotFound => write!(f, "MMDB metadata marker not found"),
            MmdbError::UnsupportedFormat(msg) => write!(f, "Unsupported MMDB format: {}", msg),
            MmdbError::AddressFamilyMismatch => write!(
                f,
                "Address family mismatch: IPv6 address looked up in an IPv4-only database"
            ),
            MmdbError::InvalidAddress(msg) => write!(f, "Invalid IP address: {}", msg),
            MmdbError::InvalidInput(msg) => write!(f, "Invalid builder input: {}", msg),
            MmdbError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for MmdbError {}

impl From<std::io::Error> for MmdbError {
    fn from(err: std::io::Error) -> Self {
        MmdbError::Io(err.to_string())
    }
}
