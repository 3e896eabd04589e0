//! MMDB-specific Type Definitions
//!
//! Format constants and the small enums derived from metadata. Data values
//! themselves live in [`crate::data_section`].

use crate::error::{MmdbError, Result};
use serde::{Serialize, Serializer};

/// MMDB metadata marker: "\xAB\xCD\xEFMaxMind.com"
pub const METADATA_MARKER: &[u8] = b"\xAB\xCD\xEFMaxMind.com";

/// Writers keep the metadata marker within this many bytes of the end of the file
pub const METADATA_MAX_SIZE: u64 = 128 * 1024;

/// Size of the all-zero separator between the search tree and the data section
pub const DATA_SECTION_SEPARATOR_SIZE: u64 = 16;

/// The only major format version this reader understands
pub const SUPPORTED_MAJOR_VERSION: u16 = 2;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    /// IPv4 only
    V4,
    /// IPv6 (IPv4 addresses live under ::/96)
    V6,
}

impl IpVersion {
    /// Parse the metadata `ip_version` field
    pub fn from_number(n: u64) -> Result<Self> {
        match n {
            4 => Ok(IpVersion::V4),
            6 => Ok(IpVersion::V6),
            _ => Err(MmdbError::UnsupportedFormat(format!(
                "Invalid IP version: {}",
                n
            ))),
        }
    }

    /// Number of address bits walked for a native lookup
    pub fn bit_count(self) -> u8 {
        match self {
            IpVersion::V4 => 32,
            IpVersion::V6 => 128,
        }
    }

    /// Numeric form as stored in metadata
    pub fn number(self) -> u16 {
        match self {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

// Both serialize as the number stored in metadata
impl Serialize for IpVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.number())
    }
}

/// Record size in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSize {
    /// 24-bit records (3 bytes per record, 6 bytes per node)
    Bits24 = 24,
    /// 28-bit records (3.5 bytes per record, 7 bytes per node)
    Bits28 = 28,
    /// 32-bit records (4 bytes per record, 8 bytes per node)
    Bits32 = 32,
}

impl RecordSize {
    /// Get the size of a node (2 records) in bytes
    pub fn node_bytes(self) -> usize {
        match self {
            RecordSize::Bits24 => 6,
            RecordSize::Bits28 => 7,
            RecordSize::Bits32 => 8,
        }
    }

    /// Record width in bits
    pub fn bits(self) -> u16 {
        self as u16
    }

    /// Largest value a single record can hold
    pub fn max_record(self) -> u32 {
        match self {
            RecordSize::Bits24 => (1 << 24) - 1,
            RecordSize::Bits28 => (1 << 28) - 1,
            RecordSize::Bits32 => u32::MAX,
        }
    }

    /// Create from bit size
    pub fn from_bits(bits: u64) -> Result<Self> {
        match bits {
            24 => Ok(RecordSize::Bits24),
            28 => Ok(RecordSize::Bits28),
            32 => Ok(RecordSize::Bits32),
            _ => Err(MmdbError::UnsupportedFormat(format!(
                "Invalid record size: {} bits",
                bits
            ))),
        }
    }

    /// Split one node into its (left, right) records
    ///
    /// `node` must be exactly [`node_bytes`](Self::node_bytes) long.
    pub fn split_node(self, node: &[u8]) -> (u32, u32) {
        let be24 = |b: &[u8]| ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32);
        match self {
            RecordSize::Bits24 => (be24(&node[0..3]), be24(&node[3..6])),
            RecordSize::Bits28 => {
                // Middle byte: left high nibble, then right high nibble
                let left = (((node[3] >> 4) as u32) << 24) | be24(&node[0..3]);
                let right = (((node[3] & 0x0F) as u32) << 24) | be24(&node[4..7]);
                (left, right)
            }
            RecordSize::Bits32 => (
                u32::from_be_bytes([node[0], node[1], node[2], node[3]]),
                u32::from_be_bytes([node[4], node[5], node[6], node[7]]),
            ),
        }
    }
}

impl Serialize for RecordSize {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.bits())
    }
}

/// Data type ids of the MMDB data section
///
/// Ids 1-7 fit in the control byte; 8 and up are "extended" and are
/// written as a zero type selector followed by `id - 7` in the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Back-reference to another value
    Pointer = 1,
    /// UTF-8 string
    String = 2,
    /// 64-bit float
    Double = 3,
    /// Raw bytes
    Bytes = 4,
    /// Unsigned 16-bit integer
    Uint16 = 5,
    /// Unsigned 32-bit integer
    Uint32 = 6,
    /// String-keyed map
    Map = 7,
    /// Signed 32-bit integer
    Int32 = 8,
    /// Unsigned 64-bit integer
    Uint64 = 9,
    /// Unsigned 128-bit integer
    Uint128 = 10,
    /// Ordered array
    Array = 11,
    /// Data cache container (writer-side only)
    DataCache = 12,
    /// End marker (writer-side only)
    EndMarker = 13,
    /// Boolean
    Bool = 14,
    /// 32-bit float
    Float = 15,
}

impl DataType {
    /// Map a resolved type id to a data type
    pub fn from_id(id: u16) -> Option<Self> {
        Some(match id {
            1 => DataType::Pointer,
            2 => DataType::String,
            3 => DataType::Double,
            4 => DataType::Bytes,
            5 => DataType::Uint16,
            6 => DataType::Uint32,
            7 => DataType::Map,
            8 => DataType::Int32,
            9 => DataType::Uint64,
            10 => DataType::Uint128,
            11 => DataType::Array,
            12 => DataType::DataCache,
            13 => DataType::EndMarker,
            14 => DataType::Bool,
            15 => DataType::Float,
            _ => return None,
        })
    }

    /// Numeric type id
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Whether the type needs the extended control byte form
    pub fn is_extended(self) -> bool {
        self.id() > 7
    }
}
