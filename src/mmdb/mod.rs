//! MaxMind DB (MMDB) file structure
//!
//! The MMDB format uses a binary search tree for IP address lookups.
//! Records are stored in the data section format implemented by
//! [`crate::data_section`].
//!
//! ## Architecture
//!
//! - **types**: Format constants, record sizes and data type ids
//! - **format**: Metadata location and parsing, section layout
//! - **tree**: Search tree traversal for IP lookups

pub mod format;
pub mod tree;
pub mod types;

// Re-export key types
pub use format::{find_metadata_marker, parse_metadata, Metadata, MmdbHeader, ParsedMetadata};
pub use tree::{Ipv4Start, LookupResult, Network, Networks, SearchTree};
pub use types::{DataType, IpVersion, RecordSize, METADATA_MARKER};
