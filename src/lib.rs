//! mmdb-reader - Reader for MaxMind DB (MMDB) files
//!
//! Looks up IPv4 and IPv6 addresses in MMDB databases (GeoIP2, GeoLite2,
//! DB-IP and friends) and decodes the records stored for them into
//! [`DataValue`] trees. A small builder writes MMDB files too, which is
//! handy for fixtures and private network databases.
//!
//! # Quick Start
//!
//! ```rust
//! use mmdb_reader::{Database, DatabaseBuilder, DataValue};
//! use std::collections::HashMap;
//!
//! // Build a database
//! let mut builder = DatabaseBuilder::new().with_database_type("Example-City");
//!
//! let mut data = HashMap::new();
//! data.insert("city".to_string(), DataValue::String("Auckland".to_string()));
//! builder.add_entry("203.0.113.0/24", data)?;
//!
//! let db = Database::from_bytes(builder.build()?)?;
//!
//! // Query it
//! let record = db.lookup("203.0.113.9".parse().unwrap())?;
//! assert_eq!(
//!     record.as_ref().and_then(|r| r.get("city")).and_then(DataValue::as_str),
//!     Some("Auckland")
//! );
//!
//! // Addresses outside every network are not an error
//! assert_eq!(db.lookup("198.51.100.1".parse().unwrap())?, None);
//! # Ok::<(), mmdb_reader::MmdbError>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────┐
//! │  MMDB File Format                    │
//! ├──────────────────────────────────────┤
//! │  1. Search Tree (binary trie)        │
//! │  2. 16 zero bytes                    │
//! │  3. Data Section (typed values)      │
//! │  4. \xAB\xCD\xEFMaxMind.com          │
//! │  5. Metadata (a data section map)    │
//! └──────────────────────────────────────┘
//! ```
//!
//! - [`source`]: random-access byte sources (mmap, memory, file handle)
//! - [`data_section`]: the value decoder (and encoder)
//! - [`mmdb`]: metadata location, geometry and tree walking
//! - [`database`]: the composition root, [`Database`]

#![warn(missing_docs)]
#![warn(clippy::all)]

// Module declarations
/// Data section encoding/decoding
pub mod data_section;
/// Database API
pub mod database;
/// Error types for reader operations
pub mod error;
/// IP tree builder for MMDB format
pub mod ip_tree_builder;
/// MMDB file structure: metadata, layout and search tree
pub mod mmdb;
/// MMDB database builder
pub mod mmdb_builder;
pub mod source;
pub mod validation;

// Re-exports for Rust consumers

/// Database for IP lookups
pub use crate::database::{Database, OpenOptions, SourceKind};

/// Data value type for database records
pub use crate::data_section::DataValue;

pub use crate::error::{MmdbError, Result};
pub use crate::mmdb::{IpVersion, Metadata, RecordSize};
pub use crate::mmdb_builder::DatabaseBuilder;
pub use crate::source::{ByteSource, DatabaseStorage};
pub use crate::validation::VerifyReport;

// Version information
/// Library version string
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
