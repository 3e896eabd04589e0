//! MMDB Format Parsing
//!
//! Locates the metadata block at the end of a file, decodes it, and derives
//! the section layout used by the search tree and the data decoder.
//!
//! File layout:
//!
//! ```text
//! [search tree][16 zero bytes][data section][\xAB\xCD\xEFMaxMind.com][metadata map]
//! ```

use super::types::*;
use crate::data_section::{DataDecoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::source::ByteSource;
use memchr::memmem::FinderRev;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Bytes read per step of the backward marker scan
const SCAN_WINDOW: u64 = 4096;

/// Database metadata
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metadata {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size in bits (24, 28 or 32)
    pub record_size: RecordSize,
    /// IP version of the tree (4 or 6)
    pub ip_version: IpVersion,
    /// Binary format major version (always 2 once parsed)
    pub binary_format_major_version: u16,
    /// Binary format minor version
    pub binary_format_minor_version: u16,
    /// Database type string (e.g. "GeoIP2-City")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_type: Option<String>,
    /// Locale codes the records carry names for
    pub languages: Vec<String>,
    /// Description per language code
    pub description: BTreeMap<String, String>,
    /// Build time, seconds since the Unix epoch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_epoch: Option<u64>,
}

impl Metadata {
    /// Build from the decoded metadata map
    ///
    /// Missing or wrongly typed required fields are corruption; values this
    /// reader cannot handle are unsupported. Malformed optional fields are
    /// logged and ignored.
    pub fn from_value(value: &DataValue) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| {
            MmdbError::corrupt(format!(
                "metadata is a {}, expected map",
                value.type_name()
            ))
        })?;

        let node_count = required_uint(map, "node_count")?;
        let node_count = u32::try_from(node_count).map_err(|_| {
            MmdbError::corrupt(format!("node_count {} does not fit in 32 bits", node_count))
        })?;
        let record_size = RecordSize::from_bits(required_uint(map, "record_size")?)?;
        let ip_version = IpVersion::from_number(required_uint(map, "ip_version")?)?;

        let major = optional_uint(map, "binary_format_major_version")?
            .unwrap_or(SUPPORTED_MAJOR_VERSION as u64);
        if major != SUPPORTED_MAJOR_VERSION as u64 {
            return Err(MmdbError::UnsupportedFormat(format!(
                "binary format major version {} (expected {})",
                major, SUPPORTED_MAJOR_VERSION
            )));
        }
        let minor = optional_uint(map, "binary_format_minor_version")?.unwrap_or(0);
        let minor = u16::try_from(minor).map_err(|_| {
            MmdbError::corrupt(format!("binary format minor version {} out of range", minor))
        })?;

        let database_type = match map.get("database_type") {
            Some(DataValue::String(s)) => Some(s.clone()),
            Some(other) => {
                warn!("ignoring database_type of type {}", other.type_name());
                None
            }
            None => None,
        };

        let languages = match map.get("languages") {
            Some(DataValue::Array(items)) => items
                .iter()
                .filter_map(|item| {
                    let lang = item.as_str().map(str::to_owned);
                    if lang.is_none() {
                        warn!("ignoring non-string language of type {}", item.type_name());
                    }
                    lang
                })
                .collect(),
            Some(other) => {
                warn!("ignoring languages of type {}", other.type_name());
                Vec::new()
            }
            None => Vec::new(),
        };

        let description = match map.get("description") {
            Some(DataValue::Map(entries)) => entries
                .iter()
                .filter_map(|(lang, text)| match text {
                    DataValue::String(s) => Some((lang.clone(), s.clone())),
                    other => {
                        warn!(
                            "ignoring {} description of type {}",
                            lang,
                            other.type_name()
                        );
                        None
                    }
                })
                .collect(),
            Some(other) => {
                warn!("ignoring description of type {}", other.type_name());
                BTreeMap::new()
            }
            None => BTreeMap::new(),
        };

        let build_epoch = match map.get("build_epoch") {
            Some(value) => {
                let epoch = value.as_u64();
                if epoch.is_none() {
                    warn!("ignoring build_epoch of type {}", value.type_name());
                }
                epoch
            }
            None => None,
        };

        Ok(Metadata {
            node_count,
            record_size,
            ip_version,
            binary_format_major_version: SUPPORTED_MAJOR_VERSION,
            binary_format_minor_version: minor,
            database_type,
            languages,
            description,
            build_epoch,
        })
    }

    /// Bytes occupied by the search tree
    pub fn tree_size(&self) -> u64 {
        self.node_count as u64 * self.record_size.node_bytes() as u64
    }
}

fn required_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<u64> {
    optional_uint(map, key)?
        .ok_or_else(|| MmdbError::corrupt(format!("metadata is missing required field {}", key)))
}

fn optional_uint(map: &HashMap<String, DataValue>, key: &str) -> Result<Option<u64>> {
    match map.get(key) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            MmdbError::corrupt(format!(
                "metadata field {} is a {}, expected unsigned integer",
                key,
                value.type_name()
            ))
        }),
    }
}

/// Section layout derived from the metadata and the marker position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MmdbHeader {
    /// Number of nodes in the search tree
    pub node_count: u32,
    /// Record size
    pub record_size: RecordSize,
    /// IP version of the tree
    pub ip_version: IpVersion,
    /// Size of the search tree in bytes
    pub tree_size: u64,
    /// Absolute offset of the data section (after the separator)
    pub data_section_start: u64,
    /// Absolute end of the data section (the marker offset)
    pub data_section_end: u64,
    /// Absolute offset of the metadata map (after the marker)
    pub metadata_start: u64,
}

impl MmdbHeader {
    /// Compute the layout, checking that the tree fits before the marker
    pub fn from_metadata(metadata: &Metadata, marker_offset: u64) -> Result<Self> {
        let tree_size = metadata.tree_size();
        let data_section_start = tree_size + DATA_SECTION_SEPARATOR_SIZE;
        if data_section_start > marker_offset {
            return Err(MmdbError::corrupt(format!(
                "search tree of {} nodes needs {} bytes plus separator, but metadata starts at {}",
                metadata.node_count, tree_size, marker_offset
            )));
        }

        Ok(MmdbHeader {
            node_count: metadata.node_count,
            record_size: metadata.record_size,
            ip_version: metadata.ip_version,
            tree_size,
            data_section_start,
            data_section_end: marker_offset,
            metadata_start: marker_offset + METADATA_MARKER.len() as u64,
        })
    }

    /// Size of the data section in bytes
    pub fn data_section_size(&self) -> u64 {
        self.data_section_end - self.data_section_start
    }
}

/// Everything read from the end of the file at open time
#[derive(Debug, Clone)]
pub struct ParsedMetadata {
    /// Typed metadata
    pub metadata: Metadata,
    /// The metadata map exactly as decoded
    pub raw: DataValue,
    /// Derived section layout
    pub header: MmdbHeader,
}

/// Find the last metadata marker in `source`
///
/// Scans backward from the end in fixed windows, so a well-formed file is
/// resolved within its final [`METADATA_MAX_SIZE`] bytes. Consecutive windows
/// overlap by one byte less than the marker so a marker split across them is
/// still found.
pub fn find_metadata_marker<S: ByteSource + ?Sized>(source: &S) -> Result<u64> {
    let len = source.len();
    let marker_len = METADATA_MARKER.len() as u64;
    if len < marker_len {
        return Err(MmdbError::MetadataNotFound);
    }

    let finder = FinderRev::new(METADATA_MARKER);

    let mut end = len;
    loop {
        let start = end.saturating_sub(SCAN_WINDOW);
        let window = source.read(start, (end - start) as usize)?;
        if let Some(pos) = finder.rfind(&window) {
            let marker_offset = start + pos as u64;
            if len - marker_offset > METADATA_MAX_SIZE {
                warn!(
                    "metadata marker at {} is {} bytes before end of file",
                    marker_offset,
                    len - marker_offset
                );
            }
            return Ok(marker_offset);
        }
        if start == 0 {
            break;
        }
        end = start + marker_len - 1;
    }

    Err(MmdbError::MetadataNotFound)
}

/// Locate, decode and validate the metadata of `source`
pub fn parse_metadata<S: ByteSource + ?Sized>(source: &S) -> Result<ParsedMetadata> {
    let marker_offset = find_metadata_marker(source)?;
    let metadata_start = marker_offset + METADATA_MARKER.len() as u64;

    // Pointers inside metadata are relative to the metadata start
    let raw = DataDecoder::new(source, metadata_start).decode_value(metadata_start)?;
    let metadata = Metadata::from_value(&raw)?;
    let header = MmdbHeader::from_metadata(&metadata, marker_offset)?;

    debug!(
        "metadata at {}: {} nodes, {}-bit records, IPv{}, data section {}..{}",
        metadata_start,
        header.node_count,
        header.record_size.bits(),
        header.ip_version.number(),
        header.data_section_start,
        header.data_section_end
    );

    Ok(ParsedMetadata {
        metadata,
        raw,
        header,
    })
}
