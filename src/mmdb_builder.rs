//! MMDB Database Builder
//!
//! Writes complete MMDB files: search tree, separator, data section,
//! metadata marker and metadata map. Used to produce fixtures and small
//! custom databases; anything it writes is readable by [`crate::Database`].

use crate::data_section::{DataEncoder, DataValue};
use crate::error::{MmdbError, Result};
use crate::ip_tree_builder::IpTreeBuilder;
use crate::mmdb::types::{
    IpVersion, RecordSize, DATA_SECTION_SEPARATOR_SIZE, METADATA_MARKER, SUPPORTED_MAJOR_VERSION,
};
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// One network and the record stored for it
#[derive(Debug, Clone)]
struct NetworkEntry {
    addr: IpAddr,
    prefix_len: u8,
    data: DataValue,
}

/// MMDB database builder
///
/// # Example
/// ```
/// use mmdb_reader::{DatabaseBuilder, DataValue};
/// use std::collections::HashMap;
///
/// let mut builder = DatabaseBuilder::new()
///     .with_database_type("MyCompany-Networks")
///     .with_description("en", "Office networks");
///
/// let mut data = HashMap::new();
/// data.insert("site".to_string(), DataValue::String("HQ".to_string()));
/// builder.add_entry("10.0.0.0/8", data)?;
///
/// let bytes = builder.build()?;
/// assert!(!bytes.is_empty());
/// # Ok::<(), mmdb_reader::MmdbError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct DatabaseBuilder {
    entries: Vec<NetworkEntry>,
    /// Forced IP version; otherwise IPv6 if any IPv6 network was added
    ip_version: Option<IpVersion>,
    /// Forced record size; otherwise the smallest that fits
    record_size: Option<RecordSize>,
    database_type: Option<String>,
    description: BTreeMap<String, String>,
    languages: Vec<String>,
    build_epoch: Option<u64>,
}

impl DatabaseBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the database type name
    ///
    /// If not set, defaults to "mmdb-reader-IPv4" or "mmdb-reader-IPv6".
    pub fn with_database_type(mut self, db_type: impl Into<String>) -> Self {
        self.database_type = Some(db_type.into());
        self
    }

    /// Add a description in a specific language
    ///
    /// Can be called multiple times for different languages.
    pub fn with_description(mut self, language: impl Into<String>, text: impl Into<String>) -> Self {
        self.description.insert(language.into(), text.into());
        self
    }

    /// Set the locale codes listed in metadata
    pub fn with_languages<I, L>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = L>,
        L: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    /// Force the tree's IP version
    pub fn with_ip_version(mut self, ip_version: IpVersion) -> Self {
        self.ip_version = Some(ip_version);
        self
    }

    /// Force the record size instead of picking the smallest that fits
    pub fn with_record_size(mut self, record_size: RecordSize) -> Self {
        self.record_size = Some(record_size);
        self
    }

    /// Fix the build timestamp (defaults to the current time)
    pub fn with_build_epoch(mut self, epoch: u64) -> Self {
        self.build_epoch = Some(epoch);
        self
    }

    /// Number of networks added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no networks have been added
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add a network with an arbitrary record
    ///
    /// Later networks with the same prefix replace earlier ones; more
    /// specific networks win over less specific ones.
    pub fn add_network(&mut self, addr: IpAddr, prefix_len: u8, data: DataValue) -> Result<()> {
        let max = if addr.is_ipv4() { 32 } else { 128 };
        if prefix_len > max {
            return Err(MmdbError::InvalidInput(format!(
                "prefix length {} exceeds {} for {}",
                prefix_len, max, addr
            )));
        }
        self.entries.push(NetworkEntry {
            addr,
            prefix_len,
            data,
        });
        Ok(())
    }

    /// Add a network given as `addr` or `addr/prefix`
    pub fn add_cidr(&mut self, key: &str, data: DataValue) -> Result<()> {
        let (addr, prefix_len) = parse_cidr(key)?;
        self.add_network(addr, prefix_len, data)
    }

    /// Add a network whose record is a map
    pub fn add_entry(&mut self, key: &str, data: HashMap<String, DataValue>) -> Result<()> {
        self.add_cidr(key, DataValue::Map(data))
    }

    /// Build the database file
    pub fn build(&self) -> Result<Vec<u8>> {
        let has_v6 = self.entries.iter().any(|e| e.addr.is_ipv6());
        let ip_version = match self.ip_version {
            Some(IpVersion::V4) if has_v6 => {
                return Err(MmdbError::InvalidInput(
                    "IPv6 networks cannot be stored in an IPv4 database".to_string(),
                ))
            }
            Some(version) => version,
            None if has_v6 => IpVersion::V6,
            None => IpVersion::V4,
        };

        // Data section, deduplicated
        let mut data_encoder = DataEncoder::new();
        let mut tree_builder = IpTreeBuilder::new(ip_version, RecordSize::Bits32);
        for entry in &self.entries {
            let offset = data_encoder.encode(&entry.data)?;
            tree_builder.insert(entry.addr, entry.prefix_len, offset)?;
        }
        let data_section = data_encoder.into_bytes();

        let record_size = match self.record_size {
            Some(size) => size,
            None => smallest_record_size(tree_builder.node_count(), data_section.len() as u64)?,
        };
        tree_builder.set_record_size(record_size);
        let (tree_bytes, node_count) = tree_builder.build(data_section.len() as u64)?;

        let metadata_bytes = self.metadata_bytes(ip_version, record_size, node_count)?;

        let mut database = Vec::with_capacity(
            tree_bytes.len()
                + DATA_SECTION_SEPARATOR_SIZE as usize
                + data_section.len()
                + METADATA_MARKER.len()
                + metadata_bytes.len(),
        );
        database.extend_from_slice(&tree_bytes);
        database.resize(database.len() + DATA_SECTION_SEPARATOR_SIZE as usize, 0);
        database.extend_from_slice(&data_section);
        database.extend_from_slice(METADATA_MARKER);
        database.extend_from_slice(&metadata_bytes);

        debug!(
            "built IPv{} database: {} networks, {} nodes, {}-bit records, {} data bytes",
            ip_version.number(),
            self.entries.len(),
            node_count,
            record_size.bits(),
            data_section.len()
        );

        Ok(database)
    }

    fn metadata_bytes(
        &self,
        ip_version: IpVersion,
        record_size: RecordSize,
        node_count: u32,
    ) -> Result<Vec<u8>> {
        let build_epoch = self.build_epoch.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0)
        });
        let database_type = self
            .database_type
            .clone()
            .unwrap_or_else(|| format!("mmdb-reader-IPv{}", ip_version.number()));

        let mut metadata = HashMap::new();
        metadata.insert(
            "binary_format_major_version".to_string(),
            DataValue::Uint16(SUPPORTED_MAJOR_VERSION),
        );
        metadata.insert(
            "binary_format_minor_version".to_string(),
            DataValue::Uint16(0),
        );
        metadata.insert("build_epoch".to_string(), DataValue::Uint64(build_epoch));
        metadata.insert(
            "database_type".to_string(),
            DataValue::String(database_type),
        );
        metadata.insert(
            "description".to_string(),
            DataValue::Map(
                self.description
                    .iter()
                    .map(|(k, v)| (k.clone(), DataValue::String(v.clone())))
                    .collect(),
            ),
        );
        metadata.insert(
            "languages".to_string(),
            DataValue::Array(
                self.languages
                    .iter()
                    .map(|l| DataValue::String(l.clone()))
                    .collect(),
            ),
        );
        metadata.insert(
            "ip_version".to_string(),
            DataValue::Uint16(ip_version.number()),
        );
        metadata.insert("node_count".to_string(), DataValue::Uint32(node_count));
        metadata.insert(
            "record_size".to_string(),
            DataValue::Uint16(record_size.bits()),
        );

        // Pointers in metadata are relative to its own start, like a fresh encoder
        let mut meta_encoder = DataEncoder::new();
        meta_encoder.encode(&DataValue::Map(metadata))?;
        Ok(meta_encoder.into_bytes())
    }
}

/// Smallest record size able to address `node_count` nodes and the data
fn smallest_record_size(node_count: u32, data_section_size: u64) -> Result<RecordSize> {
    let largest = IpTreeBuilder::largest_record(node_count, data_section_size);
    [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32]
        .into_iter()
        .find(|size| largest <= size.max_record() as u64)
        .ok_or_else(|| {
            MmdbError::InvalidInput(format!(
                "database with {} nodes and {} data bytes exceeds 32-bit records",
                node_count, data_section_size
            ))
        })
}

/// Parse `addr` or `addr/prefix`; a bare address is a host network
pub fn parse_cidr(key: &str) -> Result<(IpAddr, u8)> {
    let key = key.trim();
    let (addr_str, prefix_str) = match key.split_once('/') {
        Some((addr, prefix)) => (addr, Some(prefix)),
        None => (key, None),
    };

    let addr: IpAddr = addr_str
        .parse()
        .map_err(|_| MmdbError::InvalidAddress(key.to_string()))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };

    let prefix_len = match prefix_str {
        None => max,
        Some(p) => p
            .parse::<u8>()
            .ok()
            .filter(|&len| len <= max)
            .ok_or_else(|| {
                MmdbError::InvalidAddress(format!("{} (prefix must be 0-{})", key, max))
            })?,
    };
    Ok((addr, prefix_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmdb::format::parse_metadata;

    #[test]
    fn test_parse_cidr() {
        assert_eq!(
            parse_cidr("8.8.8.8").unwrap(),
            ("8.8.8.8".parse().unwrap(), 32)
        );
        assert_eq!(
            parse_cidr("192.168.0.0/16").unwrap(),
            ("192.168.0.0".parse().unwrap(), 16)
        );
        assert_eq!(
            parse_cidr("2001:db8::/32").unwrap(),
            ("2001:db8::".parse().unwrap(), 32)
        );
        assert!(matches!(
            parse_cidr("10.0.0.0/33"),
            Err(MmdbError::InvalidAddress(_))
        ));
        assert!(matches!(
            parse_cidr("*.evil.com"),
            Err(MmdbError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_build_writes_readable_metadata() {
        let mut builder = DatabaseBuilder::new()
            .with_database_type("Test-Networks")
            .with_description("en", "test networks")
            .with_languages(["en", "de"])
            .with_build_epoch(1_600_000_000);
        builder
            .add_cidr("10.0.0.0/8", DataValue::String("ten".into()))
            .unwrap();

        let bytes = builder.build().unwrap();
        let parsed = parse_metadata(bytes.as_slice()).unwrap();
        let meta = parsed.metadata;

        assert_eq!(meta.ip_version, IpVersion::V4);
        assert_eq!(meta.record_size, RecordSize::Bits24);
        assert_eq!(meta.database_type.as_deref(), Some("Test-Networks"));
        assert_eq!(meta.languages, vec!["en".to_string(), "de".to_string()]);
        assert_eq!(meta.build_epoch, Some(1_600_000_000));
        assert_eq!(meta.node_count, 8);
    }

    #[test]
    fn test_ip_version_inferred_from_networks() {
        let mut builder = DatabaseBuilder::new();
        builder
            .add_cidr("2001:db8::/32", DataValue::Bool(true))
            .unwrap();
        let parsed = parse_metadata(builder.build().unwrap().as_slice()).unwrap();
        assert_eq!(parsed.metadata.ip_version, IpVersion::V6);
    }

    #[test]
    fn test_forced_ipv4_rejects_ipv6_networks() {
        let mut builder = DatabaseBuilder::new().with_ip_version(IpVersion::V4);
        builder.add_cidr("::1", DataValue::Bool(true)).unwrap();
        assert!(matches!(builder.build(), Err(MmdbError::InvalidInput(_))));
    }

    #[test]
    fn test_smallest_record_size() {
        assert_eq!(smallest_record_size(10, 100).unwrap(), RecordSize::Bits24);
        assert_eq!(
            smallest_record_size(1 << 24, 0).unwrap(),
            RecordSize::Bits28
        );
        assert_eq!(
            smallest_record_size(1 << 28, 0).unwrap(),
            RecordSize::Bits32
        );
        assert!(smallest_record_size(u32::MAX, 1).is_err());
    }

    #[test]
    fn test_empty_database_builds() {
        let bytes = DatabaseBuilder::new().build().unwrap();
        let parsed = parse_metadata(bytes.as_slice()).unwrap();
        assert_eq!(parsed.metadata.node_count, 1);
        assert_eq!(parsed.header.data_section_size(), 0);
    }
}
