//! Integration tests for building and querying MMDB databases
//!
//! These tests build databases with the writer, then open them through the
//! public API and check lookups, metadata, iteration and verification.

use mmdb_reader::mmdb::Network;
use mmdb_reader::source::{ByteSource, FileSource};
use mmdb_reader::{
    DataValue, Database, DatabaseBuilder, IpVersion, MmdbError, RecordSize, SourceKind,
};
use std::collections::HashMap;
use std::io::Write;
use std::net::IpAddr;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

fn city(name: &str, iso: &str) -> DataValue {
    let mut country = HashMap::new();
    country.insert("iso_code".to_string(), DataValue::String(iso.to_string()));
    country.insert(
        "geoname_id".to_string(),
        DataValue::Uint32(2_186_224),
    );

    let mut record = HashMap::new();
    record.insert("city".to_string(), DataValue::String(name.to_string()));
    record.insert("country".to_string(), DataValue::Map(country));
    record.insert(
        "location".to_string(),
        DataValue::Array(vec![DataValue::Double(-41.2865), DataValue::Double(174.7762)]),
    );
    DataValue::Map(record)
}

fn build_mixed(record_size: Option<RecordSize>) -> Vec<u8> {
    let mut builder = DatabaseBuilder::new()
        .with_database_type("Test-City")
        .with_languages(["en"])
        .with_description("en", "integration test database")
        .with_build_epoch(1_700_000_000);
    if let Some(size) = record_size {
        builder = builder.with_record_size(size);
    }

    builder
        .add_cidr("203.0.113.0/24", city("Wellington", "NZ"))
        .unwrap();
    builder
        .add_cidr("203.0.113.128/25", city("Auckland", "NZ"))
        .unwrap();
    builder
        .add_cidr("198.51.100.7", city("Christchurch", "NZ"))
        .unwrap();
    builder
        .add_cidr("2001:db8::/32", city("Dunedin", "NZ"))
        .unwrap();
    builder.build().unwrap()
}

fn city_name(record: &DataValue) -> &str {
    record.get("city").and_then(DataValue::as_str).unwrap()
}

#[test]
fn test_lookups_for_every_record_size() {
    for size in [RecordSize::Bits24, RecordSize::Bits28, RecordSize::Bits32] {
        let db = Database::from_bytes(build_mixed(Some(size))).unwrap();
        assert_eq!(db.metadata().record_size, size);
        assert_eq!(db.metadata().ip_version, IpVersion::V6);

        let (record, prefix) = db.lookup_prefix(ip("203.0.113.5")).unwrap().unwrap();
        assert_eq!(city_name(&record), "Wellington", "{:?}", size);
        assert_eq!(prefix, 25);

        let (record, prefix) = db.lookup_prefix(ip("203.0.113.200")).unwrap().unwrap();
        assert_eq!(city_name(&record), "Auckland");
        assert_eq!(prefix, 25);

        let (record, prefix) = db.lookup_prefix(ip("198.51.100.7")).unwrap().unwrap();
        assert_eq!(city_name(&record), "Christchurch");
        assert_eq!(prefix, 32);

        let (record, prefix) = db.lookup_prefix(ip("2001:db8:1::1")).unwrap().unwrap();
        assert_eq!(city_name(&record), "Dunedin");
        assert_eq!(prefix, 32);

        assert_eq!(db.lookup(ip("198.51.100.8")).unwrap(), None);
        assert_eq!(db.lookup(ip("2001:db9::1")).unwrap(), None);
    }
}

#[test]
fn test_nested_record_contents() {
    let db = Database::from_bytes(build_mixed(None)).unwrap();
    let record = db.lookup(ip("203.0.113.1")).unwrap().unwrap();

    assert_eq!(record, city("Wellington", "NZ"));
    assert_eq!(
        record.get_path(&["country", "iso_code"]).and_then(DataValue::as_str),
        Some("NZ")
    );
    assert_eq!(
        record.get_path(&["country", "geoname_id"]).and_then(DataValue::as_u64),
        Some(2_186_224)
    );
}

#[test]
fn test_ipv4_database() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_cidr("10.0.0.0/8", DataValue::String("private".into()))
        .unwrap();
    builder
        .add_cidr("10.1.0.0/16", DataValue::String("lab".into()))
        .unwrap();
    let db = Database::from_bytes(builder.build().unwrap()).unwrap();

    assert_eq!(db.metadata().ip_version, IpVersion::V4);
    assert_eq!(
        db.lookup(ip("10.1.2.3")).unwrap(),
        Some(DataValue::String("lab".into()))
    );
    assert_eq!(
        db.lookup(ip("10.200.2.3")).unwrap(),
        Some(DataValue::String("private".into()))
    );
    assert_eq!(
        db.lookup(ip("::1")),
        Err(MmdbError::AddressFamilyMismatch)
    );
}

#[test]
fn test_ipv4_lookup_uses_ipv4_subtree_of_ipv6_database() {
    let mut builder = DatabaseBuilder::new().with_ip_version(IpVersion::V6);
    builder
        .add_cidr("1.0.0.0/8", DataValue::String("v4".into()))
        .unwrap();
    builder
        .add_cidr("::100:0/104", DataValue::String("v6 view".into()))
        .unwrap();
    let db = Database::from_bytes(builder.build().unwrap()).unwrap();

    // ::1.0.0.0/104 and 1.0.0.0/8 are the same subtree; the later insert wins
    assert_eq!(
        db.lookup(ip("1.2.3.4")).unwrap(),
        Some(DataValue::String("v6 view".into()))
    );
    assert_eq!(db.ipv4_start().depth, 96);
}

#[test]
fn test_lookup_is_idempotent() {
    let db = Database::from_bytes(build_mixed(None)).unwrap();
    for addr in ["203.0.113.9", "198.51.100.7", "2001:db8::5", "8.8.8.8"] {
        let first = db.lookup_prefix(ip(addr)).unwrap();
        let second = db.lookup_prefix(ip(addr)).unwrap();
        assert_eq!(first, second, "{}", addr);
    }
}

#[test]
fn test_lookup_offset_and_decode_at_agree() {
    let db = Database::from_bytes(build_mixed(None)).unwrap();
    let found = db.lookup_offset(ip("203.0.113.77")).unwrap().unwrap();
    assert_eq!(found.prefix_len, 25);
    assert_eq!(
        db.decode_at(found.data_offset).unwrap(),
        db.lookup(ip("203.0.113.77")).unwrap().unwrap()
    );
}

#[test]
fn test_shared_records_share_offsets() {
    let mut builder = DatabaseBuilder::new();
    for net in ["10.0.0.0/8", "172.16.0.0/12", "192.168.0.0/16"] {
        builder.add_cidr(net, city("Private", "ZZ")).unwrap();
    }
    let db = Database::from_bytes(builder.build().unwrap()).unwrap();

    let offsets: Vec<u64> = ["10.0.0.1", "172.16.0.1", "192.168.0.1"]
        .iter()
        .map(|a| db.lookup_offset(ip(a)).unwrap().unwrap().data_offset)
        .collect();
    assert!(offsets.iter().all(|&o| o == offsets[0]));
}

#[test]
fn test_metadata_accessors() {
    let db = Database::from_bytes(build_mixed(None)).unwrap();
    let metadata = db.metadata();

    assert_eq!(metadata.database_type.as_deref(), Some("Test-City"));
    assert_eq!(metadata.binary_format_major_version, 2);
    assert_eq!(metadata.languages, vec!["en".to_string()]);
    assert_eq!(
        metadata.description.get("en").map(String::as_str),
        Some("integration test database")
    );
    assert_eq!(metadata.build_epoch, Some(1_700_000_000));

    assert_eq!(
        db.raw_metadata().get("node_count").and_then(DataValue::as_u64),
        Some(metadata.node_count as u64)
    );
}

#[test]
fn test_networks_iteration() {
    let mut builder = DatabaseBuilder::new();
    builder
        .add_cidr("192.168.0.0/16", DataValue::Uint16(2))
        .unwrap();
    builder.add_cidr("10.0.0.0/8", DataValue::Uint16(1)).unwrap();
    let db = Database::from_bytes(builder.build().unwrap()).unwrap();

    let networks: Vec<Network> = db.networks().collect::<Result<_, _>>().unwrap();
    let summary: Vec<(IpAddr, u8)> = networks.iter().map(|n| (n.addr, n.prefix_len)).collect();
    assert_eq!(
        summary,
        vec![(ip("10.0.0.0"), 8), (ip("192.168.0.0"), 16)]
    );
    assert_eq!(db.decode_at(networks[1].data_offset).unwrap(), DataValue::Uint16(2));
}

#[test]
fn test_verify_built_database() {
    let db = Database::from_bytes(build_mixed(None)).unwrap();
    let report = db.verify();
    assert!(report.is_valid(), "{:?}", report.errors);
    assert_eq!(report.stats.network_count, 4);
    assert_eq!(report.stats.record_count, 4);
}

#[test]
fn test_storage_backends_agree() {
    let bytes = build_mixed(None);
    let mut file = NamedTempFile::with_suffix(".mmdb").unwrap();
    file.write_all(&bytes).unwrap();
    file.flush().unwrap();

    let in_memory = Database::from_bytes(bytes).unwrap();
    let mapped = Database::open(file.path()).unwrap();
    let handle = Database::options()
        .source_kind(SourceKind::FileHandle)
        .open(file.path())
        .unwrap();
    let direct = Database::from_source(FileSource::open(file.path()).unwrap()).unwrap();

    for addr in ["203.0.113.9", "203.0.113.130", "2001:db8::1", "1.1.1.1"] {
        let expected = in_memory.lookup_prefix(ip(addr)).unwrap();
        assert_eq!(mapped.lookup_prefix(ip(addr)).unwrap(), expected);
        assert_eq!(handle.lookup_prefix(ip(addr)).unwrap(), expected);
        assert_eq!(direct.lookup_prefix(ip(addr)).unwrap(), expected);
    }
    assert_eq!(direct.source().len(), mapped.source().len());
}

#[test]
fn test_concurrent_lookups() {
    let db = Arc::new(Database::from_bytes(build_mixed(None)).unwrap());
    let expected = db.lookup(ip("203.0.113.200")).unwrap();

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let db = Arc::clone(&db);
            let expected = expected.clone();
            scope.spawn(move || {
                for _ in 0..500 {
                    assert_eq!(db.lookup(ip("203.0.113.200")).unwrap(), expected);
                    assert_eq!(db.lookup(ip("8.8.8.8")).unwrap(), None);
                }
            });
        }
    });
}

#[test]
fn test_concurrent_lookups_through_file_handle() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&build_mixed(None)).unwrap();
    file.flush().unwrap();

    let db = Database::from_source(FileSource::open(file.path()).unwrap()).unwrap();
    std::thread::scope(|scope| {
        for addr in ["203.0.113.1", "203.0.113.129", "198.51.100.7", "2001:db8::"] {
            let db = &db;
            scope.spawn(move || {
                for _ in 0..200 {
                    assert!(db.lookup(ip(addr)).unwrap().is_some());
                }
            });
        }
    });
}

#[test]
fn test_garbage_is_rejected() {
    assert_eq!(
        Database::from_bytes(vec![0u8; 1024]).unwrap_err(),
        MmdbError::MetadataNotFound
    );
    assert_eq!(
        Database::from_bytes(Vec::new()).unwrap_err(),
        MmdbError::MetadataNotFound
    );
}
