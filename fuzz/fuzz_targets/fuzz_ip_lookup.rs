#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::{DataValue, DatabaseBuilder};
use std::net::{IpAddr, Ipv6Addr};
use std::sync::OnceLock;

fn database() -> &'static mmdb_reader::Database {
    static DB: OnceLock<mmdb_reader::Database> = OnceLock::new();
    DB.get_or_init(|| {
        let mut builder = DatabaseBuilder::new();
        for (i, net) in ["1.2.3.4", "10.0.0.0/8", "2001:db8::1", "192.168.0.0/16", "::/1"]
            .iter()
            .enumerate()
        {
            builder.add_cidr(net, DataValue::Uint32(i as u32)).unwrap();
        }
        mmdb_reader::Database::from_bytes(builder.build().unwrap()).unwrap()
    })
}

fuzz_target!(|data: &[u8]| {
    let db = database();

    // Textual addresses exercise parsing
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = db.lookup_str(s);
    }

    // Raw bytes exercise every path through the tree
    if data.len() >= 16 {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&data[..16]);
        let addr = IpAddr::V6(Ipv6Addr::from(octets));
        assert!(db.lookup(addr).is_ok());
    }
    if data.len() >= 4 {
        let addr = IpAddr::from([data[0], data[1], data[2], data[3]]);
        assert!(db.lookup(addr).is_ok());
    }
});
