#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Garbage must be rejected with an error, never a panic
    if let Ok(db) = mmdb_reader::Database::from_bytes(data.to_vec()) {
        let _ = db.lookup("1.2.3.4".parse().unwrap());
        let _ = db.lookup("2001:db8::1".parse().unwrap());
        for network in db.networks().take(64).flatten() {
            let _ = db.decode_at(network.data_offset);
        }
    }
});
