#![no_main]
use libfuzzer_sys::fuzz_target;
use mmdb_reader::data_section::{DataDecoder, DataEncoder, DataValue};

fuzz_target!(|data: &[u8]| {
    // Decode arbitrary bytes as a data section
    let decoder = DataDecoder::new(data, 0);
    let mut offset = 0u64;
    while offset < data.len() as u64 {
        match decoder.decode(offset) {
            Ok((value, next)) => {
                assert!(next > offset);
                // anything that decodes must survive a re-encode
                if let Ok(bytes) = DataEncoder::to_bytes(&value) {
                    let reparsed = DataDecoder::new(bytes.as_slice(), 0).decode_value(0);
                    if !contains_nan(&value) {
                        assert_eq!(reparsed.as_ref(), Ok(&value));
                    }
                }
                offset = next;
            }
            Err(_) => break,
        }
    }
});

fn contains_nan(value: &DataValue) -> bool {
    match value {
        DataValue::Double(d) => d.is_nan(),
        DataValue::Float(f) => f.is_nan(),
        DataValue::Map(entries) => entries.values().any(contains_nan),
        DataValue::Array(items) => items.iter().any(contains_nan),
        _ => false,
    }
}
