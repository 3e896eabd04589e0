//! Data section encoding and decoding
//!
//! Implements the MaxMind DB data type specification used both by the data
//! section (records referenced from the search tree) and by the metadata
//! block at the end of the file.
//!
//! # Supported Types
//!
//! - **Pointer**: Reference to another data item (resolved transparently)
//! - **String**: UTF-8 text data
//! - **Double**: 64-bit floating point (IEEE 754), or ASCII decimal text
//! - **Bytes**: Raw byte arrays
//! - **Uint16** / **Uint32** / **Uint64** / **Uint128**: big-endian, variable width
//! - **Map**: Key-value pairs (string keys)
//! - **Int32**: Signed 32-bit integers
//! - **Array**: Ordered lists of values
//! - **Bool**: Boolean values (stored in the size field)
//! - **Float**: 32-bit floating point (IEEE 754)
//!
//! # Format
//!
//! Every value starts with a control byte: 3 bits of type and 5 bits of
//! size. A zero type selects an extended type stored in the following byte.
//! Sizes 29, 30 and 31 pull 1, 2 or 3 more bytes.
//!
//! See: https://maxmind.github.io/MaxMind-DB/

use crate::error::{MmdbError, Result};
use crate::mmdb::types::DataType;
use crate::source::ByteSource;
use rustc_hash::FxHashMap;
use std::borrow::Cow;
use std::collections::HashMap;
use tracing::debug;

/// Maximum nesting of maps, arrays and pointers in one decode
pub const MAX_DECODE_DEPTH: usize = 512;

/// Minimum number of values one top-level decode may produce.
///
/// The allowance grows to the section length for larger sections. Pointers
/// let a few hundred bytes describe an exponentially large value, so the
/// count stays bounded by the input size rather than by what it expands to.
pub const MIN_DECODE_BUDGET: usize = 1 << 18;

/// Added to the raw pointer value, indexed by payload width - 1
const POINTER_BIAS: [u64; 4] = [0, 2048, 526_336, 0];

/// Added to the extension bytes of sizes 29, 30 and 31
const SIZE_BIAS: [usize; 3] = [29, 285, 65_821];

/// Largest size the control byte can express
const MAX_ENCODED_SIZE: usize = 65_821 + 0xFF_FFFF;

/// A decoded value from the data section or metadata
///
/// Pointers never surface here; they are followed during decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum DataValue {
    /// UTF-8 string
    String(String),
    /// IEEE 754 double precision float
    Double(f64),
    /// Raw byte array
    Bytes(Vec<u8>),
    /// Unsigned 16-bit integer
    Uint16(u16),
    /// Unsigned 32-bit integer
    Uint32(u32),
    /// Key-value map (keys are always strings)
    Map(HashMap<String, DataValue>),
    /// Signed 32-bit integer
    Int32(i32),
    /// Unsigned 64-bit integer
    Uint64(u64),
    /// Unsigned 128-bit integer
    Uint128(u128),
    /// Array of values
    Array(Vec<DataValue>),
    /// Boolean value
    Bool(bool),
    /// IEEE 754 single precision float
    Float(f32),
}

impl DataValue {
    /// Name of the variant, for error messages and diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            DataValue::String(_) => "string",
            DataValue::Double(_) => "double",
            DataValue::Bytes(_) => "bytes",
            DataValue::Uint16(_) => "uint16",
            DataValue::Uint32(_) => "uint32",
            DataValue::Map(_) => "map",
            DataValue::Int32(_) => "int32",
            DataValue::Uint64(_) => "uint64",
            DataValue::Uint128(_) => "uint128",
            DataValue::Array(_) => "array",
            DataValue::Bool(_) => "boolean",
            DataValue::Float(_) => "float",
        }
    }

    /// Borrow the string, if this is a `String`
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DataValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Any unsigned integer that fits in a u64
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            DataValue::Uint16(n) => Some(*n as u64),
            DataValue::Uint32(n) => Some(*n as u64),
            DataValue::Uint64(n) => Some(*n),
            DataValue::Uint128(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Borrow the map, if this is a `Map`
    pub fn as_map(&self) -> Option<&HashMap<String, DataValue>> {
        match self {
            DataValue::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow the elements, if this is an `Array`
    pub fn as_array(&self) -> Option<&[DataValue]> {
        match self {
            DataValue::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Look up `key` in a map value
    pub fn get(&self, key: &str) -> Option<&DataValue> {
        self.as_map()?.get(key)
    }

    /// Follow a path of map keys, e.g. `["country", "iso_code"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&DataValue> {
        path.iter().try_fold(self, |value, key| value.get(key))
    }
}

/// Data section encoder
///
/// Builds a data section by encoding values and tracking offsets.
/// Identical values are stored once: top-level duplicates share an offset
/// and nested duplicates are written as pointers to the first copy.
pub struct DataEncoder {
    /// Encoded data buffer
    buffer: Vec<u8>,
    /// Map from pointer-free serialization to offset (for deduplication)
    dedup_map: FxHashMap<Vec<u8>, u32>,
}

impl DataEncoder {
    /// Create a new encoder
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            dedup_map: FxHashMap::default(),
        }
    }

    /// Encode a value and return its offset
    ///
    /// If the value was previously encoded, returns the existing offset.
    pub fn encode(&mut self, value: &DataValue) -> Result<u32> {
        let standalone = Self::to_bytes(value)?;
        if let Some(&offset) = self.dedup_map.get(&standalone) {
            return Ok(offset);
        }

        let offset = self.current_offset()?;
        self.write(value)?;
        Ok(offset)
    }

    /// Get the final encoded data section
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get current buffer size
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    /// Serialize one value without pointers
    pub fn to_bytes(value: &DataValue) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        Self::encode_to_buffer(value, &mut buffer)?;
        Ok(buffer)
    }

    fn current_offset(&self) -> Result<u32> {
        u32::try_from(self.buffer.len()).map_err(|_| {
            MmdbError::InvalidInput("data section exceeds 4 GiB pointer range".to_string())
        })
    }

    /// Append `value`, replacing repeated sub-values with pointers
    fn write(&mut self, value: &DataValue) -> Result<()> {
        let standalone = Self::to_bytes(value)?;
        if let Some(&offset) = self.dedup_map.get(&standalone) {
            if Self::pointer_len(offset) < standalone.len() {
                Self::encode_pointer(offset, &mut self.buffer);
                return Ok(());
            }
        }

        let start = self.current_offset()?;
        match value {
            DataValue::Map(m) => {
                Self::encode_control(DataType::Map, m.len(), &mut self.buffer)?;
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);
                for (key, value) in pairs {
                    self.write(&DataValue::String(key.clone()))?;
                    self.write(value)?;
                }
            }
            DataValue::Array(a) => {
                Self::encode_control(DataType::Array, a.len(), &mut self.buffer)?;
                for value in a {
                    self.write(value)?;
                }
            }
            _ => self.buffer.extend_from_slice(&standalone),
        }
        self.dedup_map.entry(standalone).or_insert(start);
        Ok(())
    }

    /// Encode a value to a buffer
    fn encode_to_buffer(value: &DataValue, buffer: &mut Vec<u8>) -> Result<()> {
        match value {
            DataValue::String(s) => Self::encode_string(s, buffer),
            DataValue::Double(d) => {
                Self::encode_control(DataType::Double, 8, buffer)?;
                buffer.extend_from_slice(&d.to_be_bytes());
                Ok(())
            }
            DataValue::Bytes(b) => {
                Self::encode_control(DataType::Bytes, b.len(), buffer)?;
                buffer.extend_from_slice(b);
                Ok(())
            }
            DataValue::Uint16(n) => Self::encode_uint(DataType::Uint16, *n as u128, buffer),
            DataValue::Uint32(n) => Self::encode_uint(DataType::Uint32, *n as u128, buffer),
            DataValue::Uint64(n) => Self::encode_uint(DataType::Uint64, *n as u128, buffer),
            DataValue::Uint128(n) => Self::encode_uint(DataType::Uint128, *n, buffer),
            DataValue::Int32(n) => {
                Self::encode_control(DataType::Int32, 4, buffer)?;
                buffer.extend_from_slice(&n.to_be_bytes());
                Ok(())
            }
            DataValue::Map(m) => {
                Self::encode_control(DataType::Map, m.len(), buffer)?;

                // Sorted by key for deterministic output
                let mut pairs: Vec<_> = m.iter().collect();
                pairs.sort_by_key(|(k, _)| *k);

                for (key, value) in pairs {
                    Self::encode_string(key, buffer)?;
                    Self::encode_to_buffer(value, buffer)?;
                }
                Ok(())
            }
            DataValue::Array(a) => {
                Self::encode_control(DataType::Array, a.len(), buffer)?;
                for value in a {
                    Self::encode_to_buffer(value, buffer)?;
                }
                Ok(())
            }
            DataValue::Bool(b) => Self::encode_control(DataType::Bool, *b as usize, buffer),
            DataValue::Float(f) => {
                Self::encode_control(DataType::Float, 4, buffer)?;
                buffer.extend_from_slice(&f.to_be_bytes());
                Ok(())
            }
        }
    }

    fn encode_string(s: &str, buffer: &mut Vec<u8>) -> Result<()> {
        let bytes = s.as_bytes();
        Self::encode_control(DataType::String, bytes.len(), buffer)?;
        buffer.extend_from_slice(bytes);
        Ok(())
    }

    /// Unsigned integers drop their leading zero bytes
    fn encode_uint(data_type: DataType, n: u128, buffer: &mut Vec<u8>) -> Result<()> {
        let bytes = n.to_be_bytes();
        let skip = (n.leading_zeros() / 8) as usize;
        Self::encode_control(data_type, bytes.len() - skip, buffer)?;
        buffer.extend_from_slice(&bytes[skip..]);
        Ok(())
    }

    /// Encoded length of a pointer to `offset`
    fn pointer_len(offset: u32) -> usize {
        match offset as u64 {
            0..=2047 => 2,
            2048..=526_335 => 3,
            526_336..=134_744_063 => 4,
            _ => 5,
        }
    }

    /// Write a pointer to `offset` (relative to the pointer base)
    pub(crate) fn encode_pointer(offset: u32, buffer: &mut Vec<u8>) {
        let offset = offset as u64;
        match Self::pointer_len(offset as u32) {
            2 => {
                buffer.push(0x20 | ((offset >> 8) & 0x7) as u8);
                buffer.push(offset as u8);
            }
            3 => {
                let v = offset - POINTER_BIAS[1];
                buffer.push(0x28 | ((v >> 16) & 0x7) as u8);
                buffer.extend_from_slice(&[(v >> 8) as u8, v as u8]);
            }
            4 => {
                let v = offset - POINTER_BIAS[2];
                buffer.push(0x30 | ((v >> 24) & 0x7) as u8);
                buffer.extend_from_slice(&[(v >> 16) as u8, (v >> 8) as u8, v as u8]);
            }
            _ => {
                buffer.push(0x38);
                buffer.extend_from_slice(&(offset as u32).to_be_bytes());
            }
        }
    }

    /// Write the control byte(s) for a value of `data_type` and `size`
    ///
    /// Order on the wire: control byte, extended type byte (if any), size
    /// extension bytes (if any).
    pub(crate) fn encode_control(
        data_type: DataType,
        size: usize,
        buffer: &mut Vec<u8>,
    ) -> Result<()> {
        let mut extension = [0u8; 3];
        let (size_bits, extension_len) = if size < SIZE_BIAS[0] {
            (size as u8, 0)
        } else if size < SIZE_BIAS[1] {
            extension[0] = (size - SIZE_BIAS[0]) as u8;
            (29, 1)
        } else if size < SIZE_BIAS[2] {
            let adjusted = (size - SIZE_BIAS[1]) as u16;
            extension[..2].copy_from_slice(&adjusted.to_be_bytes());
            (30, 2)
        } else if size <= MAX_ENCODED_SIZE {
            let adjusted = (size - SIZE_BIAS[2]) as u32;
            extension.copy_from_slice(&adjusted.to_be_bytes()[1..]);
            (31, 3)
        } else {
            return Err(MmdbError::InvalidInput(format!(
                "{:?} of size {} exceeds the largest encodable size {}",
                data_type, size, MAX_ENCODED_SIZE
            )));
        };

        if data_type.is_extended() {
            buffer.push(size_bits);
            buffer.push(data_type.id() - 7);
        } else {
            buffer.push((data_type.id() << 5) | size_bits);
        }
        buffer.extend_from_slice(&extension[..extension_len]);
        Ok(())
    }
}

impl Default for DataEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Control byte after type resolution
#[derive(Debug, Clone, Copy)]
struct Control {
    ctrl: u8,
    data_type: DataType,
    /// First byte after the control byte and extended type byte
    cursor: u64,
}

/// Data section decoder
///
/// Decodes one value at an absolute offset of a [`ByteSource`] and reports
/// the offset just past it. Pointers are resolved against `pointer_base`
/// (the data section start, or the metadata start). Reads never go past
/// `end`.
pub struct DataDecoder<'a, S: ByteSource + ?Sized> {
    source: &'a S,
    pointer_base: u64,
    end: u64,
}

impl<'a, S: ByteSource + ?Sized> DataDecoder<'a, S> {
    /// Create a decoder over `source`
    ///
    /// # Arguments
    /// * `source` - Bytes holding the encoded values
    /// * `pointer_base` - Absolute offset that pointer values are relative to
    pub fn new(source: &'a S, pointer_base: u64) -> Self {
        Self {
            source,
            pointer_base,
            end: source.len(),
        }
    }

    /// Restrict reads to offsets below `end`
    pub fn with_end(mut self, end: u64) -> Self {
        self.end = end.min(self.source.len());
        self
    }

    /// Decode the value at `offset`, returning it and the offset after it
    ///
    /// When `offset` holds a pointer the returned offset is the byte after
    /// the pointer, not after the value it points to.
    pub fn decode(&self, offset: u64) -> Result<(DataValue, u64)> {
        let mut budget = self.value_budget();
        self.decode_at(offset, 0, &mut budget)
    }

    /// Decode the value at `offset`, discarding the next offset
    pub fn decode_value(&self, offset: u64) -> Result<DataValue> {
        self.decode(offset).map(|(value, _)| value)
    }

    fn value_budget(&self) -> usize {
        let section_len = self.end.saturating_sub(self.pointer_base);
        usize::try_from(section_len)
            .unwrap_or(usize::MAX)
            .max(MIN_DECODE_BUDGET)
    }

    fn bytes(&self, offset: u64, len: usize) -> Result<Cow<'a, [u8]>> {
        let in_bounds = offset
            .checked_add(len as u64)
            .is_some_and(|end| end <= self.end);
        if !in_bounds {
            return Err(MmdbError::Truncated {
                offset,
                len: len as u64,
            });
        }
        self.source.read(offset, len)
    }

    fn byte(&self, offset: u64) -> Result<u8> {
        Ok(self.bytes(offset, 1)?[0])
    }

    fn read_control(&self, offset: u64) -> Result<Control> {
        let ctrl = self.byte(offset)?;
        let mut cursor = offset + 1;

        let type_id = match ctrl >> 5 {
            0 => {
                let ext = self.byte(cursor)?;
                cursor += 1;
                if ext == 0 {
                    return Err(MmdbError::corrupt(format!(
                        "extended type byte of 0 at offset {}",
                        offset
                    )));
                }
                7 + ext as u16
            }
            selector => selector as u16,
        };

        let data_type = DataType::from_id(type_id).ok_or_else(|| {
            MmdbError::corrupt(format!(
                "unknown data type {} at offset {}",
                type_id, offset
            ))
        })?;

        Ok(Control {
            ctrl,
            data_type,
            cursor,
        })
    }

    fn decode_at(
        &self,
        offset: u64,
        depth: usize,
        budget: &mut usize,
    ) -> Result<(DataValue, u64)> {
        if depth > MAX_DECODE_DEPTH {
            return Err(MmdbError::corrupt(format!(
                "data nested deeper than {} levels at offset {}",
                MAX_DECODE_DEPTH, offset
            )));
        }
        *budget = budget.checked_sub(1).ok_or_else(|| {
            MmdbError::corrupt(format!(
                "value at offset {} expands past the decode budget",
                offset
            ))
        })?;

        let control = self.read_control(offset)?;

        if control.data_type == DataType::Pointer {
            let (target, next) = self.decode_pointer(control.ctrl, control.cursor)?;
            if target >= self.end {
                return Err(MmdbError::corrupt(format!(
                    "pointer at offset {} targets {} past end of section {}",
                    offset, target, self.end
                )));
            }
            if self.read_control(target)?.data_type == DataType::Pointer {
                return Err(MmdbError::corrupt(format!(
                    "pointer at offset {} points to another pointer at {}",
                    offset, target
                )));
            }
            let (value, _) = self.decode_at(target, depth + 1, budget)?;
            return Ok((value, next));
        }

        let (size, cursor) = self.decode_size(control.ctrl, control.cursor)?;
        self.decode_payload(control.data_type, size, cursor, depth, budget)
    }

    /// Returns (absolute target, offset after the pointer)
    fn decode_pointer(&self, ctrl: u8, cursor: u64) -> Result<(u64, u64)> {
        let width = (((ctrl >> 3) & 0x3) + 1) as usize;
        let payload = self.bytes(cursor, width)?;

        let raw = if width == 4 {
            u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) as u64
        } else {
            payload
                .iter()
                .fold((ctrl & 0x7) as u64, |acc, &b| (acc << 8) | b as u64)
        };

        let target = self
            .pointer_base
            .checked_add(raw + POINTER_BIAS[width - 1])
            .ok_or_else(|| MmdbError::corrupt("pointer target overflows"))?;
        Ok((target, cursor + width as u64))
    }

    /// Returns (size, offset after any size extension bytes)
    fn decode_size(&self, ctrl: u8, cursor: u64) -> Result<(usize, u64)> {
        let size = (ctrl & 0x1F) as usize;
        if size < 29 {
            return Ok((size, cursor));
        }

        let extra = size - 28;
        let bytes = self.bytes(cursor, extra)?;
        let value = bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
        Ok((SIZE_BIAS[extra - 1] + value, cursor + extra as u64))
    }

    fn decode_payload(
        &self,
        data_type: DataType,
        size: usize,
        cursor: u64,
        depth: usize,
        budget: &mut usize,
    ) -> Result<(DataValue, u64)> {
        let value = match data_type {
            DataType::Map => return self.decode_map(size, cursor, depth, budget),
            DataType::Array => return self.decode_array(size, cursor, depth, budget),
            // Bool carries its value in the size field and has no payload
            DataType::Bool => {
                return match size {
                    0 | 1 => Ok((DataValue::Bool(size == 1), cursor)),
                    _ => Err(MmdbError::corrupt(format!(
                        "boolean of size {} at offset {}",
                        size, cursor
                    ))),
                };
            }
            DataType::Pointer | DataType::DataCache | DataType::EndMarker => {
                return Err(MmdbError::corrupt(format!(
                    "{:?} cannot appear as a value (offset {})",
                    data_type, cursor
                )));
            }
            DataType::String => {
                let payload = self.bytes(cursor, size)?;
                let s = std::str::from_utf8(&payload).map_err(|e| {
                    MmdbError::corrupt(format!("invalid UTF-8 in string at offset {}: {}", cursor, e))
                })?;
                DataValue::String(s.to_owned())
            }
            DataType::Double => {
                let payload = self.bytes(cursor, size)?;
                DataValue::Double(decode_double(&payload, cursor)?)
            }
            DataType::Bytes => DataValue::Bytes(self.bytes(cursor, size)?.into_owned()),
            DataType::Uint16 => DataValue::Uint16(self.uint(cursor, size, 2)? as u16),
            DataType::Uint32 => DataValue::Uint32(self.uint(cursor, size, 4)? as u32),
            DataType::Uint64 => DataValue::Uint64(self.uint(cursor, size, 8)? as u64),
            DataType::Uint128 => DataValue::Uint128(self.uint(cursor, size, 16)?),
            DataType::Int32 => DataValue::Int32(self.uint(cursor, size, 4)? as u32 as i32),
            DataType::Float => {
                if size != 4 {
                    return Err(MmdbError::corrupt(format!(
                        "float of size {} at offset {}",
                        size, cursor
                    )));
                }
                let payload = self.bytes(cursor, 4)?;
                DataValue::Float(f32::from_be_bytes([
                    payload[0], payload[1], payload[2], payload[3],
                ]))
            }
        };
        Ok((value, cursor + size as u64))
    }

    /// Big-endian unsigned integer of at most `max_width` bytes
    fn uint(&self, cursor: u64, size: usize, max_width: usize) -> Result<u128> {
        if size > max_width {
            return Err(MmdbError::corrupt(format!(
                "integer payload of {} bytes exceeds {} at offset {}",
                size, max_width, cursor
            )));
        }
        let payload = self.bytes(cursor, size)?;
        Ok(payload.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128))
    }

    fn decode_map(
        &self,
        count: usize,
        cursor: u64,
        depth: usize,
        budget: &mut usize,
    ) -> Result<(DataValue, u64)> {
        // Each entry needs at least a key byte and a value byte
        let remaining = self.end.saturating_sub(cursor);
        if (count as u64).saturating_mul(2) > remaining {
            return Err(MmdbError::corrupt(format!(
                "map at offset {} claims {} entries but only {} bytes remain",
                cursor, count, remaining
            )));
        }

        let mut map = HashMap::with_capacity(count);
        let mut cursor = cursor;
        for _ in 0..count {
            let (key, next) = self.decode_at(cursor, depth + 1, budget)?;
            let key = match key {
                DataValue::String(s) => s,
                other => {
                    return Err(MmdbError::corrupt(format!(
                        "map key at offset {} is a {}, expected string",
                        cursor,
                        other.type_name()
                    )))
                }
            };

            let (value, next) = self.decode_at(next, depth + 1, budget)?;
            if map.contains_key(&key) {
                debug!(
                    "duplicate map key {:?} at offset {}, keeping the last value",
                    key, cursor
                );
            }
            map.insert(key, value);
            cursor = next;
        }

        Ok((DataValue::Map(map), cursor))
    }

    fn decode_array(
        &self,
        count: usize,
        cursor: u64,
        depth: usize,
        budget: &mut usize,
    ) -> Result<(DataValue, u64)> {
        let remaining = self.end.saturating_sub(cursor);
        if count as u64 > remaining {
            return Err(MmdbError::corrupt(format!(
                "array at offset {} claims {} elements but only {} bytes remain",
                cursor, count, remaining
            )));
        }

        let mut array = Vec::with_capacity(count);
        let mut cursor = cursor;
        for _ in 0..count {
            let (value, next) = self.decode_at(cursor, depth + 1, budget)?;
            array.push(value);
            cursor = next;
        }

        Ok((DataValue::Array(array), cursor))
    }
}

/// 8-byte payloads are IEEE 754; anything else is ASCII decimal text
fn decode_double(payload: &[u8], offset: u64) -> Result<f64> {
    if let Ok(bytes) = <[u8; 8]>::try_from(payload) {
        return Ok(f64::from_be_bytes(bytes));
    }

    std::str::from_utf8(payload)
        .ok()
        .and_then(|text| text.trim().parse::<f64>().ok())
        .ok_or_else(|| {
            MmdbError::corrupt(format!(
                "double of {} bytes at offset {} is not decimal text",
                payload.len(),
                offset
            ))
        })
}
