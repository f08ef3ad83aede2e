//! Registry value (vk) parsing, encoding, and typed data extraction.

use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::name::{decode_name, encode_name};
use crate::utils::{read_i32_le, read_u16_le, read_u32_le};
use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use encoding_rs::UTF_16LE;
use std::io::Cursor;

/// Flag bit in [`ValueKey::flags`] indicating the name is stored compressed
/// (one byte per code unit) rather than UTF-16LE.
const VK_COMP_NAME: u16 = 0x0001;

/// Value key (vk) structure.
///
/// Represents a registry value with its name, type, and data.
#[derive(Debug, Clone)]
pub struct ValueKey {
    /// Length of value data, in bytes, excluding the inline-data high bit.
    pub data_length: u32,

    /// Offset to value data, or the inline bytes themselves when
    /// `data_length <= 4`.
    pub data_offset: u32,

    /// Value data type.
    pub data_type: ValueType,

    /// Flags (0x0001 = name is stored compressed).
    pub flags: u16,

    /// Value name. The unnamed ("default") value is represented as an empty
    /// string on disk; callers render it as `(default)` at presentation time.
    pub name: String,
}

impl ValueKey {
    /// Parses a value key from cell data.
    ///
    /// # Arguments
    ///
    /// * `data` - Cell data (excluding size field, starting with "vk" signature).
    /// * `offset` - Offset of this cell for error reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 20 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 20,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"vk" {
            return Err(RegistryError::malformed_record(
                offset,
                format!("expected 'vk' signature, found {:?}", &data[0..2]),
            ));
        }

        let name_length = read_u16_le(data, 0x02)?;

        // Data length is stored as i32; the high bit marks inline data but
        // carries no length information of its own.
        let data_length_raw = read_i32_le(data, 0x04)?;
        let data_length = (data_length_raw & 0x7FFF_FFFF) as u32;

        let data_offset = read_u32_le(data, 0x08)?;
        let data_type_raw = read_u32_le(data, 0x0C)?;
        let data_type = ValueType::from_u32(data_type_raw)?;
        let flags = read_u16_le(data, 0x10)?;

        let name = if name_length > 0 {
            let name_end = 0x14 + name_length as usize;
            if name_end > data.len() {
                return Err(RegistryError::TruncatedData {
                    offset,
                    expected: name_end,
                    actual: data.len(),
                });
            }
            decode_name(&data[0x14..name_end], (flags & VK_COMP_NAME) != 0, offset)?
        } else {
            String::new()
        };

        Ok(ValueKey {
            data_length,
            data_offset,
            data_type,
            flags,
            name,
        })
    }

    /// Encodes this value key back to its on-disk cell body.
    pub fn encode(&self) -> Vec<u8> {
        let (name_bytes, compressed) = encode_name(&self.name);
        let mut flags = self.flags;
        if compressed {
            flags |= VK_COMP_NAME;
        } else {
            flags &= !VK_COMP_NAME;
        }

        let mut buf = vec![0u8; 0x14 + name_bytes.len()];
        buf[0..2].copy_from_slice(b"vk");
        buf[0x02..0x04].copy_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        let data_length_raw = if self.is_inline_data() {
            self.data_length | 0x8000_0000
        } else {
            self.data_length
        };
        buf[0x04..0x08].copy_from_slice(&data_length_raw.to_le_bytes());
        buf[0x08..0x0C].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&self.data_type.to_u32().to_le_bytes());
        buf[0x10..0x12].copy_from_slice(&flags.to_le_bytes());
        // 0x12..0x14 spare, left zeroed.
        buf[0x14..0x14 + name_bytes.len()].copy_from_slice(&name_bytes);
        buf
    }

    /// Returns the display name for this value, mapping the empty on-disk
    /// name to the conventional default-value label.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "(default)"
        } else {
            &self.name
        }
    }

    /// Returns true if the data is stored inline (in the data_offset field).
    pub fn is_inline_data(&self) -> bool {
        self.data_length <= 4 && self.data_length > 0
    }

    /// Extracts inline data (when data_length <= 4).
    pub fn inline_data(&self) -> Vec<u8> {
        let bytes = self.data_offset.to_le_bytes();
        bytes[..self.data_length as usize].to_vec()
    }
}

/// Parsed registry value data.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueData {
    /// No data.
    None,

    /// String value.
    String(String),

    /// Expandable string value.
    ExpandString(String),

    /// Binary data.
    Binary(Vec<u8>),

    /// 32-bit integer.
    Dword(u32),

    /// 32-bit big-endian integer.
    DwordBigEndian(u32),

    /// Multiple strings.
    MultiString(Vec<String>),

    /// 64-bit integer.
    Qword(u64),

    /// A type this crate has no dedicated decoder for (e.g. `REG_LINK`,
    /// the resource-list types), kept as the original type code plus raw
    /// bytes so a commit or `.reg` re-export preserves it instead of
    /// silently reclassifying it as `REG_BINARY`.
    Unknown(u32, Vec<u8>),
}

impl ValueData {
    /// Parses value data based on the value type.
    ///
    /// # Arguments
    ///
    /// * `data` - Raw value data bytes.
    /// * `value_type` - Type of the value.
    /// * `offset` - Offset for error reporting.
    pub fn parse(data: &[u8], value_type: ValueType, offset: u32) -> Result<Self> {
        if data.is_empty() {
            return Ok(ValueData::None);
        }

        match value_type {
            ValueType::None => Ok(ValueData::None),

            ValueType::String | ValueType::ExpandString => {
                let s = decode_sz(data, offset)?;
                if value_type == ValueType::String {
                    Ok(ValueData::String(s))
                } else {
                    Ok(ValueData::ExpandString(s))
                }
            }

            ValueType::Binary => Ok(ValueData::Binary(data.to_vec())),

            ValueType::Dword => {
                if data.len() < 4 {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: 4,
                        actual: data.len(),
                    });
                }
                let mut cursor = Cursor::new(data);
                let value = cursor.read_u32::<LittleEndian>()?;
                Ok(ValueData::Dword(value))
            }

            ValueType::DwordBigEndian => {
                if data.len() < 4 {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: 4,
                        actual: data.len(),
                    });
                }
                let mut cursor = Cursor::new(data);
                let value = cursor.read_u32::<BigEndian>()?;
                Ok(ValueData::DwordBigEndian(value))
            }

            ValueType::Qword => {
                if data.len() < 8 {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: 8,
                        actual: data.len(),
                    });
                }
                let mut cursor = Cursor::new(data);
                let value = cursor.read_u64::<LittleEndian>()?;
                Ok(ValueData::Qword(value))
            }

            ValueType::MultiString => Ok(ValueData::MultiString(decode_multi_sz(data, offset)?)),

            other => Ok(ValueData::Unknown(other.to_u32(), data.to_vec())),
        }
    }

    /// Encodes this value back to its on-disk byte representation, paired
    /// with the [`ValueType`] a newly-written value key should declare.
    pub fn encode(&self) -> (Vec<u8>, ValueType) {
        match self {
            ValueData::None => (Vec::new(), ValueType::None),
            ValueData::String(s) => (encode_sz(s), ValueType::String),
            ValueData::ExpandString(s) => (encode_sz(s), ValueType::ExpandString),
            ValueData::Binary(b) => (b.clone(), ValueType::Binary),
            ValueData::Dword(d) => (d.to_le_bytes().to_vec(), ValueType::Dword),
            ValueData::DwordBigEndian(d) => (d.to_be_bytes().to_vec(), ValueType::DwordBigEndian),
            ValueData::MultiString(strings) => (encode_multi_sz(strings), ValueType::MultiString),
            ValueData::Qword(q) => (q.to_le_bytes().to_vec(), ValueType::Qword),
            ValueData::Unknown(code, b) => {
                (b.clone(), ValueType::from_u32(*code).unwrap_or(ValueType::Unknown(*code)))
            }
        }
    }

    /// Returns the declared type's display name, e.g. `"REG_SZ"`.
    pub fn type_name(&self) -> String {
        self.encode().1.name().to_string()
    }

    /// Converts the value data to a human-readable string representation,
    /// e.g. for `.reg` export comments or CLI display.
    pub fn display(&self) -> String {
        match self {
            ValueData::None => String::from("(none)"),
            ValueData::String(s) | ValueData::ExpandString(s) => s.clone(),
            ValueData::Binary(b) => format!("{:02X?}", b),
            ValueData::Dword(d) => format!("{} (0x{:08X})", d, d),
            ValueData::DwordBigEndian(d) => format!("{} (0x{:08X})", d, d),
            ValueData::Qword(q) => format!("{} (0x{:016X})", q, q),
            ValueData::MultiString(strings) => strings.join(", "),
            ValueData::Unknown(code, b) => format!("{:02X?} (type {code})", b),
        }
    }
}

/// Decodes a DWORD value, failing with [`RegistryError::TypeMismatch`] on
/// any other declared type.
pub fn as_dword(v: &ValueData) -> Result<u32> {
    match v {
        ValueData::Dword(d) => Ok(*d),
        other => Err(RegistryError::type_mismatch("REG_DWORD", other.type_name())),
    }
}

/// Decodes a QWORD value, failing with [`RegistryError::TypeMismatch`] on
/// any other declared type.
pub fn as_qword(v: &ValueData) -> Result<u64> {
    match v {
        ValueData::Qword(q) => Ok(*q),
        other => Err(RegistryError::type_mismatch("REG_QWORD", other.type_name())),
    }
}

/// Decodes a `REG_SZ`/`REG_EXPAND_SZ` value as a UTF-8 string, failing with
/// [`RegistryError::TypeMismatch`] on any other declared type.
pub fn as_sz(v: &ValueData) -> Result<&str> {
    match v {
        ValueData::String(s) | ValueData::ExpandString(s) => Ok(s.as_str()),
        other => Err(RegistryError::type_mismatch("REG_SZ", other.type_name())),
    }
}

/// Decodes a `REG_MULTI_SZ` value, failing with
/// [`RegistryError::TypeMismatch`] on any other declared type.
pub fn as_multi_sz(v: &ValueData) -> Result<&[String]> {
    match v {
        ValueData::MultiString(strings) => Ok(strings.as_slice()),
        other => Err(RegistryError::type_mismatch("REG_MULTI_SZ", other.type_name())),
    }
}

/// Decodes a single NUL-terminated UTF-16LE string, stripping at most one
/// trailing NUL code unit.
fn decode_sz(data: &[u8], offset: u32) -> Result<String> {
    let trimmed = if data.len() >= 2 && data[data.len() - 2..] == [0, 0] {
        &data[..data.len() - 2]
    } else {
        data
    };
    let (decoded, _encoding, had_errors) = UTF_16LE.decode(trimmed);
    if had_errors {
        return Err(RegistryError::InvalidUtf16 { offset });
    }
    Ok(decoded.into_owned())
}

fn encode_sz(s: &str) -> Vec<u8> {
    let mut bytes: Vec<u8> = s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect();
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

/// Splits a `REG_MULTI_SZ` blob on NUL code units, dropping the empty
/// terminator left by the final double-NUL.
fn decode_multi_sz(data: &[u8], offset: u32) -> Result<Vec<String>> {
    let (decoded, _encoding, had_errors) = UTF_16LE.decode(data);
    if had_errors {
        return Err(RegistryError::InvalidUtf16 { offset });
    }
    Ok(decoded
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect())
}

fn encode_multi_sz(strings: &[String]) -> Vec<u8> {
    let mut bytes = Vec::new();
    for s in strings {
        bytes.extend(s.encode_utf16().flat_map(|u| u.to_le_bytes()));
        bytes.extend_from_slice(&[0, 0]);
    }
    bytes.extend_from_slice(&[0, 0]);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_key_minimum_size() {
        let data = vec![0u8; 19];
        let result = ValueKey::parse(&data, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_value_key_invalid_signature() {
        let mut data = vec![0u8; 24];
        data[0..2].copy_from_slice(b"XX");
        let result = ValueKey::parse(&data, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_inline_data() {
        let mut data = vec![0u8; 24];
        data[0..2].copy_from_slice(b"vk");
        data[4] = 4;
        data[8..12].copy_from_slice(&[0x01, 0x02, 0x03, 0x04]);

        let vk = ValueKey::parse(&data, 0).unwrap();
        assert!(vk.is_inline_data());
        assert_eq!(vk.inline_data(), vec![0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn vk_encode_roundtrips_name_and_type() {
        let vk = ValueKey {
            data_length: 8,
            data_offset: 0x500,
            data_type: ValueType::Qword,
            flags: 0,
            name: "Version".to_string(),
        };
        let encoded = vk.encode();
        let parsed = ValueKey::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.name, "Version");
        assert_eq!(parsed.data_type, ValueType::Qword);
        assert_eq!(parsed.data_length, 8);
    }

    #[test]
    fn sz_roundtrip_via_value_data() {
        let (bytes, ty) = ValueData::String("hello".into()).encode();
        assert_eq!(ty, ValueType::String);
        let decoded = ValueData::parse(&bytes, ty, 0).unwrap();
        assert_eq!(as_sz(&decoded).unwrap(), "hello");
    }

    #[test]
    fn multi_sz_roundtrip_drops_terminator() {
        let strings = vec!["a".to_string(), "bb".to_string()];
        let (bytes, ty) = ValueData::MultiString(strings.clone()).encode();
        let decoded = ValueData::parse(&bytes, ty, 0).unwrap();
        assert_eq!(as_multi_sz(&decoded).unwrap(), strings.as_slice());
    }

    #[test]
    fn dword_type_mismatch() {
        let decoded = ValueData::String("x".into());
        let err = as_dword(&decoded).unwrap_err();
        assert!(matches!(err, RegistryError::TypeMismatch { .. }));
    }
}
