//! Registry key node (nk) parsing and representation.

use crate::cell::KeyNodeFlags;
use crate::error::{RegistryError, Result};
use crate::name::{decode_name, encode_name};
use crate::utils::{read_u16_le, read_u32_le};

/// Minimum size of a key node structure in bytes.
const KEY_NODE_MIN_SIZE: usize = 76;

/// Offset of the key name in the key node structure.
const KEY_NAME_OFFSET: usize = 0x4C;

/// Key node (nk) structure.
///
/// Represents a registry key with metadata including name, timestamps,
/// and references to subkeys and values.
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Flags for this key.
    pub flags: KeyNodeFlags,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Access bits (unused).
    pub access_bits: u32,

    /// Offset to parent key node.
    pub parent_offset: u32,

    /// Number of subkeys.
    pub subkey_count: u32,

    /// Number of volatile subkeys.
    pub volatile_subkey_count: u32,

    /// Offset to subkey list.
    pub subkey_list_offset: u32,

    /// Offset to volatile subkey list.
    pub volatile_subkey_list_offset: u32,

    /// Number of values.
    pub value_count: u32,

    /// Offset to value list.
    pub value_list_offset: u32,

    /// Offset to security descriptor.
    pub security_offset: u32,

    /// Offset to class name. Read-only: this crate never edits class names,
    /// it only preserves the offset/length pair found on disk.
    pub class_name_offset: u32,

    /// Maximum length of subkey name.
    pub max_subkey_name_len: u32,

    /// Maximum length of subkey class name.
    pub max_subkey_class_len: u32,

    /// Maximum length of value name.
    pub max_value_name_len: u32,

    /// Maximum length of value data.
    pub max_value_data_len: u32,

    /// Work variable (unused).
    pub work_var: u32,

    /// Length of class name, in bytes on disk.
    pub class_name_length: u16,

    /// Key name.
    pub name: String,
}

impl KeyNode {
    /// Parses a key node from cell data.
    ///
    /// # Arguments
    ///
    /// * `data` - Cell data (excluding size field, starting with "nk" signature).
    /// * `offset` - Offset of this cell for error reporting.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < KEY_NODE_MIN_SIZE {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: KEY_NODE_MIN_SIZE,
                actual: data.len(),
            });
        }

        if &data[0..2] != b"nk" {
            return Err(RegistryError::malformed_record(
                offset,
                format!("expected 'nk' signature, found {:?}", &data[0..2]),
            ));
        }

        let flags = KeyNodeFlags::new(read_u16_le(data, 0x02)?);

        let last_written = u64::from(read_u32_le(data, 0x04)?)
            | (u64::from(read_u32_le(data, 0x08)?) << 32);

        let access_bits = read_u32_le(data, 0x0C)?;
        let parent_offset = read_u32_le(data, 0x10)?;
        let subkey_count = read_u32_le(data, 0x14)?;
        let volatile_subkey_count = read_u32_le(data, 0x18)?;
        let subkey_list_offset = read_u32_le(data, 0x1C)?;
        let volatile_subkey_list_offset = read_u32_le(data, 0x20)?;
        let value_count = read_u32_le(data, 0x24)?;
        let value_list_offset = read_u32_le(data, 0x28)?;
        let security_offset = read_u32_le(data, 0x2C)?;
        let class_name_offset = read_u32_le(data, 0x30)?;

        let max_subkey_name_len = read_u32_le(data, 0x34)?;
        let max_subkey_class_len = read_u32_le(data, 0x38)?;
        let max_value_name_len = read_u32_le(data, 0x3C)?;
        let max_value_data_len = read_u32_le(data, 0x40)?;
        let work_var = read_u32_le(data, 0x44)?;

        let name_length = read_u16_le(data, 0x48)?;
        let class_name_length = read_u16_le(data, 0x4A)?;

        let name = if name_length > 0 {
            let name_end = KEY_NAME_OFFSET + name_length as usize;
            if name_end > data.len() {
                return Err(RegistryError::TruncatedData {
                    offset,
                    expected: name_end,
                    actual: data.len(),
                });
            }
            decode_name(&data[KEY_NAME_OFFSET..name_end], flags.is_compressed(), offset)?
        } else {
            String::new()
        };

        Ok(KeyNode {
            flags,
            last_written,
            access_bits,
            parent_offset,
            subkey_count,
            volatile_subkey_count,
            subkey_list_offset,
            volatile_subkey_list_offset,
            value_count,
            value_list_offset,
            security_offset,
            class_name_offset,
            max_subkey_name_len,
            max_subkey_class_len,
            max_value_name_len,
            max_value_data_len,
            work_var,
            class_name_length,
            name,
        })
    }

    /// Encodes this key node back to its on-disk cell body, re-deriving the
    /// compressed-name flag and name length/bytes from `self.name`.
    ///
    /// Volatile-subkey bookkeeping is always zeroed: a committed hive never
    /// carries volatile children forward.
    pub fn encode(&self) -> Vec<u8> {
        let (name_bytes, compressed) = encode_name(&self.name);
        let mut flags = self.flags.0;
        if compressed {
            flags |= KeyNodeFlags::COMP_NAME;
        } else {
            flags &= !KeyNodeFlags::COMP_NAME;
        }

        let mut buf = vec![0u8; KEY_NODE_MIN_SIZE + name_bytes.len()];
        buf[0..2].copy_from_slice(b"nk");
        buf[0x02..0x04].copy_from_slice(&flags.to_le_bytes());
        buf[0x04..0x08].copy_from_slice(&(self.last_written as u32).to_le_bytes());
        buf[0x08..0x0C].copy_from_slice(&((self.last_written >> 32) as u32).to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&self.access_bits.to_le_bytes());
        buf[0x10..0x14].copy_from_slice(&self.parent_offset.to_le_bytes());
        buf[0x14..0x18].copy_from_slice(&self.subkey_count.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&0u32.to_le_bytes());
        buf[0x1C..0x20].copy_from_slice(&self.subkey_list_offset.to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        buf[0x24..0x28].copy_from_slice(&self.value_count.to_le_bytes());
        buf[0x28..0x2C].copy_from_slice(&self.value_list_offset.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&self.security_offset.to_le_bytes());
        buf[0x30..0x34].copy_from_slice(&self.class_name_offset.to_le_bytes());
        buf[0x34..0x38].copy_from_slice(&self.max_subkey_name_len.to_le_bytes());
        buf[0x38..0x3C].copy_from_slice(&self.max_subkey_class_len.to_le_bytes());
        buf[0x3C..0x40].copy_from_slice(&self.max_value_name_len.to_le_bytes());
        buf[0x40..0x44].copy_from_slice(&self.max_value_data_len.to_le_bytes());
        buf[0x44..0x48].copy_from_slice(&self.work_var.to_le_bytes());
        buf[0x48..0x4A].copy_from_slice(&(name_bytes.len() as u16).to_le_bytes());
        buf[0x4A..0x4C].copy_from_slice(&self.class_name_length.to_le_bytes());
        buf[KEY_NAME_OFFSET..KEY_NAME_OFFSET + name_bytes.len()].copy_from_slice(&name_bytes);
        buf
    }

    /// Returns true if this key has subkeys.
    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0
    }

    /// Returns true if this key has values.
    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }

    /// Returns true if this key is volatile and should not survive a commit.
    pub fn is_volatile(&self) -> bool {
        self.flags.is_volatile()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_node_minimum_size() {
        let data = vec![0u8; 75];
        let result = KeyNode::parse(&data, 0);
        assert!(result.is_err());
    }

    #[test]
    fn test_key_node_invalid_signature() {
        let mut data = vec![0u8; 80];
        data[0..2].copy_from_slice(b"XX");
        let result = KeyNode::parse(&data, 0);
        assert!(result.is_err());
    }

    fn sample_key(name: &str) -> KeyNode {
        KeyNode {
            flags: KeyNodeFlags::new(KeyNodeFlags::COMP_NAME),
            last_written: 0,
            access_bits: 0,
            parent_offset: 0x20,
            subkey_count: 0,
            volatile_subkey_count: 0,
            subkey_list_offset: 0xFFFF_FFFF,
            volatile_subkey_list_offset: 0xFFFF_FFFF,
            value_count: 0,
            value_list_offset: 0xFFFF_FFFF,
            security_offset: 0xFFFF_FFFF,
            class_name_offset: 0xFFFF_FFFF,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            work_var: 0,
            class_name_length: 0,
            name: name.to_string(),
        }
    }

    #[test]
    fn encode_then_parse_roundtrips_ascii_name() {
        let key = sample_key("Software");
        let encoded = key.encode();
        let parsed = KeyNode::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.name, "Software");
        assert!(parsed.flags.is_compressed());
    }

    #[test]
    fn encode_then_parse_roundtrips_wide_name() {
        let key = sample_key("weird\u{2122}name");
        let encoded = key.encode();
        let parsed = KeyNode::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.name, "weird\u{2122}name");
        assert!(!parsed.flags.is_compressed());
    }

    #[test]
    fn encode_zeroes_volatile_bookkeeping() {
        let mut key = sample_key("k");
        key.volatile_subkey_count = 3;
        let encoded = key.encode();
        let parsed = KeyNode::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.volatile_subkey_count, 0);
        assert_eq!(parsed.volatile_subkey_list_offset, 0xFFFF_FFFF);
    }
}
