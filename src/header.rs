//! Registry hive base block (header) parsing and encoding.
//!
//! The base block is the first 4096 bytes (0x1000) of a registry hive file.
//! It contains metadata about the hive including version, timestamps, and
//! the root key cell offset.

use crate::error::{RegistryError, Result};
use crate::utils::{calculate_checksum, read_fixed_ascii, read_u32_le};
use std::fmt;

/// Size of the base block in bytes.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Expected signature for a valid registry hive ("regf").
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

/// Offset of the file name in the base block.
const FILE_NAME_OFFSET: usize = 0x30;

/// Length of the file name field (64 UTF-16LE characters = 128 bytes).
const FILE_NAME_LENGTH: usize = 128;

/// Offset of the checksum field in the base block.
const CHECKSUM_OFFSET: usize = 0x1FC;

/// Registry hive base block header.
///
/// This structure represents the first 4KB of a registry hive file and contains
/// critical metadata about the hive.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    /// Signature, should be "regf" (0x66676572).
    pub signature: [u8; 4],

    /// Primary sequence number.
    pub primary_sequence: u32,

    /// Secondary sequence number.
    pub secondary_sequence: u32,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Major version of the hive format.
    pub major_version: u32,

    /// Minor version of the hive format.
    pub minor_version: u32,

    /// File type (0 = normal, 1 = transaction log).
    pub file_type: u32,

    /// File format (1 = direct memory load).
    pub file_format: u32,

    /// Offset to root key cell (relative to first hbin).
    pub root_cell_offset: u32,

    /// Length of hive-bins data in bytes (sum of all hbin sizes).
    pub hive_length: u32,

    /// Clustering factor (always 1).
    pub clustering_factor: u32,

    /// File name (embedded, 64 UTF-16LE characters).
    pub file_name: String,

    /// Checksum (XOR of the first 127 little-endian dwords).
    pub checksum: u32,
}

impl BaseBlock {
    /// Parses a base block from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature is invalid,
    /// the checksum doesn't match, or the version is unsupported. Sequence
    /// number agreement is the caller's responsibility (see
    /// [`BaseBlock::is_consistent`]); `Hive::open` rejects a disagreeing pair
    /// since log replay is out of scope for this crate.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        // Read signature
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&data[0..4]);

        if &signature != REGF_SIGNATURE {
            return Err(RegistryError::invalid_signature(REGF_SIGNATURE, &signature));
        }

        // Parse header fields
        let primary_sequence = read_u32_le(data, 0x04)?;
        let secondary_sequence = read_u32_le(data, 0x08)?;

        // Last written timestamp (8 bytes at offset 0x0C)
        let last_written = u64::from(read_u32_le(data, 0x0C)?)
            | (u64::from(read_u32_le(data, 0x10)?) << 32);

        let major_version = read_u32_le(data, 0x14)?;
        let minor_version = read_u32_le(data, 0x18)?;
        let file_type = read_u32_le(data, 0x1C)?;
        let file_format = read_u32_le(data, 0x20)?;
        let root_cell_offset = read_u32_le(data, 0x24)?;
        let hive_length = read_u32_le(data, 0x28)?;
        let clustering_factor = read_u32_le(data, 0x2C)?;

        // File name at offset 0x30 (64 UTF-16LE characters = 128 bytes)
        let file_name_bytes = &data[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH];
        let file_name = read_fixed_ascii(file_name_bytes, 64);

        // Checksum at offset 0x1FC
        let checksum = read_u32_le(data, CHECKSUM_OFFSET)?;

        // Verify checksum
        let calculated = calculate_checksum(data);
        if checksum != calculated {
            return Err(RegistryError::ChecksumMismatch {
                expected: checksum,
                calculated,
            });
        }

        // Verify version (support 1.3, 1.4, 1.5, 1.6)
        if major_version != 1 || minor_version < 3 || minor_version > 6 {
            return Err(RegistryError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        Ok(BaseBlock {
            signature,
            primary_sequence,
            secondary_sequence,
            last_written,
            major_version,
            minor_version,
            file_type,
            file_format,
            root_cell_offset,
            hive_length,
            clustering_factor,
            file_name,
            checksum,
        })
    }

    /// Returns true if the hive is in a consistent state.
    ///
    /// The hive is consistent when primary and secondary sequence numbers
    /// match; a mismatch means the hive has unreplayed transaction log
    /// entries, which this crate does not recover (see the Non-goals).
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Converts the last written timestamp to a calendar time.
    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        crate::utils::filetime_to_datetime(self.last_written)
    }

    /// Encodes this header back to a 4096-byte base block, recomputing the
    /// checksum. Used by the writer when committing a new hive image.
    pub fn encode(&self) -> [u8; BASE_BLOCK_SIZE] {
        let mut buf = [0u8; BASE_BLOCK_SIZE];
        buf[0..4].copy_from_slice(&self.signature);
        buf[0x04..0x08].copy_from_slice(&self.primary_sequence.to_le_bytes());
        buf[0x08..0x0C].copy_from_slice(&self.secondary_sequence.to_le_bytes());
        buf[0x0C..0x10].copy_from_slice(&(self.last_written as u32).to_le_bytes());
        buf[0x10..0x14].copy_from_slice(&((self.last_written >> 32) as u32).to_le_bytes());
        buf[0x14..0x18].copy_from_slice(&self.major_version.to_le_bytes());
        buf[0x18..0x1C].copy_from_slice(&self.minor_version.to_le_bytes());
        buf[0x1C..0x20].copy_from_slice(&self.file_type.to_le_bytes());
        buf[0x20..0x24].copy_from_slice(&self.file_format.to_le_bytes());
        buf[0x24..0x28].copy_from_slice(&self.root_cell_offset.to_le_bytes());
        buf[0x28..0x2C].copy_from_slice(&self.hive_length.to_le_bytes());
        buf[0x2C..0x30].copy_from_slice(&self.clustering_factor.to_le_bytes());

        let name_units: Vec<u16> = self.file_name.encode_utf16().collect();
        for (i, slot) in buf[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH]
            .chunks_mut(2)
            .enumerate()
        {
            if let Some(&unit) = name_units.get(i) {
                slot.copy_from_slice(&unit.to_le_bytes());
            }
        }

        let checksum = calculate_checksum(&buf);
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        buf
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Hive Header:\n\
             - Version: {}.{}\n\
             - Root Cell Offset: {:#x}\n\
             - Hive Length: {} bytes\n\
             - Consistent: {}\n\
             - File Name: {}",
            self.major_version,
            self.minor_version,
            self.root_cell_offset,
            self.hive_length,
            self.is_consistent(),
            self.file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_block_size() {
        assert_eq!(BASE_BLOCK_SIZE, 4096);
    }

    #[test]
    fn test_invalid_signature() {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(b"XXXX");

        let result = BaseBlock::parse(&data);
        assert!(result.is_err());
        assert!(matches!(
            result.unwrap_err(),
            RegistryError::InvalidSignature { .. }
        ));
    }

    #[test]
    fn test_too_small() {
        let data = vec![0u8; 100];
        let result = BaseBlock::parse(&data);
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), RegistryError::HiveTooSmall { .. }));
    }

    fn minimal_header() -> Vec<u8> {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(REGF_SIGNATURE);
        data[0x04..0x08].copy_from_slice(&1u32.to_le_bytes()); // primary seq
        data[0x08..0x0C].copy_from_slice(&1u32.to_le_bytes()); // secondary seq
        data[0x14..0x18].copy_from_slice(&1u32.to_le_bytes()); // major
        data[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes()); // minor
        data[0x24..0x28].copy_from_slice(&0x20u32.to_le_bytes()); // root offset
        data[0x28..0x2C].copy_from_slice(&0x1000u32.to_le_bytes()); // hive length
        let checksum = calculate_checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        data
    }

    #[test]
    fn test_parse_minimal_header() {
        let data = minimal_header();
        let header = BaseBlock::parse(&data).unwrap();
        assert!(header.is_consistent());
        assert_eq!(header.root_cell_offset, 0x20);
        assert_eq!(header.hive_length, 0x1000);
    }

    #[test]
    fn test_encode_then_parse_roundtrips() {
        let data = minimal_header();
        let header = BaseBlock::parse(&data).unwrap();
        let encoded = header.encode();
        let reparsed = BaseBlock::parse(&encoded).unwrap();
        assert_eq!(reparsed.root_cell_offset, header.root_cell_offset);
        assert_eq!(reparsed.hive_length, header.hive_length);
        assert_eq!(reparsed.checksum, calculate_checksum(&encoded));
    }

    #[test]
    fn test_sequence_mismatch_is_detectable() {
        let mut data = minimal_header();
        data[0x08..0x0C].copy_from_slice(&2u32.to_le_bytes()); // secondary seq differs
        let checksum = calculate_checksum(&data);
        data[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        let header = BaseBlock::parse(&data).unwrap();
        assert!(!header.is_consistent());
    }
}
