//! Subkey list parsing and encoding (lf, lh, li, ri).
//!
//! Registry keys can have multiple subkeys, which are organized in various
//! list structures for efficient lookup.

use crate::error::{RegistryError, Result};
use crate::utils::read_u32_le;

/// Subkey list types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// Index leaf (li) - simple list of offsets.
    IndexLeaf,

    /// Fast leaf (lf) - list with 4-byte name hints.
    FastLeaf,

    /// Hash leaf (lh) - list with case-folded-name hash.
    HashLeaf,

    /// Index root (ri) - list of subkey list offsets.
    IndexRoot,
}

impl SubkeyListType {
    /// Parses a subkey list type from a 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Result<Self> {
        match sig {
            b"li" => Ok(SubkeyListType::IndexLeaf),
            b"lf" => Ok(SubkeyListType::FastLeaf),
            b"lh" => Ok(SubkeyListType::HashLeaf),
            b"ri" => Ok(SubkeyListType::IndexRoot),
            _ => Err(RegistryError::InvalidSubkeyList { list_type: *sig }),
        }
    }

    /// Returns the 2-byte on-disk signature for this list type.
    pub fn signature(self) -> &'static [u8; 2] {
        match self {
            SubkeyListType::IndexLeaf => b"li",
            SubkeyListType::FastLeaf => b"lf",
            SubkeyListType::HashLeaf => b"lh",
            SubkeyListType::IndexRoot => b"ri",
        }
    }
}

/// Subkey list entry (for lf/lh lists).
#[derive(Debug, Clone)]
pub struct SubkeyListEntry {
    /// Offset to the key node.
    pub key_offset: u32,

    /// Name hint: first-4-ASCII-bytes for `lf`, polynomial hash for `lh`.
    pub name_hint: u32,
}

/// Parsed subkey list.
#[derive(Debug, Clone)]
pub enum SubkeyList {
    /// Index leaf - simple list of offsets.
    IndexLeaf(Vec<u32>),

    /// Fast leaf or hash leaf - list with hints.
    LeafWithHints(SubkeyListType, Vec<SubkeyListEntry>),

    /// Index root - list of sublist offsets.
    IndexRoot(Vec<u32>),
}

impl SubkeyList {
    /// Parses a subkey list from cell data.
    ///
    /// # Arguments
    ///
    /// * `data` - Cell data (excluding size field).
    /// * `offset` - Offset of this cell for error reporting.
    pub fn parse(data: &[u8], offset: u32) -> Result<Self> {
        if data.len() < 4 {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len(),
            });
        }

        let sig = [data[0], data[1]];
        let list_type = SubkeyListType::from_signature(&sig)?;

        let count = u16::from_le_bytes([data[2], data[3]]) as usize;

        match list_type {
            SubkeyListType::IndexLeaf => {
                let expected_size = 4 + (count * 4);
                if data.len() < expected_size {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }

                let mut offsets = Vec::with_capacity(count);
                for i in 0..count {
                    offsets.push(read_u32_le(data, 4 + i * 4)?);
                }

                Ok(SubkeyList::IndexLeaf(offsets))
            }

            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => {
                let expected_size = 4 + (count * 8);
                if data.len() < expected_size {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }

                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let entry_pos = 4 + i * 8;
                    let key_offset = read_u32_le(data, entry_pos)?;
                    let name_hint = read_u32_le(data, entry_pos + 4)?;
                    entries.push(SubkeyListEntry { key_offset, name_hint });
                }

                Ok(SubkeyList::LeafWithHints(list_type, entries))
            }

            SubkeyListType::IndexRoot => {
                let expected_size = 4 + (count * 4);
                if data.len() < expected_size {
                    return Err(RegistryError::TruncatedData {
                        offset,
                        expected: expected_size,
                        actual: data.len(),
                    });
                }

                let mut offsets = Vec::with_capacity(count);
                for i in 0..count {
                    offsets.push(read_u32_le(data, 4 + i * 4)?);
                }

                Ok(SubkeyList::IndexRoot(offsets))
            }
        }
    }

    /// Encodes this list back to its on-disk cell body.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            SubkeyList::IndexLeaf(offsets) => encode_offset_list(b"li", offsets),
            SubkeyList::IndexRoot(offsets) => encode_offset_list(b"ri", offsets),
            SubkeyList::LeafWithHints(list_type, entries) => {
                let mut buf = Vec::with_capacity(4 + entries.len() * 8);
                buf.extend_from_slice(list_type.signature());
                buf.extend_from_slice(&(entries.len() as u16).to_le_bytes());
                for entry in entries {
                    buf.extend_from_slice(&entry.key_offset.to_le_bytes());
                    buf.extend_from_slice(&entry.name_hint.to_le_bytes());
                }
                buf
            }
        }
    }

    /// Returns all key offsets from this list.
    ///
    /// For `IndexRoot` lists, this only returns the sublist offsets, not the
    /// actual key offsets; use [`SubkeyList::key_offsets_iter`] for that.
    pub fn key_offsets(&self) -> &[u32] {
        match self {
            SubkeyList::IndexLeaf(offsets) => offsets,
            SubkeyList::IndexRoot(offsets) => offsets,
            SubkeyList::LeafWithHints(_, _) => &[],
        }
    }

    /// Returns an iterator over key offsets, avoiding an allocation for the
    /// `LeafWithHints` case.
    pub fn key_offsets_iter(&self) -> impl Iterator<Item = u32> + '_ {
        match self {
            SubkeyList::IndexLeaf(offsets) => {
                Box::new(offsets.iter().copied()) as Box<dyn Iterator<Item = u32> + '_>
            }
            SubkeyList::LeafWithHints(_, entries) => Box::new(entries.iter().map(|e| e.key_offset)),
            SubkeyList::IndexRoot(offsets) => Box::new(offsets.iter().copied()),
        }
    }

    /// Returns the number of entries in this list.
    pub fn len(&self) -> usize {
        match self {
            SubkeyList::IndexLeaf(offsets) => offsets.len(),
            SubkeyList::LeafWithHints(_, entries) => entries.len(),
            SubkeyList::IndexRoot(offsets) => offsets.len(),
        }
    }

    /// Returns true if this list is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if this is an index root (contains sublists).
    pub fn is_index_root(&self) -> bool {
        matches!(self, SubkeyList::IndexRoot(_))
    }
}

fn encode_offset_list(sig: &[u8; 2], offsets: &[u32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + offsets.len() * 4);
    buf.extend_from_slice(sig);
    buf.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
    for offset in offsets {
        buf.extend_from_slice(&offset.to_le_bytes());
    }
    buf
}

/// Maximum number of direct leaf entries before the writer must split into
/// an `ri` root pointing at multiple leaf cells.
pub const MAX_LEAF_ENTRIES: usize = 1019;

/// Partitions a sorted `(offset, hint)` entry list into chunks no larger
/// than [`MAX_LEAF_ENTRIES`], the shape the writer needs when building the
/// leaves underneath a fresh `ri` root.
pub fn chunk_entries(entries: &[SubkeyListEntry]) -> Vec<&[SubkeyListEntry]> {
    entries.chunks(MAX_LEAF_ENTRIES).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subkey_list_type() {
        assert_eq!(SubkeyListType::from_signature(b"li").unwrap(), SubkeyListType::IndexLeaf);
        assert_eq!(SubkeyListType::from_signature(b"lf").unwrap(), SubkeyListType::FastLeaf);
        assert_eq!(SubkeyListType::from_signature(b"lh").unwrap(), SubkeyListType::HashLeaf);
        assert_eq!(SubkeyListType::from_signature(b"ri").unwrap(), SubkeyListType::IndexRoot);
    }

    #[test]
    fn test_invalid_signature() {
        let result = SubkeyListType::from_signature(b"XX");
        assert!(result.is_err());
    }

    #[test]
    fn li_roundtrips() {
        let list = SubkeyList::IndexLeaf(vec![0x20, 0x80, 0x140]);
        let encoded = list.encode();
        let parsed = SubkeyList::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.key_offsets(), &[0x20, 0x80, 0x140]);
    }

    #[test]
    fn lh_roundtrips() {
        let list = SubkeyList::LeafWithHints(
            SubkeyListType::HashLeaf,
            vec![
                SubkeyListEntry { key_offset: 0x20, name_hint: 0xDEADBEEF },
                SubkeyListEntry { key_offset: 0x80, name_hint: 0x1234 },
            ],
        );
        let encoded = list.encode();
        assert_eq!(&encoded[0..2], b"lh");
        let parsed = SubkeyList::parse(&encoded, 0).unwrap();
        assert_eq!(parsed.key_offsets_iter().collect::<Vec<_>>(), vec![0x20, 0x80]);
    }

    #[test]
    fn ri_roundtrips() {
        let list = SubkeyList::IndexRoot(vec![0x1020, 0x2020]);
        let encoded = list.encode();
        let parsed = SubkeyList::parse(&encoded, 0).unwrap();
        assert!(parsed.is_index_root());
        assert_eq!(parsed.key_offsets(), &[0x1020, 0x2020]);
    }

    #[test]
    fn chunk_entries_splits_at_threshold() {
        let entries: Vec<SubkeyListEntry> = (0..2500)
            .map(|i| SubkeyListEntry { key_offset: i, name_hint: 0 })
            .collect();
        let chunks = chunk_entries(&entries);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), MAX_LEAF_ENTRIES);
        assert_eq!(chunks[2].len(), 2500 - 2 * MAX_LEAF_ENTRIES);
    }
}
