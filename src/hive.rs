//! Immutable read-side access to a registry hive image.
//!
//! [`Hive`] wraps a byte image (memory-mapped or owned) and exposes pure
//! navigation and typed-decoding operations over it. Nothing here mutates
//! the image; transactional edits go through [`crate::editor`].

use crate::bigdata::BigDataBlock;
use crate::cell::ValueType;
use crate::error::{RegistryError, Result};
use crate::hbin::HbinHeader;
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::key::KeyNode;
use crate::subkey_list::SubkeyList;
use crate::utils::{cell_offset_to_absolute, lf_name_hint, lh_name_hash, names_equal_fold};
use crate::value::{self, ValueData, ValueKey};
use memmap2::Mmap;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};

/// Maximum size of a value stored directly in a cell before the big-data
/// (`db`) segmented layout is used.
const MAX_DIRECT_DATA_SIZE: u32 = 16_344;

/// Sentinel used in on-disk offset fields to mean "absent".
const NO_OFFSET: u32 = 0xFFFF_FFFF;

/// Immutable registry hive image.
///
/// Provides read-only access to a Windows registry hive file, backed by
/// either a memory map or an owned byte buffer. A small cache of parsed
/// key nodes avoids re-decoding the same cell across repeated traversals.
pub struct Hive {
    data: HiveData,
    base_block: BaseBlock,
    key_cache: RwLock<HashMap<u32, KeyNode>>,
}

/// Backing storage for hive bytes.
enum HiveData {
    Mapped(Mmap),
    Owned(Arc<Vec<u8>>),
}

impl HiveData {
    fn as_slice(&self) -> &[u8] {
        match self {
            HiveData::Mapped(mmap) => mmap,
            HiveData::Owned(data) => data,
        }
    }

    fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }
}

impl Hive {
    /// Opens a registry hive file by memory-mapping it read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened, is smaller than a
    /// base block, fails checksum validation, or has mismatched primary and
    /// secondary sequence numbers (unreplayed transaction log entries,
    /// which this crate does not recover).
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        info!("opening registry hive");
        let file = File::open(&path)?;
        let file_size = file.metadata()?.len() as usize;

        if file_size < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: file_size,
                minimum: BASE_BLOCK_SIZE,
            });
        }

        // SAFETY: the file is opened read-only and kept alive for as long as
        // the mapping; all subsequent access is bounds-checked in read_cell.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!(size = mmap.len(), "memory mapped hive file");

        Self::from_data(HiveData::Mapped(mmap))
    }

    /// Builds a hive from an already-mapped region.
    pub fn from_mmap(mmap: Mmap) -> Result<Self> {
        Self::from_data(HiveData::Mapped(mmap))
    }

    /// Builds a hive from an owned byte buffer, e.g. one produced by
    /// [`crate::writer`] before it is persisted.
    pub fn from_vec(data: Vec<u8>) -> Result<Self> {
        Self::from_data(HiveData::Owned(Arc::new(data)))
    }

    fn from_data(data: HiveData) -> Result<Self> {
        let base_block = BaseBlock::parse(data.as_slice())?;
        if !base_block.is_consistent() {
            return Err(RegistryError::SequenceMismatch {
                primary: base_block.primary_sequence,
                secondary: base_block.secondary_sequence,
            });
        }

        Ok(Self {
            data,
            base_block,
            key_cache: RwLock::new(HashMap::new()),
        })
    }

    /// Returns a reference to the parsed base block.
    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Returns the root key.
    #[instrument(skip(self))]
    pub fn root(&self) -> Result<RegistryKey<'_>> {
        self.get_key(self.base_block.root_cell_offset)
    }

    /// Gets a key node by its cell offset, consulting and populating the
    /// internal cache.
    pub fn get_key(&self, offset: u32) -> Result<RegistryKey<'_>> {
        if let Some(key_node) = self.key_cache.read().expect("key cache lock poisoned").get(&offset) {
            return Ok(RegistryKey { hive: self, offset, key_node: key_node.clone() });
        }

        let key_node = self.parse_key_node(offset)?;
        self.key_cache
            .write()
            .expect("key cache lock poisoned")
            .insert(offset, key_node.clone());

        Ok(RegistryKey { hive: self, offset, key_node })
    }

    fn parse_key_node(&self, offset: u32) -> Result<KeyNode> {
        KeyNode::parse(self.read_cell(offset)?, offset)
    }

    /// Reads a cell's body (excluding the 4-byte size prefix) at `offset`.
    fn read_cell(&self, offset: u32) -> Result<&[u8]> {
        let abs_offset = cell_offset_to_absolute(offset)? as usize;
        let data = self.data.as_slice();

        if abs_offset + 4 > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: 4,
                actual: data.len().saturating_sub(abs_offset),
            });
        }

        let size_bytes = &data[abs_offset..abs_offset + 4];
        let size = i32::from_le_bytes([size_bytes[0], size_bytes[1], size_bytes[2], size_bytes[3]]);

        // An allocated cell always carries a negative size; zero, a
        // positive (free-cell) size, a total size under 8 bytes, or one
        // not a multiple of 8 can never be a valid live record.
        if size >= 0 || size.unsigned_abs() < 8 || size.unsigned_abs() % 8 != 0 {
            return Err(RegistryError::invalid_cell_size(size, offset));
        }
        let abs_size = size.unsigned_abs() as usize;

        let data_start = abs_offset + 4;
        let data_end = abs_offset + abs_size;

        if data_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset,
                expected: abs_size,
                actual: data.len().saturating_sub(abs_offset),
            });
        }

        Ok(&data[data_start..data_end])
    }

    fn parse_subkey_list(&self, offset: u32) -> Result<SubkeyList> {
        SubkeyList::parse(self.read_cell(offset)?, offset)
    }

    fn parse_value_key(&self, offset: u32) -> Result<ValueKey> {
        ValueKey::parse(self.read_cell(offset)?, offset)
    }

    /// Resolves value data, transparently handling inline, flat-cell, and
    /// big-data (`db`) storage.
    fn read_value_data(&self, offset: u32, length: u32) -> Result<Vec<u8>> {
        if length == 0 {
            return Ok(Vec::new());
        }
        if length > MAX_DIRECT_DATA_SIZE {
            return self.read_big_data(offset, length);
        }
        Ok(self.read_cell(offset)?.to_vec())
    }

    fn read_big_data(&self, offset: u32, expected_length: u32) -> Result<Vec<u8>> {
        let header_cell = self.read_cell(offset)?;
        let db_header = BigDataBlock::parse(header_cell, offset)?;

        let segment_list_cell = self.read_cell(db_header.segment_list_offset)?;
        let expected_list_size = db_header.segment_count as usize * 4;
        if segment_list_cell.len() < expected_list_size {
            return Err(RegistryError::TruncatedData {
                offset: db_header.segment_list_offset,
                expected: expected_list_size,
                actual: segment_list_cell.len(),
            });
        }

        let mut segment_offsets = Vec::with_capacity(db_header.segment_count as usize);
        for i in 0..db_header.segment_count {
            let pos = i as usize * 4;
            let raw = u32::from_le_bytes([
                segment_list_cell[pos],
                segment_list_cell[pos + 1],
                segment_list_cell[pos + 2],
                segment_list_cell[pos + 3],
            ]);
            segment_offsets.push(raw & 0x7FFF_FFFF);
        }

        let mut data = Vec::with_capacity(expected_length as usize);
        for segment_offset in &segment_offsets {
            data.extend_from_slice(self.read_cell(*segment_offset)?);
            if data.len() >= expected_length as usize {
                break;
            }
        }
        data.truncate(expected_length as usize);
        Ok(data)
    }

    /// Iterates over all hbins in the hive.
    pub fn hbins(&self) -> HbinIterator<'_> {
        let data = self.data.as_slice();
        HbinIterator { data: &data[BASE_BLOCK_SIZE..], offset: 0 }
    }

    /// Returns a byte copy of the full hive image, including the base
    /// block. Used by the writer to clone a base image into an overlay.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.data.to_vec()
    }
}

/// Iterator over hbins in a hive.
pub struct HbinIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for HbinIterator<'a> {
    type Item = Result<HbinHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let hbin_data = &self.data[self.offset..];
        match HbinHeader::parse(hbin_data, self.offset as u32) {
            Ok(header) => {
                self.offset += header.size as usize;
                Some(Ok(header))
            }
            Err(RegistryError::InvalidSignature { .. }) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// A registry key bound to its owning hive.
pub struct RegistryKey<'a> {
    hive: &'a Hive,
    /// Cell offset of this key, relative to the first hbin.
    pub offset: u32,
    key_node: KeyNode,
}

impl<'a> RegistryKey<'a> {
    fn key_node(&self) -> &KeyNode {
        &self.key_node
    }

    /// Returns the key name.
    pub fn name(&self) -> &str {
        &self.key_node().name
    }

    /// Returns the cached subkey count without traversing the index.
    pub fn num_subkeys(&self) -> u32 {
        self.key_node().subkey_count
    }

    /// Returns the cached value count without traversing the value list.
    pub fn num_values(&self) -> u32 {
        self.key_node().value_count
    }

    /// Returns the key's last-written FILETIME.
    pub fn last_written(&self) -> u64 {
        self.key_node().last_written
    }

    /// Returns the key's last-written time as a calendar timestamp.
    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        crate::utils::filetime_to_datetime(self.key_node().last_written)
    }

    /// Navigates to the parent key, or `None` for the root.
    pub fn parent(&self) -> Result<Option<RegistryKey<'a>>> {
        if self.key_node().is_root() {
            return Ok(None);
        }
        Ok(Some(self.hive.get_key(self.key_node().parent_offset)?))
    }

    /// Returns an ordered list of subkeys, flattening any `ri` index root.
    pub fn subkeys(&self) -> Result<Vec<RegistryKey<'a>>> {
        let key_node = self.key_node();
        if !key_node.has_subkeys() {
            return Ok(Vec::new());
        }

        let mut offsets = Vec::new();
        self.collect_subkey_offsets(key_node.subkey_list_offset, &mut offsets)?;

        offsets.into_iter().map(|offset| self.hive.get_key(offset)).collect()
    }

    fn collect_subkey_offsets(&self, list_offset: u32, offsets: &mut Vec<u32>) -> Result<()> {
        if list_offset == NO_OFFSET || list_offset == 0 {
            return Ok(());
        }

        let subkey_list = self.hive.parse_subkey_list(list_offset)?;
        if subkey_list.is_index_root() {
            for offset in subkey_list.key_offsets_iter() {
                self.collect_subkey_offsets(offset, offsets)?;
            }
        } else {
            offsets.extend(subkey_list.key_offsets_iter());
        }
        Ok(())
    }

    /// Looks up a direct child by case-insensitive name.
    ///
    /// `lh` indices are filtered by hash before the name comparison; `lf`
    /// indices by the first-4-byte hint; `li` falls back to a linear scan.
    pub fn get_child(&self, name: &str) -> Result<RegistryKey<'a>> {
        let key_node = self.key_node();
        if !key_node.has_subkeys() {
            return Err(RegistryError::not_found("key", name));
        }

        self.find_child(key_node.subkey_list_offset, name)?
            .ok_or_else(|| RegistryError::not_found("key", name))
    }

    fn find_child(&self, list_offset: u32, name: &str) -> Result<Option<RegistryKey<'a>>> {
        if list_offset == NO_OFFSET || list_offset == 0 {
            return Ok(None);
        }

        let subkey_list = self.hive.parse_subkey_list(list_offset)?;
        match &subkey_list {
            SubkeyList::IndexRoot(sublists) => {
                for &sublist_offset in sublists {
                    if let Some(found) = self.find_child(sublist_offset, name)? {
                        return Ok(Some(found));
                    }
                }
                Ok(None)
            }
            SubkeyList::IndexLeaf(offsets) => {
                for &offset in offsets {
                    let candidate = self.hive.get_key(offset)?;
                    if names_equal_fold(candidate.name(), name) {
                        return Ok(Some(candidate));
                    }
                }
                Ok(None)
            }
            SubkeyList::LeafWithHints(list_type, entries) => {
                use crate::subkey_list::SubkeyListType;
                let hint_matches: Box<dyn Fn(u32) -> bool> = match list_type {
                    SubkeyListType::FastLeaf => {
                        let target = lf_name_hint(name);
                        let target_u32 = u32::from_le_bytes(target);
                        Box::new(move |hint| hint == target_u32)
                    }
                    SubkeyListType::HashLeaf => {
                        let target = lh_name_hash(name);
                        Box::new(move |hint| hint == target)
                    }
                    _ => Box::new(|_| true),
                };

                for entry in entries {
                    if !hint_matches(entry.name_hint) {
                        continue;
                    }
                    let candidate = self.hive.get_key(entry.key_offset)?;
                    if names_equal_fold(candidate.name(), name) {
                        return Ok(Some(candidate));
                    }
                }
                Ok(None)
            }
        }
    }

    /// Returns an ordered list of values, in on-disk (insertion) order.
    pub fn values(&self) -> Result<Vec<RegistryValue<'a>>> {
        let key_node = self.key_node();
        if !key_node.has_values() || key_node.value_list_offset == NO_OFFSET || key_node.value_list_offset == 0 {
            return Ok(Vec::new());
        }

        let list_data = self.hive.read_cell(key_node.value_list_offset)?;
        let value_count = key_node.value_count as usize;

        if list_data.len() < value_count * 4 {
            return Err(RegistryError::TruncatedData {
                offset: key_node.value_list_offset,
                expected: value_count * 4,
                actual: list_data.len(),
            });
        }

        (0..value_count)
            .map(|i| {
                let pos = i * 4;
                let offset = u32::from_le_bytes([
                    list_data[pos],
                    list_data[pos + 1],
                    list_data[pos + 2],
                    list_data[pos + 3],
                ]);
                Ok(RegistryValue { hive: self.hive, value_key: self.hive.parse_value_key(offset)? })
            })
            .collect()
    }

    /// Looks up a value by case-insensitive name. The empty name addresses
    /// the key's default value.
    pub fn get_value(&self, name: &str) -> Result<RegistryValue<'a>> {
        self.values()?
            .into_iter()
            .find(|v| names_equal_fold(v.value_key.name.as_str(), name))
            .ok_or_else(|| RegistryError::not_found("value", name))
    }

    /// Returns the number of on-disk bytes this key node occupies (its cell
    /// body, excluding the size prefix).
    pub fn struct_size(&self) -> usize {
        self.key_node.encode().len()
    }

    /// Returns the key's raw class-name bytes, or an empty vector if it has
    /// none. The writer copies these verbatim for untouched keys; this
    /// crate has no editor operation to set a class name.
    pub fn class_name_bytes(&self) -> Result<Vec<u8>> {
        let key_node = self.key_node();
        if key_node.class_name_offset == NO_OFFSET || key_node.class_name_length == 0 {
            return Ok(Vec::new());
        }
        let cell = self.hive.read_cell(key_node.class_name_offset)?;
        let len = (key_node.class_name_length as usize).min(cell.len());
        Ok(cell[..len].to_vec())
    }

    /// Returns the underlying key node, for callers (the writer) that need
    /// direct access to on-disk fields like offsets.
    pub fn key_node_ref(&self) -> &KeyNode {
        &self.key_node
    }

    /// Returns this key's security-descriptor offset, or `None` if it has
    /// none. The writer preserves the referenced `sk` cell verbatim; this
    /// crate has no operation to edit a security descriptor's contents.
    pub fn security_offset(&self) -> Option<u32> {
        let offset = self.key_node().security_offset;
        if offset == NO_OFFSET { None } else { Some(offset) }
    }

    /// Returns the raw bytes of the `sk` cell this key references.
    pub fn security_cell_bytes(&self) -> Result<Vec<u8>> {
        match self.security_offset() {
            Some(offset) => Ok(self.hive.read_cell(offset)?.to_vec()),
            None => Ok(Vec::new()),
        }
    }
}

/// A registry value bound to its owning hive.
pub struct RegistryValue<'a> {
    hive: &'a Hive,
    value_key: ValueKey,
}

impl<'a> RegistryValue<'a> {
    /// Returns the on-disk name, or `""` for the default value.
    pub fn name(&self) -> &str {
        &self.value_key.name
    }

    /// Returns the presentation name, mapping `""` to `"(default)"`.
    pub fn display_name(&self) -> &str {
        self.value_key.display_name()
    }

    /// Returns the declared data type.
    pub fn data_type(&self) -> ValueType {
        self.value_key.data_type
    }

    /// Returns the declared data length in bytes.
    pub fn size(&self) -> u32 {
        self.value_key.data_length
    }

    /// Returns the decoded value data, resolving inline, flat, and
    /// big-data storage.
    pub fn data(&self) -> Result<ValueData> {
        ValueData::parse(&self.raw_data()?, self.value_key.data_type, self.value_key.data_offset)
    }

    /// Returns the raw, undecoded value bytes.
    pub fn raw_data(&self) -> Result<Vec<u8>> {
        if self.value_key.is_inline_data() {
            Ok(self.value_key.inline_data())
        } else if self.value_key.data_offset == NO_OFFSET || self.value_key.data_offset == 0 {
            Ok(Vec::new())
        } else {
            self.hive.read_value_data(self.value_key.data_offset, self.value_key.data_length)
        }
    }

    /// Returns `(absolute_offset, length)` of the data cell, or `(0, 0)`
    /// when the value's data is stored inline.
    pub fn data_cell_location(&self) -> Result<(u32, u32)> {
        if self.value_key.is_inline_data()
            || self.value_key.data_offset == NO_OFFSET
            || self.value_key.data_offset == 0
        {
            return Ok((0, 0));
        }
        let abs = cell_offset_to_absolute(self.value_key.data_offset)?;
        Ok((abs, self.value_key.data_length))
    }

    /// Decodes this value as `REG_DWORD`, failing with `TypeMismatch`
    /// otherwise.
    pub fn as_dword(&self) -> Result<u32> {
        value::as_dword(&self.data()?)
    }

    /// Decodes this value as `REG_QWORD`, failing with `TypeMismatch`
    /// otherwise.
    pub fn as_qword(&self) -> Result<u64> {
        value::as_qword(&self.data()?)
    }

    /// Decodes this value as `REG_SZ`/`REG_EXPAND_SZ`, failing with
    /// `TypeMismatch` otherwise.
    pub fn as_sz(&self) -> Result<String> {
        value::as_sz(&self.data()?).map(|s| s.to_string())
    }

    /// Decodes this value as `REG_MULTI_SZ`, failing with `TypeMismatch`
    /// otherwise.
    pub fn as_multi_sz(&self) -> Result<Vec<String>> {
        value::as_multi_sz(&self.data()?).map(|s| s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    // Exercised by tests/ using synthetic in-memory hive images.
}
