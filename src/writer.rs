//! Commit pipeline: turns an [`Overlay`]'s accumulated edits into a fresh
//! hive image and persists it atomically.
//!
//! The hive-bins region is always rebuilt from scratch rather than patched
//! in place — there is no room in the NK/VK/subkey-index format to grow a
//! record without relocating it, so in-place patching would just be this
//! rebuild with extra bookkeeping. The pipeline walks the overlay tree
//! bottom-up: children (and their subtrees) are emitted before a parent,
//! since the parent's own cell isn't allocated until its subkey index and
//! value list already exist to point at. The key node is allocated early
//! with placeholder offsets so children can record a `parent_offset`, then
//! patched once its real subkey/value list offsets are known.

use crate::allocator::{try_alloc_and_fill, Allocator};
use crate::bigdata::{encode_segment_list, split_into_segments, BigDataBlock, DEFAULT_SEGMENT_SIZE};
use crate::cell::KeyNodeFlags;
use crate::error::Result;
use crate::header::BASE_BLOCK_SIZE;
use crate::key::KeyNode;
use crate::overlay::{ChildRef, Overlay};
use crate::subkey_list::{chunk_entries, SubkeyList, SubkeyListEntry, SubkeyListType, MAX_LEAF_ENTRIES};
use crate::utils::{fold_name, lh_name_hash, now_filetime};
use crate::value::{ValueData, ValueKey};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Sentinel used in on-disk offset fields to mean "absent".
const NO_OFFSET: u32 = 0xFFFF_FFFF;

/// Value data at or under this length is packed into the `vk` record's own
/// `data_offset` field instead of a separate cell.
const MAX_INLINE_VALUE_SIZE: usize = 4;

/// Options controlling how [`commit`] rebuilds a hive image.
#[derive(Debug, Clone)]
pub struct CommitOptions {
    /// When set, an untouched base subtree's record content (names,
    /// timestamps, class names, security descriptors, value data) is
    /// carried forward unchanged rather than refreshed as if newly written.
    /// Cell *offsets* are always recomputed regardless, since the whole
    /// hive-bins region is rebuilt; this flag only governs the bytes that
    /// don't encode a position. When unset, every reachable key's
    /// last-written timestamp is bumped to the commit time.
    pub preserve_untouched: bool,
    /// Maximum size of one big-data segment, for values that don't fit in
    /// a single cell.
    pub segment_size: usize,
    /// Flush the temp file to disk before the rename that makes it visible.
    pub fsync: bool,
}

impl Default for CommitOptions {
    fn default() -> Self {
        Self {
            preserve_untouched: true,
            segment_size: DEFAULT_SEGMENT_SIZE,
            fsync: true,
        }
    }
}

/// Commits `overlay`'s accumulated edits to `path`, replacing its contents
/// atomically: the new image is written to `<path>.tmp` in the same
/// directory and renamed over `path` only once it's fully flushed, so a
/// crash mid-write never leaves a corrupt hive where a good one was.
pub fn commit<P: AsRef<Path>>(overlay: &Overlay<'_>, path: P, options: &CommitOptions) -> Result<()> {
    let image = build_image(overlay, options)?;
    persist(path.as_ref(), &image, options.fsync)
}

/// Builds the full hive image bytes in memory, without touching the
/// filesystem. `commit` uses this directly; callers that want to inspect
/// or further wrap the result (e.g. feeding it to [`crate::hive::Hive::from_vec`])
/// can call it too.
pub fn build_image(overlay: &Overlay<'_>, options: &CommitOptions) -> Result<Vec<u8>> {
    let mut allocator = Allocator::new();
    let mut emitted_security = HashMap::new();

    let root_offset = emit_node(overlay, overlay.root(), NO_OFFSET, &mut allocator, options, &mut emitted_security)?;

    let mut header = overlay.base().base_block().clone();
    header.root_cell_offset = root_offset;
    header.last_written = now_filetime();
    header.primary_sequence = header.primary_sequence.wrapping_add(1);
    header.secondary_sequence = header.primary_sequence;

    let hive_bins = allocator.finalize();
    header.hive_length = hive_bins.len() as u32;

    let mut image = Vec::with_capacity(BASE_BLOCK_SIZE + hive_bins.len());
    image.extend_from_slice(&header.encode());
    image.extend_from_slice(&hive_bins);
    Ok(image)
}

fn persist(path: &Path, image: &[u8], fsync: bool) -> Result<()> {
    let tmp_path = sibling_tmp_path(path);
    let result = write_tmp(&tmp_path, image, fsync).and_then(|()| Ok(fs::rename(&tmp_path, path)?));
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

fn write_tmp(tmp_path: &Path, image: &[u8], fsync: bool) -> Result<()> {
    let file = fs::File::create(tmp_path)?;
    {
        use std::io::Write;
        let mut file = &file;
        file.write_all(image)?;
    }
    if fsync {
        file.sync_all()?;
    }
    Ok(())
}

fn sibling_tmp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Returns `(display_name, child_ref)` pairs for `ref_`'s children, in
/// whatever order the source (base image or overlay) stores them. The
/// caller sorts these by folded name before emitting the subkey index.
fn children_of(overlay: &Overlay<'_>, ref_: ChildRef) -> Result<Vec<(String, ChildRef)>> {
    match ref_ {
        ChildRef::Base(offset) => {
            let key = overlay.base().get_key(offset)?;
            key.subkeys()?
                .into_iter()
                .map(|child| Ok((child.name().to_string(), ChildRef::Base(child.offset))))
                .collect()
        }
        ChildRef::Node(id) => Ok(overlay
            .node(id)
            .children
            .iter()
            .filter(|(_, child)| overlay.exists(**child))
            .map(|(name, child)| (name.to_string(), *child))
            .collect()),
    }
}

/// A value's data, either the exact bytes found on disk (paired with the
/// type code that was already there) or freshly encoded from an edited
/// [`ValueData`].
enum ValueSource {
    /// Untouched base-image data: reused as-is, never run through
    /// `ValueData::parse`/`encode`, so a value type this crate has no
    /// decoder for still round-trips byte-for-byte.
    Raw(Vec<u8>, crate::cell::ValueType),
    /// Data that came from (or was replaced through) the overlay.
    Decoded(ValueData),
}

/// Returns `(display_name, source)` pairs for `ref_`'s values, in
/// insertion order — registry value lists are not sorted. Base-image
/// values are returned as raw bytes when `options.preserve_untouched` is
/// set, so their on-disk representation survives the commit unchanged
/// even for value types this crate can't decode into a [`ValueData`]
/// variant.
fn values_of(overlay: &Overlay<'_>, ref_: ChildRef, options: &CommitOptions) -> Result<Vec<(String, ValueSource)>> {
    match ref_ {
        ChildRef::Base(offset) => {
            let key = overlay.base().get_key(offset)?;
            key.values()?
                .into_iter()
                .map(|value| {
                    let name = value.name().to_string();
                    if options.preserve_untouched {
                        Ok((name, ValueSource::Raw(value.raw_data()?, value.data_type())))
                    } else {
                        Ok((name, ValueSource::Decoded(value.data()?)))
                    }
                })
                .collect()
        }
        ChildRef::Node(id) => Ok(overlay
            .node(id)
            .values
            .iter()
            .map(|(name, data)| (name.to_string(), ValueSource::Decoded(data.clone())))
            .collect()),
    }
}

fn name_of(overlay: &Overlay<'_>, ref_: ChildRef) -> Result<String> {
    match ref_ {
        ChildRef::Base(offset) => Ok(overlay.base().get_key(offset)?.name().to_string()),
        ChildRef::Node(id) => Ok(overlay.node(id).name.clone()),
    }
}

fn last_written_of(overlay: &Overlay<'_>, ref_: ChildRef, options: &CommitOptions) -> Result<u64> {
    match ref_ {
        ChildRef::Base(offset) if options.preserve_untouched => {
            Ok(overlay.base().get_key(offset)?.last_written())
        }
        ChildRef::Base(_) => Ok(now_filetime()),
        ChildRef::Node(id) => Ok(overlay.node(id).last_written),
    }
}

fn class_name_bytes_of(overlay: &Overlay<'_>, ref_: ChildRef) -> Result<Vec<u8>> {
    match ref_ {
        ChildRef::Base(offset) => overlay.base().get_key(offset)?.class_name_bytes(),
        ChildRef::Node(_) => Ok(Vec::new()),
    }
}

/// Emits `ref_`'s `sk` cell if it has one, deduplicating repeated
/// references to the same base offset across sibling keys. The copy is
/// made self-referential (`flink == blink == its own offset`) since this
/// crate never links it into the original hive's shared security-cell
/// ring; the descriptor bytes themselves are untouched.
fn security_offset_of(
    overlay: &Overlay<'_>,
    ref_: ChildRef,
    allocator: &mut Allocator,
    emitted: &mut HashMap<u32, u32>,
) -> Result<u32> {
    let ChildRef::Base(base_offset) = ref_ else {
        return Ok(NO_OFFSET);
    };
    let key = overlay.base().get_key(base_offset)?;
    let Some(sk_offset) = key.security_offset() else {
        return Ok(NO_OFFSET);
    };
    if let Some(&new_offset) = emitted.get(&sk_offset) {
        return Ok(new_offset);
    }

    let mut body = key.security_cell_bytes()?;
    let new_offset = try_alloc_and_fill(allocator, &body)?;
    if body.len() >= 12 {
        body[4..8].copy_from_slice(&new_offset.to_le_bytes());
        body[8..12].copy_from_slice(&new_offset.to_le_bytes());
        allocator.cell_body_mut(new_offset)[..body.len()].copy_from_slice(&body);
    }
    emitted.insert(sk_offset, new_offset);
    Ok(new_offset)
}

/// Recursively emits `ref_` and everything beneath it, returning the new
/// cell offset of its `nk` record.
fn emit_node(
    overlay: &Overlay<'_>,
    ref_: ChildRef,
    parent_offset: u32,
    allocator: &mut Allocator,
    options: &CommitOptions,
    emitted_security: &mut HashMap<u32, u32>,
) -> Result<u32> {
    let name = name_of(overlay, ref_)?;
    let last_written = last_written_of(overlay, ref_, options)?;
    let class_name_bytes = class_name_bytes_of(overlay, ref_)?;
    let is_root = parent_offset == NO_OFFSET;

    let mut key_node = KeyNode {
        flags: KeyNodeFlags::new(if is_root { KeyNodeFlags::ROOT_KEY } else { 0 }),
        last_written,
        access_bits: 0,
        parent_offset,
        subkey_count: 0,
        volatile_subkey_count: 0,
        subkey_list_offset: NO_OFFSET,
        volatile_subkey_list_offset: NO_OFFSET,
        value_count: 0,
        value_list_offset: NO_OFFSET,
        security_offset: NO_OFFSET,
        class_name_offset: NO_OFFSET,
        max_subkey_name_len: 0,
        max_subkey_class_len: 0,
        max_value_name_len: 0,
        max_value_data_len: 0,
        work_var: 0,
        class_name_length: class_name_bytes.len() as u16,
        name,
    };

    let nk_offset = try_alloc_and_fill(allocator, &key_node.encode())?;

    let mut children = children_of(overlay, ref_)?;
    children.sort_by(|(a, _), (b, _)| fold_name(a).cmp(&fold_name(b)));

    let mut entries = Vec::with_capacity(children.len());
    let mut max_subkey_name_len = 0u32;
    for (child_name, child_ref) in &children {
        let child_offset = emit_node(overlay, *child_ref, nk_offset, allocator, options, emitted_security)?;
        max_subkey_name_len = max_subkey_name_len.max(child_name.len() as u32);
        entries.push(SubkeyListEntry { key_offset: child_offset, name_hint: lh_name_hash(child_name) });
    }

    let values = values_of(overlay, ref_, options)?;
    let mut max_value_name_len = 0u32;
    let mut max_value_data_len = 0u32;
    let mut vk_offsets = Vec::with_capacity(values.len());
    for (value_name, source) in &values {
        max_value_name_len = max_value_name_len.max(value_name.len() as u32);
        let (encoded, value_type) = match source {
            ValueSource::Raw(bytes, ty) => (bytes.clone(), *ty),
            ValueSource::Decoded(data) => data.encode(),
        };
        max_value_data_len = max_value_data_len.max(encoded.len() as u32);
        let (data_length, data_offset) = emit_value_data(allocator, &encoded, options.segment_size)?;
        let vk = ValueKey {
            data_length,
            data_offset,
            data_type: value_type,
            flags: 0,
            name: value_name.clone(),
        };
        vk_offsets.push(try_alloc_and_fill(allocator, &vk.encode())?);
    }

    let security_offset = security_offset_of(overlay, ref_, allocator, emitted_security)?;
    let class_name_offset = if class_name_bytes.is_empty() {
        NO_OFFSET
    } else {
        try_alloc_and_fill(allocator, &class_name_bytes)?
    };

    key_node.subkey_count = entries.len() as u32;
    key_node.subkey_list_offset = emit_subkey_index(allocator, &entries)?;
    key_node.value_count = vk_offsets.len() as u32;
    key_node.value_list_offset = emit_offset_list(allocator, &vk_offsets)?;
    key_node.security_offset = security_offset;
    key_node.class_name_offset = class_name_offset;
    key_node.max_subkey_name_len = max_subkey_name_len;
    key_node.max_value_name_len = max_value_name_len;
    key_node.max_value_data_len = max_value_data_len;

    let final_body = key_node.encode();
    allocator.cell_body_mut(nk_offset)[..final_body.len()].copy_from_slice(&final_body);

    Ok(nk_offset)
}

/// Writes value data, inline for `<= 4` bytes, otherwise to its own cell
/// (splitting into a `db` big-data block past [`CommitOptions::segment_size`]).
/// Returns `(data_length, data_offset)` ready for a `vk` record.
fn emit_value_data(allocator: &mut Allocator, encoded: &[u8], segment_size: usize) -> Result<(u32, u32)> {
    if encoded.is_empty() {
        return Ok((0, NO_OFFSET));
    }
    if encoded.len() <= MAX_INLINE_VALUE_SIZE {
        let mut inline = [0u8; 4];
        inline[..encoded.len()].copy_from_slice(encoded);
        return Ok((encoded.len() as u32, u32::from_le_bytes(inline)));
    }
    if encoded.len() <= DEFAULT_SEGMENT_SIZE {
        // The reader classifies anything at or under this size as a flat
        // cell regardless of `segment_size`; only values past this point
        // may legally become a `db` block.
        let offset = try_alloc_and_fill(allocator, encoded)?;
        return Ok((encoded.len() as u32, offset));
    }

    let segments = split_into_segments(encoded, segment_size);
    let mut segment_offsets = Vec::with_capacity(segments.len());
    for segment in &segments {
        segment_offsets.push(try_alloc_and_fill(allocator, segment)?);
    }
    let segment_list_offset = try_alloc_and_fill(allocator, &encode_segment_list(&segment_offsets))?;
    let header = BigDataBlock::encode(segment_offsets.len() as u16, segment_list_offset);
    let db_offset = try_alloc_and_fill(allocator, &header)?;
    Ok((encoded.len() as u32, db_offset))
}

/// Emits a flat `u32` offset-cell list (used for value lists and `li`
/// subkey lists, which share the same bare-offset-array shape).
fn emit_offset_list(allocator: &mut Allocator, offsets: &[u32]) -> Result<u32> {
    if offsets.is_empty() {
        return Ok(NO_OFFSET);
    }
    let mut body = Vec::with_capacity(offsets.len() * 4);
    for offset in offsets {
        body.extend_from_slice(&offset.to_le_bytes());
    }
    try_alloc_and_fill(allocator, &body)
}

/// Emits the subkey index for a key's already-sorted, already-emitted
/// children. Fits in a single `lh` leaf up to [`MAX_LEAF_ENTRIES`]; past
/// that, splits into multiple leaves under an `ri` root.
fn emit_subkey_index(allocator: &mut Allocator, entries: &[SubkeyListEntry]) -> Result<u32> {
    if entries.is_empty() {
        return Ok(NO_OFFSET);
    }

    if entries.len() <= MAX_LEAF_ENTRIES {
        return emit_leaf(allocator, entries);
    }

    let mut leaf_offsets = Vec::new();
    for chunk in chunk_entries(entries) {
        leaf_offsets.push(emit_leaf(allocator, chunk)?);
    }
    let root = SubkeyList::IndexRoot(leaf_offsets);
    try_alloc_and_fill(allocator, &root.encode())
}

fn emit_leaf(allocator: &mut Allocator, entries: &[SubkeyListEntry]) -> Result<u32> {
    let leaf = SubkeyList::LeafWithHints(SubkeyListType::HashLeaf, entries.to_vec());
    try_alloc_and_fill(allocator, &leaf.encode())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::editor::{CreateKeyOptions, Editor};
    use crate::hive::Hive;

    fn minimal_base_hive() -> Vec<u8> {
        let mut allocator = Allocator::new();
        let root = KeyNode {
            flags: KeyNodeFlags::new(KeyNodeFlags::ROOT_KEY | KeyNodeFlags::COMP_NAME),
            last_written: 0,
            access_bits: 0,
            parent_offset: NO_OFFSET,
            subkey_count: 0,
            volatile_subkey_count: 0,
            subkey_list_offset: NO_OFFSET,
            volatile_subkey_list_offset: NO_OFFSET,
            value_count: 0,
            value_list_offset: NO_OFFSET,
            security_offset: NO_OFFSET,
            class_name_offset: NO_OFFSET,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            work_var: 0,
            class_name_length: 0,
            name: String::new(),
        };
        let root_offset = try_alloc_and_fill(&mut allocator, &root.encode()).unwrap();
        let hive_bins = allocator.finalize();

        let mut header = crate::header::BaseBlock {
            signature: *crate::header::REGF_SIGNATURE,
            primary_sequence: 1,
            secondary_sequence: 1,
            last_written: 0,
            major_version: 1,
            minor_version: 5,
            file_type: 0,
            file_format: 1,
            root_cell_offset: root_offset,
            hive_length: hive_bins.len() as u32,
            clustering_factor: 1,
            file_name: String::new(),
            checksum: 0,
        };
        header.hive_length = hive_bins.len() as u32;
        let mut image = header.encode().to_vec();
        image.extend_from_slice(&hive_bins);
        image
    }

    #[test]
    fn committed_image_reparses_with_edits_applied() {
        let base = Hive::from_vec(minimal_base_hive()).unwrap();
        let mut editor = Editor::begin(&base).unwrap();
        editor.create_key("Software\\Vendor", CreateKeyOptions::default()).unwrap();
        editor.set_value("Software\\Vendor", "Build", ValueData::Dword(7)).unwrap();
        let overlay = editor.into_overlay();

        let image = build_image(&overlay, &CommitOptions::default()).unwrap();
        let rebuilt = Hive::from_vec(image).unwrap();

        let root = rebuilt.root().unwrap();
        let software = root.get_child("Software").unwrap();
        let vendor = software.get_child("Vendor").unwrap();
        let build = vendor.get_value("Build").unwrap();
        assert_eq!(build.data().unwrap(), ValueData::Dword(7));
    }

    #[test]
    fn committed_image_preserves_untouched_subtree() {
        let base = Hive::from_vec(minimal_base_hive()).unwrap();
        let mut editor = Editor::begin(&base).unwrap();
        editor.create_key("Software", CreateKeyOptions::default()).unwrap();
        let overlay = editor.into_overlay();

        let image = build_image(&overlay, &CommitOptions { preserve_untouched: true, ..Default::default() }).unwrap();
        let rebuilt = Hive::from_vec(image).unwrap();
        assert_eq!(rebuilt.root().unwrap().last_written(), 0);
    }

    /// Builds a base hive with two root children: "Untouched", holding a
    /// `REG_LINK` value this crate has no dedicated decoder for, and
    /// "Touched", empty. Editing only "Touched" must leave "Untouched"'s
    /// value bytes and declared type exactly as they were on disk.
    fn hive_with_a_link_value_under_an_untouched_sibling(link_bytes: &[u8]) -> Vec<u8> {
        use crate::cell::ValueType;
        use crate::subkey_list::{SubkeyList, SubkeyListEntry, SubkeyListType};
        use crate::value::ValueKey;

        let mut allocator = Allocator::new();

        let data_offset = try_alloc_and_fill(&mut allocator, link_bytes).unwrap();
        let vk = ValueKey {
            data_length: link_bytes.len() as u32,
            data_offset,
            data_type: ValueType::Link,
            flags: 0,
            name: "Odd".to_string(),
        };
        let vk_offset = try_alloc_and_fill(&mut allocator, &vk.encode()).unwrap();
        let value_list_offset = emit_offset_list(&mut allocator, &[vk_offset]).unwrap();

        let untouched = KeyNode {
            flags: KeyNodeFlags::new(0),
            last_written: 0,
            access_bits: 0,
            parent_offset: NO_OFFSET,
            subkey_count: 0,
            volatile_subkey_count: 0,
            subkey_list_offset: NO_OFFSET,
            volatile_subkey_list_offset: NO_OFFSET,
            value_count: 1,
            value_list_offset,
            security_offset: NO_OFFSET,
            class_name_offset: NO_OFFSET,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 3,
            max_value_data_len: link_bytes.len() as u32,
            work_var: 0,
            class_name_length: 0,
            name: "Untouched".to_string(),
        };
        let untouched_offset = try_alloc_and_fill(&mut allocator, &untouched.encode()).unwrap();

        let touched = KeyNode {
            flags: KeyNodeFlags::new(0),
            last_written: 0,
            access_bits: 0,
            parent_offset: NO_OFFSET,
            subkey_count: 0,
            volatile_subkey_count: 0,
            subkey_list_offset: NO_OFFSET,
            volatile_subkey_list_offset: NO_OFFSET,
            value_count: 0,
            value_list_offset: NO_OFFSET,
            security_offset: NO_OFFSET,
            class_name_offset: NO_OFFSET,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            work_var: 0,
            class_name_length: 0,
            name: "Touched".to_string(),
        };
        let touched_offset = try_alloc_and_fill(&mut allocator, &touched.encode()).unwrap();

        let entries = vec![
            SubkeyListEntry { key_offset: untouched_offset, name_hint: lh_name_hash("Untouched") },
            SubkeyListEntry { key_offset: touched_offset, name_hint: lh_name_hash("Touched") },
        ];
        let leaf = SubkeyList::LeafWithHints(SubkeyListType::HashLeaf, entries);
        let subkey_list_offset = try_alloc_and_fill(&mut allocator, &leaf.encode()).unwrap();

        let root = KeyNode {
            flags: KeyNodeFlags::new(KeyNodeFlags::ROOT_KEY | KeyNodeFlags::COMP_NAME),
            last_written: 0,
            access_bits: 0,
            parent_offset: NO_OFFSET,
            subkey_count: 2,
            volatile_subkey_count: 0,
            subkey_list_offset,
            volatile_subkey_list_offset: NO_OFFSET,
            value_count: 0,
            value_list_offset: NO_OFFSET,
            security_offset: NO_OFFSET,
            class_name_offset: NO_OFFSET,
            max_subkey_name_len: 9,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            work_var: 0,
            class_name_length: 0,
            name: String::new(),
        };
        let root_offset = try_alloc_and_fill(&mut allocator, &root.encode()).unwrap();
        let hive_bins = allocator.finalize();

        let header = crate::header::BaseBlock {
            signature: *crate::header::REGF_SIGNATURE,
            primary_sequence: 1,
            secondary_sequence: 1,
            last_written: 0,
            major_version: 1,
            minor_version: 5,
            file_type: 0,
            file_format: 1,
            root_cell_offset: root_offset,
            hive_length: hive_bins.len() as u32,
            clustering_factor: 1,
            file_name: String::new(),
            checksum: 0,
        };
        let mut image = header.encode().to_vec();
        image.extend_from_slice(&hive_bins);
        image
    }

    #[test]
    fn committing_an_edit_elsewhere_does_not_reclassify_an_undecoded_value_type() {
        use crate::cell::ValueType;

        let link_bytes = b"\\??\\C:\\Target".to_vec();
        let base = Hive::from_vec(hive_with_a_link_value_under_an_untouched_sibling(&link_bytes)).unwrap();
        let mut editor = Editor::begin(&base).unwrap();
        editor.create_key("Touched\\Sub", CreateKeyOptions::default()).unwrap();
        let overlay = editor.into_overlay();

        let image = build_image(&overlay, &CommitOptions::default()).unwrap();
        let rebuilt = Hive::from_vec(image).unwrap();
        let value = rebuilt.root().unwrap().get_child("Untouched").unwrap().get_value("Odd").unwrap();

        assert_eq!(value.data_type(), ValueType::Link);
        assert_eq!(value.raw_data().unwrap(), link_bytes);
    }

    #[test]
    fn large_value_round_trips_through_big_data_segments() {
        let base = Hive::from_vec(minimal_base_hive()).unwrap();
        let mut editor = Editor::begin(&base).unwrap();
        let payload = vec![0xABu8; 40_000];
        editor.set_value("", "Blob", ValueData::Binary(payload.clone())).unwrap();
        let overlay = editor.into_overlay();

        let options = CommitOptions { segment_size: 16_344, ..Default::default() };
        let image = build_image(&overlay, &options).unwrap();
        let rebuilt = Hive::from_vec(image).unwrap();
        let value = rebuilt.root().unwrap().get_value("Blob").unwrap();
        assert_eq!(value.data().unwrap(), ValueData::Binary(payload));
    }

    #[test]
    fn many_subkeys_split_into_an_index_root() {
        let base = Hive::from_vec(minimal_base_hive()).unwrap();
        let mut editor = Editor::begin(&base).unwrap();
        for i in 0..(MAX_LEAF_ENTRIES + 50) {
            editor.create_key(&format!("Key{i:04}"), CreateKeyOptions::default()).unwrap();
        }
        let overlay = editor.into_overlay();

        let image = build_image(&overlay, &CommitOptions::default()).unwrap();
        let rebuilt = Hive::from_vec(image).unwrap();
        let root = rebuilt.root().unwrap();
        assert_eq!(root.subkeys().unwrap().len(), MAX_LEAF_ENTRIES + 50);
        assert!(root.get_child("Key0042").is_ok());
    }

    #[test]
    fn sibling_tmp_path_stays_alongside_target() {
        let path = Path::new("/tmp/example/SOFTWARE");
        let tmp = sibling_tmp_path(path);
        assert_eq!(tmp, Path::new("/tmp/example/SOFTWARE.tmp"));
    }
}
