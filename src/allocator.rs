//! Best-fit cell allocator for building a fresh hive image.
//!
//! The writer rebuilds the entire hive-bins region from scratch rather than
//! patching the original file in place. This allocator owns that growing
//! byte buffer: every emitted cell goes through [`Allocator::alloc`], and
//! `finalize` hands back the bytes ready to follow the base block.

use crate::error::{RegistryError, Result};
use crate::hbin::{HbinHeader, HBIN_ALIGNMENT, HBIN_HEADER_SIZE};
use crate::utils::round_to_cell_size;
use std::collections::BTreeMap;

/// Minimum leftover size, in bytes, worth splitting off as its own free
/// cell. Smaller remainders are folded into the allocated cell instead.
const MIN_SPLIT_REMAINDER: usize = 16;

/// Owns the hive-bins byte region under construction and its free-cell
/// index.
pub struct Allocator {
    /// Concatenated hbin bytes, offset 0 aligned with the first hbin.
    image: Vec<u8>,
    /// Free cells keyed by total cell size (including the 4-byte prefix).
    free_list: BTreeMap<u32, Vec<u32>>,
    /// `(start, end)` relative-offset bounds of each hbin, for
    /// same-hbin-only coalescing.
    hbin_bounds: Vec<(u32, u32)>,
}

impl Allocator {
    /// Creates an allocator with no hbins yet; the first `alloc` call
    /// extends it.
    pub fn new() -> Self {
        Self {
            image: Vec::new(),
            free_list: BTreeMap::new(),
            hbin_bounds: Vec::new(),
        }
    }

    /// Allocates a cell sized for a `body_len`-byte record body. Returns
    /// the cell offset (pointing at the 4-byte size prefix, relative to
    /// the first hbin) with the body zero-filled and ready to overwrite.
    pub fn alloc(&mut self, body_len: usize) -> u32 {
        let needed = round_to_cell_size(4 + body_len) as u32;

        if let Some(offset) = self.take_best_fit(needed) {
            return offset;
        }

        self.extend_for(needed);
        self.take_best_fit(needed)
            .expect("freshly extended hbin must satisfy the request")
    }

    /// Returns a mutable view of a cell's body (excluding the 4-byte size
    /// prefix), given a cell offset previously returned by `alloc`.
    pub fn cell_body_mut(&mut self, offset: u32) -> &mut [u8] {
        let size = self.read_cell_total_size(offset).unsigned_abs() as usize;
        let start = offset as usize + 4;
        let end = offset as usize + size;
        &mut self.image[start..end]
    }

    /// Marks the cell at `offset` free and coalesces it with contiguous
    /// free neighbors inside the same hbin.
    pub fn free(&mut self, offset: u32) {
        let size = self.read_cell_total_size(offset).unsigned_abs();
        self.mark_free(offset, size);
        self.coalesce_from(offset);
    }

    /// Total size, in bytes, of the hbins region built so far.
    pub fn total_size(&self) -> u32 {
        self.image.len() as u32
    }

    /// Consumes the allocator, returning the finished hbins byte region.
    pub fn finalize(self) -> Vec<u8> {
        self.image
    }

    fn take_best_fit(&mut self, needed: u32) -> Option<u32> {
        let fit_size = *self.free_list.range(needed..).next()?.0;
        let offsets = self.free_list.get_mut(&fit_size).unwrap();
        let offset = offsets.pop().unwrap();
        if offsets.is_empty() {
            self.free_list.remove(&fit_size);
        }

        let remainder = fit_size - needed;
        if remainder as usize >= MIN_SPLIT_REMAINDER {
            self.write_cell_size(offset, -(needed as i32));
            let split_offset = offset + needed;
            self.write_cell_size(split_offset, remainder as i32);
            self.mark_free(split_offset, remainder);
        } else {
            self.write_cell_size(offset, -(fit_size as i32));
        }

        let body_start = offset as usize + 4;
        let body_end = offset as usize + needed as usize;
        self.image[body_start..body_end].fill(0);
        Some(offset)
    }

    fn extend_for(&mut self, needed: u32) {
        let required = HBIN_HEADER_SIZE as u32 + needed;
        let hbin_size = required.div_ceil(HBIN_ALIGNMENT as u32) * HBIN_ALIGNMENT as u32;

        let hbin_offset = self.image.len() as u32;
        let header = HbinHeader::new(hbin_offset, hbin_size);
        self.image.extend_from_slice(&header.encode());

        let data_size = hbin_size - HBIN_HEADER_SIZE as u32;
        let free_cell_offset = hbin_offset + HBIN_HEADER_SIZE as u32;
        self.image.resize(self.image.len() + data_size as usize, 0);
        self.write_cell_size(free_cell_offset, data_size as i32);
        self.mark_free(free_cell_offset, data_size);

        self.hbin_bounds.push((hbin_offset, hbin_offset + hbin_size));
    }

    fn mark_free(&mut self, offset: u32, size: u32) {
        self.free_list.entry(size).or_default().push(offset);
    }

    fn remove_from_free_list(&mut self, offset: u32, size: u32) {
        if let Some(offsets) = self.free_list.get_mut(&size) {
            offsets.retain(|&o| o != offset);
            if offsets.is_empty() {
                self.free_list.remove(&size);
            }
        }
    }

    fn read_cell_total_size(&self, offset: u32) -> i32 {
        let pos = offset as usize;
        i32::from_le_bytes(self.image[pos..pos + 4].try_into().unwrap())
    }

    fn write_cell_size(&mut self, offset: u32, size: i32) {
        let pos = offset as usize;
        self.image[pos..pos + 4].copy_from_slice(&size.to_le_bytes());
    }

    fn hbin_bounds_for(&self, offset: u32) -> (u32, u32) {
        *self
            .hbin_bounds
            .iter()
            .find(|(start, end)| offset >= *start && offset < *end)
            .expect("offset must fall within a tracked hbin")
    }

    /// Coalesces the free cell at `offset` with its immediate successor and
    /// predecessor, stopping at hbin boundaries.
    fn coalesce_from(&mut self, offset: u32) {
        let (hbin_start, hbin_end) = self.hbin_bounds_for(offset);
        let mut cur_offset = offset;
        let mut cur_size = self.read_cell_total_size(cur_offset).unsigned_abs();

        let next_offset = cur_offset + cur_size;
        if next_offset < hbin_end {
            let next_size_raw = self.read_cell_total_size(next_offset);
            if next_size_raw > 0 {
                let next_size = next_size_raw as u32;
                self.remove_from_free_list(next_offset, next_size);
                self.remove_from_free_list(cur_offset, cur_size);
                cur_size += next_size;
                self.write_cell_size(cur_offset, cur_size as i32);
                self.mark_free(cur_offset, cur_size);
            }
        }

        if let Some(prev_offset) = self.find_predecessor(hbin_start, cur_offset) {
            let prev_size_raw = self.read_cell_total_size(prev_offset);
            if prev_size_raw > 0 {
                let prev_size = prev_size_raw as u32;
                self.remove_from_free_list(prev_offset, prev_size);
                self.remove_from_free_list(cur_offset, cur_size);
                let merged = prev_size + cur_size;
                self.write_cell_size(prev_offset, merged as i32);
                self.mark_free(prev_offset, merged);
            }
        }
    }

    /// Walks cells from the start of the hbin to find the one immediately
    /// preceding `target`.
    fn find_predecessor(&self, hbin_data_start: u32, target: u32) -> Option<u32> {
        let mut offset = hbin_data_start + HBIN_HEADER_SIZE as u32;
        let mut prev = None;
        while offset < target {
            prev = Some(offset);
            let size = self.read_cell_total_size(offset).unsigned_abs();
            if size == 0 {
                break;
            }
            offset += size;
        }
        prev
    }
}

impl Default for Allocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes an encoded record body into a freshly allocated cell.
pub fn alloc_and_fill(allocator: &mut Allocator, body: &[u8]) -> u32 {
    let offset = allocator.alloc(body.len());
    allocator.cell_body_mut(offset)[..body.len()].copy_from_slice(body);
    offset
}

/// Convenience wrapper surfacing allocator bugs as [`RegistryError::InternalError`]
/// rather than a panic, for call sites in the writer that must never abort
/// the process mid-commit.
pub fn try_alloc_and_fill(allocator: &mut Allocator, body: &[u8]) -> Result<u32> {
    if body.len() > u32::MAX as usize {
        return Err(RegistryError::InternalError(format!(
            "record body of {} bytes exceeds the maximum cell size",
            body.len()
        )));
    }
    Ok(alloc_and_fill(allocator, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_extends_and_rounds_to_multiple_of_eight() {
        let mut alloc = Allocator::new();
        let offset = alloc.alloc(10);
        assert_eq!(offset % 8, 0);
        assert!(alloc.total_size() >= HBIN_ALIGNMENT as u32);
    }

    #[test]
    fn alloc_reuses_freed_cell() {
        let mut alloc = Allocator::new();
        let a = alloc.alloc(40);
        alloc.free(a);
        let b = alloc.alloc(40);
        assert_eq!(a, b);
    }

    #[test]
    fn free_coalesces_adjacent_cells() {
        let mut alloc = Allocator::new();
        let a = alloc.alloc(64);
        let b = alloc.alloc(64);
        alloc.free(a);
        alloc.free(b);
        let big = alloc.alloc(136);
        assert_eq!(big, a);
    }

    #[test]
    fn multiple_hbins_are_tracked_independently() {
        let mut alloc = Allocator::new();
        let huge = vec![0u8; HBIN_ALIGNMENT * 2];
        let offset = alloc.alloc(huge.len());
        assert!(alloc.total_size() as usize >= huge.len());
        let _ = alloc.cell_body_mut(offset);
    }

    #[test]
    fn alloc_and_fill_writes_body() {
        let mut alloc = Allocator::new();
        let offset = alloc_and_fill(&mut alloc, b"nk-body-bytes");
        assert_eq!(&alloc.cell_body_mut(offset)[..13], b"nk-body-bytes");
    }
}
