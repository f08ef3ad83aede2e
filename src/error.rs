//! Error types for registry parsing, editing, and `.reg` codec operations.
//!
//! This module provides comprehensive error handling across the whole crate:
//! I/O errors, on-disk format violations, record-level corruption, semantic
//! errors from the editor, and input errors from the `.reg` parser. No
//! operation in this crate panics in non-test code; every fallible operation
//! returns a [`Result`].

use std::io;
use thiserror::Error;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors that can occur during registry parsing, editing, and serialization.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// I/O error occurred while reading or writing a hive file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic signature in header or structure.
    #[error("Invalid signature: expected {expected:?}, found {found:?}")]
    InvalidSignature { expected: Vec<u8>, found: Vec<u8> },

    /// Invalid hive format discovered while opening the hive (header-level).
    #[error("Invalid hive format: {0}")]
    InvalidFormat(String),

    /// A cell was structurally corrupt when decoded during navigation
    /// (as opposed to a header-level format violation).
    #[error("Malformed record at offset {offset:#x}: {reason}")]
    MalformedRecord { offset: u32, reason: String },

    /// Cell offset is out of bounds.
    #[error("Invalid cell offset: {offset:#x} (hive size: {hive_size:#x})")]
    InvalidOffset { offset: u32, hive_size: usize },

    /// Cell size is invalid or corrupted.
    #[error("Invalid cell size: {size} at offset {offset:#x}")]
    InvalidCellSize { size: i32, offset: u32 },

    /// Unknown or unsupported cell type.
    #[error("Unknown cell type: {cell_type:?} at offset {offset:#x}")]
    UnknownCellType { cell_type: [u8; 2], offset: u32 },

    /// Key or value not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid UTF-16 string data.
    #[error("Invalid UTF-16 string at offset {offset:#x}")]
    InvalidUtf16 { offset: u32 },

    /// Hive is too small to be valid.
    #[error("Hive too small: {size} bytes (minimum: {minimum} bytes)")]
    HiveTooSmall { size: usize, minimum: usize },

    /// Checksum mismatch in hive header.
    #[error("Checksum mismatch: expected {expected:#x}, calculated {calculated:#x}")]
    ChecksumMismatch { expected: u32, calculated: u32 },

    /// Unsupported hive version.
    #[error("Unsupported hive version: {major}.{minor}")]
    UnsupportedVersion { major: u32, minor: u32 },

    /// Primary and secondary sequence numbers disagree (dirty hive with
    /// unreplayed transaction logs; log replay is out of scope).
    #[error("Hive sequence numbers disagree: primary {primary}, secondary {secondary}")]
    SequenceMismatch { primary: u32, secondary: u32 },

    /// Data truncated or incomplete.
    #[error("Truncated data at offset {offset:#x}: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        offset: u32,
        expected: usize,
        actual: usize,
    },

    /// Invalid subkey list type.
    #[error("Invalid subkey list type: {list_type:?}")]
    InvalidSubkeyList { list_type: [u8; 2] },

    /// The value's declared type is incompatible with the requested decoder.
    #[error("Type mismatch: value has type {actual}, expected {expected}")]
    TypeMismatch { expected: String, actual: String },

    /// A `create_key` with `must_not_exist` targeted an existing key.
    #[error("Key already exists: {0}")]
    Exists(String),

    /// A non-recursive `delete_key` targeted a key with children.
    #[error("Key is not empty: {0}")]
    NonEmpty(String),

    /// A `.reg` stanza path did not start with the configured prefix.
    #[error("Path does not start with prefix {expected:?}: {got:?}")]
    PrefixMismatch { expected: String, got: String },

    /// A `.reg` document failed to parse.
    #[error(".reg parse error at {line}:{column}: {reason}")]
    ParseError {
        line: usize,
        column: usize,
        reason: String,
    },

    /// Commit failed partway through; the original file is left intact.
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// An allocator or encoder invariant was violated. This indicates a bug,
    /// never a malformed input; it must never leave a partial file on disk.
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl RegistryError {
    /// Creates an invalid signature error with context.
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Creates an invalid offset error with context.
    pub fn invalid_offset(offset: u32, hive_size: usize) -> Self {
        Self::InvalidOffset { offset, hive_size }
    }

    /// Creates an invalid cell size error with context.
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Creates a header-level format error with detailed context.
    pub fn format_error(message: String) -> Self {
        Self::InvalidFormat(message)
    }

    /// Creates a record-level corruption error discovered during navigation.
    pub fn malformed_record(offset: u32, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a not found error with context about what was being searched.
    pub fn not_found(item_type: &str, name: &str) -> Self {
        Self::NotFound(format!("{} '{}'", item_type, name))
    }

    /// Creates an unknown cell type error.
    pub fn unknown_cell_type(cell_type: [u8; 2], offset: u32) -> Self {
        Self::UnknownCellType { cell_type, offset }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}
