//! # Windows Registry Hive
//!
//! A Windows registry hive reader, transactional editor, and `.reg` merge
//! engine written in Rust.
//!
//! ## Features
//!
//! - **Fast parsing**: memory-mapped I/O for efficient, zero-copy reads
//! - **Complete format support**: SYSTEM, SOFTWARE, SAM, SECURITY, NTUSER.DAT and friends
//! - **Type-safe values**: typed decoders for every `REG_*` type, with mismatch errors
//! - **Transactional edits**: a copy-on-write overlay with create/delete/set operations
//! - **Whole-hive rebuild**: an allocator-driven writer producing a new image and atomic rename
//! - **`.reg` codec**: parse, merge, and emit the textual export format
//!
//! ## Architecture
//!
//! 1. **Base Block (Header)**: hive metadata and root key offset ([`header`])
//! 2. **Hive Bins (hbin)**: 4KB-aligned blocks containing cells ([`hbin`])
//! 3. **Cells**: variable-sized structures — keys, values, lists ([`cell`])
//! 4. **Key Nodes (nk)** / **Value Keys (vk)**: the key/value tree ([`key`], [`value`])
//! 5. **Subkey Lists (lf/lh/li/ri)**: subkey indices ([`subkey_list`])
//! 6. **Overlay/Editor**: copy-on-write mutation on top of the reader ([`overlay`], [`editor`])
//! 7. **Allocator/Writer**: rebuilds an image from an overlay ([`allocator`], [`writer`])
//! 8. **Reg codec**: textual `.reg` parse/merge/emit ([`reg`])
//!
//! ## Binary Layout
//!
//! ```text
//! [Base Block - 4KB]
//!   - Signature: "regf"
//!   - Version, timestamps, root offset
//!   - Checksum
//!
//! [Hive Bins - variable size, 4KB aligned]
//!   [Hbin Header - 32 bytes]
//!     - Signature: "hbin"
//!     - Offset, size
//!
//!   [Cells - variable size]
//!     [Cell Size - 4 bytes, negative if allocated]
//!     [Cell Data]
//!       - Key nodes (nk)
//!       - Value keys (vk)
//!       - Subkey lists (lf/lh/li/ri)
//!       - Security descriptors (sk)
//! ```
//!
//! ## Examples
//!
//! ### Basic reading
//!
//! ```no_run
//! use regrust_hive::Hive;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::open("SYSTEM")?;
//! let root = hive.root()?;
//! println!("Root key: {}", root.name());
//!
//! for subkey in root.subkeys()? {
//!     println!("  Subkey: {}", subkey.name());
//! }
//!
//! for value in root.values()? {
//!     println!("  Value: {} = {}", value.name(), value.data()?.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Editing and committing
//!
//! ```no_run
//! use regrust_hive::{CommitOptions, Editor, Hive, ValueData};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::open("SOFTWARE")?;
//! let mut editor = Editor::begin(&hive)?;
//! editor.set_value("Microsoft\\Windows", "Count", ValueData::Dword(42))?;
//! let overlay = editor.into_overlay();
//! regrust_hive::writer::commit(&overlay, "SOFTWARE.new", &CommitOptions::default())?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Merging a `.reg` patch
//!
//! ```no_run
//! use regrust_hive::reg::{self, RegParseOptions};
//! use regrust_hive::{CommitOptions, Editor, Hive};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let patch = std::fs::read_to_string("patch.reg")?;
//! let options = RegParseOptions { prefix: Some("HKEY_LOCAL_MACHINE\\SOFTWARE".into()), auto_prefix: false };
//! let ops = reg::parse(&patch, &options)?;
//!
//! let hive = Hive::open("SOFTWARE")?;
//! let mut editor = Editor::begin(&hive)?;
//! reg::merge(&mut editor, &ops)?;
//! regrust_hive::writer::commit(&editor.into_overlay(), "SOFTWARE.new", &CommitOptions::default())?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod allocator;
pub mod bigdata;
pub mod cell;
pub mod editor;
pub mod error;
pub mod hbin;
pub mod header;
pub mod hive;
pub mod key;
pub mod name;
pub mod overlay;
pub mod reg;
pub mod subkey_list;
pub mod utils;
pub mod value;
pub mod writer;

// Re-export main types for convenience.
pub use cell::{CellType, KeyNodeFlags, ValueType};
pub use editor::{CreateKeyOptions, DeleteKeyOptions, Editor};
pub use error::{RegistryError, Result};
pub use hbin::HbinHeader;
pub use header::BaseBlock;
pub use hive::{Hive, HbinIterator, RegistryKey, RegistryValue};
pub use key::KeyNode;
pub use overlay::{ChildRef, NodeId, Overlay};
pub use subkey_list::{SubkeyList, SubkeyListEntry, SubkeyListType};
pub use value::{ValueData, ValueKey};
pub use writer::{commit, CommitOptions};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
