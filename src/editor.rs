//! Transactional, path-addressed editing over a registry hive.
//!
//! An [`Editor`] owns an [`Overlay`] and exposes the path-based mutation
//! operations a `.reg` merge or an interactive editor needs. Every
//! operation executes immediately against the overlay, in arrival order;
//! there is no implicit batching or reordering. Discarding the `Editor`
//! (via [`Editor::rollback`], or simply dropping it) leaves the base hive
//! untouched.

use crate::error::{RegistryError, Result};
use crate::hive::Hive;
use crate::overlay::{ChildRef, Overlay};
use crate::utils::now_filetime;
use crate::value::ValueData;

/// Options for [`Editor::create_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateKeyOptions {
    /// Fail with [`RegistryError::Exists`] if the final path segment
    /// already exists, instead of treating creation as a no-op.
    pub must_not_exist: bool,
}

/// Options for [`Editor::delete_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteKeyOptions {
    /// Permit deleting a key that still has subkeys or values.
    pub recursive: bool,
}

/// A transactional editor bound to one overlay.
pub struct Editor<'a> {
    overlay: Overlay<'a>,
}

fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        Vec::new()
    } else {
        path.split('\\').collect()
    }
}

impl<'a> Editor<'a> {
    /// Begins a transaction over `base`.
    pub fn begin(base: &'a Hive) -> Result<Self> {
        Ok(Self { overlay: Overlay::new(base)? })
    }

    /// Discards all pending edits. The base hive was never mutated, so
    /// this is equivalent to dropping the editor.
    pub fn rollback(self) {}

    /// Consumes the editor, returning the overlay for [`crate::writer`] to
    /// commit.
    pub fn into_overlay(self) -> Overlay<'a> {
        self.overlay
    }

    /// Resolves `path` to a child reference without materializing
    /// anything, or `None` if any segment is missing or deleted.
    fn resolve(&self, path: &str) -> Result<Option<ChildRef>> {
        let mut current = self.overlay.root();
        if !self.overlay.exists(current) {
            return Ok(None);
        }
        for segment in split_path(path) {
            match self.overlay.resolve_child(current, segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Materializes every segment of `path`, creating missing segments
    /// along the way. Returns the node id of the final segment.
    fn materialize_path(&mut self, path: &str) -> Result<crate::overlay::NodeId> {
        let mut current = self.overlay.materialize(self.overlay.root())?;
        self.overlay.set_root(ChildRef::Node(current));

        for segment in split_path(path) {
            let child_ref = self.overlay.resolve_child(ChildRef::Node(current), segment)?;
            let child_id = match child_ref {
                Some(existing) => self.overlay.materialize(existing)?,
                None => {
                    let id = self.overlay.new_node(segment);
                    self.overlay
                        .node_mut(current)
                        .children
                        .insert(segment, ChildRef::Node(id), false);
                    id
                }
            };
            current = child_id;
        }

        Ok(current)
    }

    /// Creates every missing segment of `path`. Fails with
    /// [`RegistryError::Exists`] only when `options.must_not_exist` is set
    /// and the full path already resolves to a live key.
    pub fn create_key(&mut self, path: &str, options: CreateKeyOptions) -> Result<()> {
        if options.must_not_exist {
            if let Some(existing) = self.resolve(path)? {
                if self.overlay.exists(existing) {
                    return Err(RegistryError::Exists(path.to_string()));
                }
            }
        }
        self.materialize_path(path)?;
        Ok(())
    }

    /// Marks the key at `path` deleted. With `options.recursive` unset,
    /// fails with [`RegistryError::NonEmpty`] if the key has any live
    /// subkeys or values.
    pub fn delete_key(&mut self, path: &str, options: DeleteKeyOptions) -> Result<()> {
        if path.is_empty() {
            return Err(RegistryError::InternalError("cannot delete the root key".into()));
        }

        let target = self
            .resolve(path)?
            .ok_or_else(|| RegistryError::not_found("key", path))?;
        let id = self.overlay.materialize(target)?;

        if !options.recursive {
            let node = self.overlay.node(id);
            if !node.children.is_empty() || !node.values.is_empty() {
                return Err(RegistryError::NonEmpty(path.to_string()));
            }
        }

        self.overlay.node_mut(id).deleted = true;

        let (parent_path, leaf) = split_parent(path);
        let parent_id = self.materialize_path(parent_path)?;
        self.overlay.node_mut(parent_id).children.remove(leaf);
        Ok(())
    }

    /// Sets (creating or replacing) a value under `path`. The empty name
    /// addresses the default value. Casing of an existing name is replaced
    /// by `name`'s casing only when they differ.
    pub fn set_value(&mut self, path: &str, name: &str, data: ValueData) -> Result<()> {
        let id = self.materialize_path(path)?;
        self.overlay.node_mut(id).values.insert(name, data, true);
        self.overlay.node_mut(id).last_written = now_filetime();
        Ok(())
    }

    /// Removes a value. Fails with [`RegistryError::NotFound`] if absent.
    pub fn delete_value(&mut self, path: &str, name: &str) -> Result<()> {
        let target = self
            .resolve(path)?
            .ok_or_else(|| RegistryError::not_found("key", path))?;
        let id = self.overlay.materialize(target)?;
        if !self.overlay.node_mut(id).values.remove(name) {
            return Err(RegistryError::not_found("value", name));
        }
        Ok(())
    }

    /// Sets the last-written timestamp of the key at `path` explicitly,
    /// overriding the "now at commit" default.
    pub fn set_timestamp(&mut self, path: &str, filetime: u64) -> Result<()> {
        let id = self.materialize_path(path)?;
        self.overlay.node_mut(id).last_written = filetime;
        Ok(())
    }
}

/// Splits `path` into `(parent_path, leaf_segment)`.
fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('\\') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::split_parent;

    #[test]
    fn split_parent_top_level() {
        assert_eq!(split_parent("Software"), ("", "Software"));
    }

    #[test]
    fn split_parent_nested() {
        assert_eq!(split_parent("Software\\Vendor\\App"), ("Software\\Vendor", "App"));
    }
}
