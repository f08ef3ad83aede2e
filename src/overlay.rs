//! Copy-on-write overlay over an immutable [`crate::hive::Hive`].
//!
//! Every key touched by an edit gets an [`OverlayNode`] keyed by its
//! original cell offset, or a synthetic [`NodeId`] for a brand-new key.
//! Reading a child walks: deleted → absent; present in the overlay →
//! served from the overlay's own maps; otherwise → served from the base
//! image. Materializing a node copies child *references*, never the bytes
//! beneath them, so an untouched subtree is never walked.

use crate::error::{RegistryError, Result};
use crate::hive::Hive;
use crate::utils::{fold_name, now_filetime};
use crate::value::ValueData;
use std::collections::HashMap;

/// Identifier for a key that exists only in the overlay (never written to
/// the base image).
pub type NodeId = u64;

/// A reference to a child key: either an untouched base-image cell offset
/// or another overlay node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildRef {
    /// Unmodified key, still resolved against the base image.
    Base(u32),
    /// Key materialized or created in the overlay.
    Node(NodeId),
}

/// A name-preserving, insertion-ordered map keyed by case-folded name.
///
/// Lookups are case-insensitive; the casing of the first insertion (or the
/// casing supplied on update, per [`crate::editor`]'s `set_value` rule) is
/// what iteration and re-export observe.
#[derive(Debug, Clone, Default)]
pub struct OrderedMap<V> {
    order: Vec<String>,
    entries: HashMap<String, (String, V)>,
}

impl<V> OrderedMap<V> {
    fn new() -> Self {
        Self { order: Vec::new(), entries: HashMap::new() }
    }

    /// Looks up a value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(&fold_name(name)).map(|(_, v)| v)
    }

    /// Inserts or replaces a value. When a name already exists under a
    /// different casing, `rename_casing` controls whether the stored
    /// display name is updated to the new casing.
    pub fn insert(&mut self, name: &str, value: V, rename_casing: bool) {
        let key = fold_name(name);
        if let Some((stored_name, stored_value)) = self.entries.get_mut(&key) {
            if rename_casing {
                *stored_name = name.to_string();
            }
            *stored_value = value;
        } else {
            self.order.push(key.clone());
            self.entries.insert(key, (name.to_string(), value));
        }
    }

    /// Removes a value by case-insensitive name, returning whether one was
    /// present.
    pub fn remove(&mut self, name: &str) -> bool {
        let key = fold_name(name);
        if self.entries.remove(&key).is_some() {
            self.order.retain(|k| k != &key);
            true
        } else {
            false
        }
    }

    /// Iterates entries in insertion order as `(display_name, value)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order.iter().map(|k| {
            let (name, value) = &self.entries[k];
            (name.as_str(), value)
        })
    }

    /// Returns true if no entries are present.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.order.len()
    }
}

/// A key materialized in the overlay.
#[derive(Debug, Clone)]
pub struct OverlayNode {
    /// Current display name (may differ from the base image if renamed by
    /// future editor operations; today only creation sets it).
    pub name: String,
    /// Last-written FILETIME; refreshed to "now" on any mutation that
    /// doesn't set it explicitly.
    pub last_written: u64,
    /// Children keyed by case-folded name.
    pub children: OrderedMap<ChildRef>,
    /// Values keyed by case-folded name (`""` is the default value).
    pub values: OrderedMap<ValueData>,
    /// Marks the key (and everything beneath it) as removed.
    pub deleted: bool,
    /// The base-image offset this node was materialized from, if any.
    pub base_offset: Option<u32>,
}

impl OverlayNode {
    fn new(name: &str, base_offset: Option<u32>) -> Self {
        Self {
            name: name.to_string(),
            last_written: now_filetime(),
            children: OrderedMap::new(),
            values: OrderedMap::new(),
            deleted: false,
            base_offset,
        }
    }
}

/// Copy-on-write view over a base [`Hive`], accumulating edits until
/// committed by [`crate::writer`].
pub struct Overlay<'a> {
    base: &'a Hive,
    nodes: HashMap<NodeId, OverlayNode>,
    /// Maps a base cell offset to the overlay node it materialized into,
    /// so repeated mutation of the same base key reuses one node.
    materialized: HashMap<u32, NodeId>,
    root: ChildRef,
    next_id: NodeId,
}

impl<'a> Overlay<'a> {
    /// Creates an overlay with no mutations yet; everything resolves
    /// straight through to `base`.
    pub fn new(base: &'a Hive) -> Result<Self> {
        let root_offset = base.root()?.offset;
        Ok(Self {
            base,
            nodes: HashMap::new(),
            materialized: HashMap::new(),
            root: ChildRef::Base(root_offset),
            next_id: 0,
        })
    }

    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Returns the root child reference.
    pub fn root(&self) -> ChildRef {
        self.root
    }

    /// Returns an overlay node by id.
    pub fn node(&self, id: NodeId) -> &OverlayNode {
        &self.nodes[&id]
    }

    /// Returns the base hive this overlay wraps.
    pub fn base(&self) -> &'a Hive {
        self.base
    }

    /// Materializes the node at `ref_`, copying the base key's children and
    /// values by reference if this is the first mutation of that key.
    /// Returns the resulting node id.
    pub fn materialize(&mut self, ref_: ChildRef) -> Result<NodeId> {
        match ref_ {
            ChildRef::Node(id) => Ok(id),
            ChildRef::Base(offset) => {
                if let Some(&id) = self.materialized.get(&offset) {
                    return Ok(id);
                }

                let base_key = self.base.get_key(offset)?;
                let mut node = OverlayNode::new(base_key.name(), Some(offset));
                node.last_written = base_key.last_written();

                for child in base_key.subkeys()? {
                    node.children.insert(child.name(), ChildRef::Base(child.offset), false);
                }
                for value in base_key.values()? {
                    node.values.insert(value.name(), value.data()?, false);
                }

                let id = self.fresh_id();
                self.nodes.insert(id, node);
                self.materialized.insert(offset, id);
                Ok(id)
            }
        }
    }

    /// Resolves a child reference by case-insensitive name, checking the
    /// overlay before falling back to the base image. Returns `None` if the
    /// parent has no such child, or if `ref_` names a deleted key.
    pub fn resolve_child(&self, parent: ChildRef, name: &str) -> Result<Option<ChildRef>> {
        match parent {
            ChildRef::Node(id) => {
                let node = &self.nodes[&id];
                if node.deleted {
                    return Ok(None);
                }
                Ok(node.children.get(name).copied())
            }
            ChildRef::Base(offset) => {
                if let Some(&id) = self.materialized.get(&offset) {
                    return self.resolve_child(ChildRef::Node(id), name);
                }
                let key = self.base.get_key(offset)?;
                match key.get_child(name) {
                    Ok(child) => Ok(Some(ChildRef::Base(child.offset))),
                    Err(RegistryError::NotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Returns true if `ref_` refers to a (non-deleted) key.
    pub fn exists(&self, ref_: ChildRef) -> bool {
        match ref_ {
            ChildRef::Node(id) => !self.nodes[&id].deleted,
            ChildRef::Base(_) => true,
        }
    }

    /// Creates a brand-new, empty overlay node not tied to any base key.
    pub fn new_node(&mut self, name: &str) -> NodeId {
        let id = self.fresh_id();
        self.nodes.insert(id, OverlayNode::new(name, None));
        id
    }

    /// Replaces the root reference. Used when `create_key("")` would
    /// otherwise have no parent to attach to — the root is always
    /// materialized up front by callers that need to mutate it.
    pub fn set_root(&mut self, ref_: ChildRef) {
        self.root = ref_;
    }

    /// Mutable access to a node, for editor operations.
    pub fn node_mut(&mut self, id: NodeId) -> &mut OverlayNode {
        self.nodes.get_mut(&id).unwrap()
    }

    /// All materialized-or-created node ids, for the writer's plan pass.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordered_map_preserves_insertion_order() {
        let mut map: OrderedMap<u32> = OrderedMap::new();
        map.insert("b", 2, false);
        map.insert("a", 1, false);
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn ordered_map_is_case_insensitive() {
        let mut map: OrderedMap<u32> = OrderedMap::new();
        map.insert("Foo", 1, false);
        assert_eq!(map.get("foo"), Some(&1));
        assert_eq!(map.get("FOO"), Some(&1));
    }

    #[test]
    fn ordered_map_rename_casing_updates_display_name() {
        let mut map: OrderedMap<u32> = OrderedMap::new();
        map.insert("foo", 1, false);
        map.insert("FOO", 2, true);
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["FOO"]);
        assert_eq!(map.get("foo"), Some(&2));
    }

    #[test]
    fn ordered_map_remove() {
        let mut map: OrderedMap<u32> = OrderedMap::new();
        map.insert("a", 1, false);
        assert!(map.remove("A"));
        assert!(map.is_empty());
    }
}
