//! Immutable snapshots of a database subtree.
//!
//! `Node` stands in for the external Node abstraction the specification
//! treats as a fixed contract (opaque content hash, structural child
//! access). Ordering and priority policy inside a single query view are
//! explicitly out of scope for the sync core, so children are stored in a
//! plain lexicographically-ordered map; a real client would likely swap this
//! implementation out for one backed by its own value/priority model without
//! touching anything above it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as Leaf;

#[derive(Clone, Debug, PartialEq)]
enum Inner {
    Empty,
    Leaf(Leaf),
    Children(BTreeMap<Arc<str>, Node>),
}

/// An immutable, structurally-shared snapshot of a subtree.
///
/// `Node` is value-equal by content: two nodes built through different
/// sequences of mutation but holding the same data compare equal and hash
/// identically.
#[derive(Clone, Debug, PartialEq)]
pub struct Node(Arc<Inner>);

impl Node {
    /// The canonical empty node.
    pub fn empty() -> Node {
        Node(Arc::new(Inner::Empty))
    }

    /// A leaf node holding a scalar or plain JSON value with no children.
    pub fn leaf(value: impl Into<Leaf>) -> Node {
        let value = value.into();
        if value.is_null() {
            Node::empty()
        } else {
            Node(Arc::new(Inner::Leaf(value)))
        }
    }

    /// Builds an interior node directly from a child map. Entries whose
    /// value is [`Node::empty`] are dropped, matching the invariant that an
    /// empty node never appears as a named child.
    pub fn from_children<I>(children: I) -> Node
    where
        I: IntoIterator<Item = (Arc<str>, Node)>,
    {
        let map: BTreeMap<Arc<str>, Node> = children
            .into_iter()
            .filter(|(_, child)| !child.is_empty())
            .collect();

        if map.is_empty() {
            Node::empty()
        } else {
            Node(Arc::new(Inner::Children(map)))
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(*self.0, Inner::Empty)
    }

    pub fn is_leaf(&self) -> bool {
        matches!(*self.0, Inner::Leaf(_))
    }

    pub fn leaf_value(&self) -> Option<&Leaf> {
        match &*self.0 {
            Inner::Leaf(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the immediate child named `key`, or [`Node::empty`] if no
    /// such child exists (leaves and the empty node have no children).
    pub fn get_immediate_child(&self, key: &str) -> Node {
        match &*self.0 {
            Inner::Children(children) => children.get(key).cloned().unwrap_or_else(Node::empty),
            _ => Node::empty(),
        }
    }

    /// Returns a new node with the child at `key` replaced by `child`.
    /// Setting a child to [`Node::empty`] removes it. Replacing a child
    /// under a leaf or empty node promotes the receiver to an interior node
    /// (the leaf value, if any, is discarded -- overwrites always win).
    pub fn update_immediate_child(&self, key: &str, child: Node) -> Node {
        let mut children = match &*self.0 {
            Inner::Children(children) => children.clone(),
            _ => BTreeMap::new(),
        };

        if child.is_empty() {
            children.remove(key);
        } else {
            children.insert(Arc::from(key), child);
        }

        if children.is_empty() {
            Node::empty()
        } else {
            Node(Arc::new(Inner::Children(children)))
        }
    }

    /// Walks `path` from the receiver, returning the node found there (or
    /// [`Node::empty`] if the path runs off the edge of the tree).
    pub fn get_child_at_path(&self, path: &crate::path::Path) -> Node {
        let mut node = self.clone();
        for segment in path.iter() {
            node = node.get_immediate_child(segment);
        }
        node
    }

    /// Returns a new node with `value` spliced in at `path`, creating
    /// intermediate interior nodes as needed.
    pub fn update_child_at_path(&self, path: &crate::path::Path, value: Node) -> Node {
        match path.front() {
            None => value,
            Some(key) => {
                let existing_child = self.get_immediate_child(key);
                let updated_child = existing_child.update_child_at_path(&path.pop_front(), value);
                self.update_immediate_child(key, updated_child)
            }
        }
    }

    /// Returns the set of immediate child keys, in lexicographic order.
    pub fn child_keys(&self) -> Vec<Arc<str>> {
        match &*self.0 {
            Inner::Children(children) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    pub fn child_count(&self) -> usize {
        match &*self.0 {
            Inner::Children(children) => children.len(),
            _ => 0,
        }
    }

    /// A content hash stable across process runs and independent of how the
    /// node was constructed -- only the data matters.
    pub fn hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hash_into(self, &mut hasher);
        hasher.finalize().to_hex().to_string()
    }
}

fn hash_into(node: &Node, hasher: &mut blake3::Hasher) {
    match &*node.0 {
        Inner::Empty => {
            hasher.update(b"E");
        }
        Inner::Leaf(value) => {
            hasher.update(b"L");
            // serde_json's serializer is stable for a given value, which is
            // all the determinism this hash needs.
            let bytes = serde_json::to_vec(value).expect("json values always serialize");
            hasher.update(&bytes);
        }
        Inner::Children(children) => {
            hasher.update(b"C");
            for (key, child) in children {
                hasher.update(key.as_bytes());
                hasher.update(b"\0");
                hash_into(child, hasher);
            }
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Node::empty()
    }
}
