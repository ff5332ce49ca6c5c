//! The ordered log of pending, locally-issued writes awaiting server
//! acknowledgement, and path-relative views over it.
//!
//! A sorted log keyed by `write_id` is all this needs (spec.md §9); a
//! secondary path index is only worth adding if profiling ever shows the
//! linear scan in [`overlay_writes`] dominating, and nothing here
//! suggests it will for the write volumes a single client sees.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::immutable_tree::ImmutableTree;
use crate::node::Node;
use crate::path::Path;

/// The content of a single pending write: either a full replacement of
/// the subtree at the write's path, or a merge of named children.
#[derive(Clone, Debug, PartialEq)]
pub enum WriteContent {
    Overwrite(Node),
    Merge(BTreeMap<Arc<str>, Node>),
}

/// A user-issued mutation recorded locally while awaiting server
/// acknowledgement.
#[derive(Clone, Debug, PartialEq)]
pub struct PendingWrite {
    pub write_id: u64,
    pub path: Path,
    pub content: WriteContent,
    /// `false` hides the write from locally generated events; it still
    /// participates in `calc_complete_event_cache` for transactions.
    pub visible: bool,
}

/// The ordered log of pending writes, plus the cache-overlay logic used
/// both for local view materialization and for the transaction engine's
/// `calc_complete_event_cache`.
#[derive(Clone, Debug, Default)]
pub struct WriteTree {
    /// Sorted ascending by `write_id`; writes are appended with
    /// strictly increasing ids, so a push-then-occasional-sort keeps
    /// this cheap without a dedicated index.
    writes: Vec<PendingWrite>,
}

impl WriteTree {
    pub fn new() -> WriteTree {
        WriteTree { writes: Vec::new() }
    }

    pub fn writes(&self) -> &[PendingWrite] {
        &self.writes
    }

    fn insert_sorted(&mut self, write: PendingWrite) {
        let idx = self
            .writes
            .partition_point(|existing| existing.write_id < write.write_id);
        self.writes.insert(idx, write);
    }

    pub fn add_overwrite(&mut self, path: Path, node: Node, write_id: u64, visible: bool) {
        self.insert_sorted(PendingWrite {
            write_id,
            path,
            content: WriteContent::Overwrite(node),
            visible,
        });
    }

    /// User merges are always visible (spec.md §4.4).
    pub fn add_merge(&mut self, path: Path, children: BTreeMap<Arc<str>, Node>, write_id: u64) {
        self.insert_sorted(PendingWrite {
            write_id,
            path,
            content: WriteContent::Merge(children),
            visible: true,
        });
    }

    pub fn get_write(&self, write_id: u64) -> Option<&PendingWrite> {
        self.writes.iter().find(|w| w.write_id == write_id)
    }

    /// Removes `write_id` from the log. Returns whether removing it
    /// could alter any visible view: the write was visible, and no
    /// later write at an ancestor-or-equal path fully (via an
    /// `Overwrite`) covers it.
    pub fn remove_write(&mut self, write_id: u64) -> bool {
        let Some(idx) = self.writes.iter().position(|w| w.write_id == write_id) else {
            log::debug!("remove_write: write {write_id} is not pending, ignoring");
            return false;
        };
        let write = self.writes.remove(idx);

        if !write.visible {
            return false;
        }

        let covered = self.writes.iter().any(|later| {
            later.write_id > write_id
                && later.path.is_ancestor_of(&write.path)
                && matches!(later.content, WriteContent::Overwrite(_))
        });

        !covered
    }

    /// A view over this log relative to `path` -- the base that a
    /// descending dispatch or a newly registered View will keep
    /// narrowing with [`WriteTreeRef::child`].
    pub fn child_writes(&self, path: &Path) -> WriteTreeRef {
        WriteTreeRef {
            writes: Arc::from(self.writes.clone()),
            base: path.clone(),
        }
    }

    /// Overlays pending writes on top of `server_cache` to produce the
    /// complete value at `path`, for the transaction engine. Hidden
    /// writes are included by default (`includeHiddenSets=true` is the
    /// only value the source ever passes -- spec.md §9 Open Questions).
    pub fn calc_complete_event_cache(
        &self,
        path: &Path,
        server_cache: Option<Node>,
        write_ids_to_exclude: Option<&HashSet<u64>>,
        include_hidden_sets: bool,
    ) -> Option<Node> {
        overlay_writes(
            &self.writes,
            path,
            server_cache,
            write_ids_to_exclude,
            include_hidden_sets,
        )
    }
}

/// A path-relative view over a snapshot of the write log. Cheap to
/// narrow with [`WriteTreeRef::child`] as dispatch descends one key at
/// a time; all paths passed to its methods are relative to `base`.
#[derive(Clone, Debug)]
pub struct WriteTreeRef {
    writes: Arc<[PendingWrite]>,
    base: Path,
}

impl WriteTreeRef {
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn child(&self, key: &str) -> WriteTreeRef {
        WriteTreeRef {
            writes: Arc::clone(&self.writes),
            base: self.base.child(key),
        }
    }

    pub fn calc_complete_event_cache(
        &self,
        relative_path: &Path,
        server_cache: Option<Node>,
        write_ids_to_exclude: Option<&HashSet<u64>>,
        include_hidden_sets: bool,
    ) -> Option<Node> {
        overlay_writes(
            &self.writes,
            &self.base.join(relative_path),
            server_cache,
            write_ids_to_exclude,
            include_hidden_sets,
        )
    }

    /// Whether a visible pending write fully replaces the subtree at
    /// this ref's base path -- used by `View` to decide whether the
    /// event cache can be considered complete even before any server
    /// data has arrived.
    pub fn has_visible_root_overwrite(&self) -> bool {
        self.writes.iter().any(|write| {
            write.visible
                && write.path.is_ancestor_of(&self.base)
                && matches!(write.content, WriteContent::Overwrite(_))
        })
    }
}

/// The shared overlay algorithm: starting from `server_cache` (or
/// `None` if unknown), apply every relevant write in ascending
/// `write_id` order -- later writes win over earlier ones wherever
/// their regions overlap, matching how a client applies its own writes
/// in submission order.
fn overlay_writes(
    writes: &[PendingWrite],
    path: &Path,
    server_cache: Option<Node>,
    write_ids_to_exclude: Option<&HashSet<u64>>,
    include_hidden_sets: bool,
) -> Option<Node> {
    let mut node_at_path = server_cache;

    for write in writes {
        if let Some(exclude) = write_ids_to_exclude {
            if exclude.contains(&write.write_id) {
                continue;
            }
        }
        if !write.visible && !include_hidden_sets {
            continue;
        }

        if write.path.is_ancestor_of(path) {
            // `write.path` covers (or is) `path`: project the write's
            // content down to `path` and let it dominate whatever came
            // before.
            let rel = path.relative_to(&write.path);
            match &write.content {
                WriteContent::Overwrite(node) => {
                    node_at_path = Some(node.get_child_at_path(&rel));
                }
                WriteContent::Merge(children) => {
                    if let Some(base) = node_at_path.take() {
                        let mut updated = base;
                        for (key, child) in children {
                            updated = updated.update_child_at_path(&rel.child(key), child.clone());
                        }
                        node_at_path = Some(updated);
                    }
                }
            }
        } else if path.is_ancestor_of(&write.path) && path != &write.path {
            // `write.path` is a strict descendant of `path`: splice its
            // content into whatever node we've assembled so far.
            let offset = write.path.relative_to(path);
            if let Some(base) = node_at_path.take() {
                let updated = match &write.content {
                    WriteContent::Overwrite(node) => base.update_child_at_path(&offset, node.clone()),
                    WriteContent::Merge(children) => {
                        let mut updated = base;
                        for (key, child) in children {
                            updated = updated.update_child_at_path(&offset.child(key), child.clone());
                        }
                        updated
                    }
                };
                node_at_path = Some(updated);
            }
        }
    }

    node_at_path
}

/// Builds the `ImmutableTree<bool>` that `SyncTree::ack_user_write`
/// attaches to an `AckUserWrite` operation, marking which subpaths
/// (relative to `write.path`) the write actually touched.
pub fn affected_tree_for_write(write: &PendingWrite) -> ImmutableTree<bool> {
    match &write.content {
        WriteContent::Overwrite(_) => ImmutableTree::leaf(true),
        WriteContent::Merge(children) => {
            let mut tree = ImmutableTree::empty();
            for key in children.keys() {
                tree = tree.set(&Path::root().child(key), true);
            }
            tree
        }
    }
}
