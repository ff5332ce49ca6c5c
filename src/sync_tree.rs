//! The top-level orchestrator: owns the persistent Sync Point tree and
//! the pending write log, and is the only thing a caller talks to.
//!
//! Dispatch walks `sync_point_tree` in lockstep with an operation's
//! path, narrowing both the server cache and the write-tree view one
//! key at a time via [`Operation::operation_for_child`] -- see
//! `apply_operation_to_sync_point_tree` below. Tagged server responses
//! skip that walk entirely: a tag identifies exactly one query at one
//! path, so the response is routed straight to that one View.

use std::collections::HashMap;

use crate::error::CancelError;
use crate::event::{Event, RegistrationId};
use crate::immutable_tree::ImmutableTree;
use crate::listen_provider::ListenProvider;
use crate::node::Node;
use crate::operation::{Operation, OperationSource, QueryTag};
use crate::path::Path;
use crate::query::{Query, QueryKey, DEFAULT_QUERY_IDENTIFIER};
use crate::sync_point::SyncPoint;
use crate::view::CacheNode;
use crate::write_tree::{PendingWrite, WriteTree};

/// The sync core's entry point. Generic over the transport it drives
/// through `P: ListenProvider` -- a caller not wired up to a real
/// server (tests, an offline cache) can use
/// [`crate::listen_provider::NullListenProvider`].
pub struct SyncTree<P: ListenProvider> {
    sync_point_tree: ImmutableTree<SyncPoint>,
    pending_write_tree: WriteTree,
    next_write_id: u64,
    query_to_tag: HashMap<QueryKey, QueryTag>,
    tag_to_query: HashMap<QueryTag, Query>,
    next_query_tag: u64,
    listen_provider: P,
}

impl<P: ListenProvider> SyncTree<P> {
    pub fn new(listen_provider: P) -> SyncTree<P> {
        SyncTree {
            sync_point_tree: ImmutableTree::empty(),
            pending_write_tree: WriteTree::new(),
            next_write_id: 0,
            query_to_tag: HashMap::new(),
            tag_to_query: HashMap::new(),
            next_query_tag: 1,
            listen_provider,
        }
    }

    pub fn listen_provider(&self) -> &P {
        &self.listen_provider
    }

    fn allocate_write_id(&mut self) -> u64 {
        let id = self.next_write_id;
        self.next_write_id += 1;
        id
    }

    fn allocate_query_tag(&mut self) -> QueryTag {
        let id = self.next_query_tag;
        self.next_query_tag += 1;
        QueryTag::new(id)
    }

    // -- server-sourced, untagged (default listen) --------------------

    pub fn apply_server_overwrite(&mut self, path: Path, node: Node) -> Vec<(RegistrationId, Event)> {
        let op = Operation::Overwrite {
            source: OperationSource::Server,
            path,
            node,
        };
        self.dispatch(&op)
    }

    pub fn apply_server_merge(&mut self, path: Path, children: ImmutableTree<Node>) -> Vec<(RegistrationId, Event)> {
        let op = Operation::Merge {
            source: OperationSource::Server,
            path,
            children,
        };
        self.dispatch(&op)
    }

    pub fn apply_listen_complete(&mut self, path: Path) -> Vec<(RegistrationId, Event)> {
        let op = Operation::ListenComplete {
            source: OperationSource::Server,
            path,
        };
        self.dispatch(&op)
    }

    fn dispatch(&mut self, op: &Operation) -> Vec<(RegistrationId, Event)> {
        let writes = self.pending_write_tree.child_writes(&Path::root());
        let (new_tree, events) = apply_operation_to_sync_point_tree(&self.sync_point_tree, op, &writes, None);
        self.sync_point_tree = new_tree;
        events
    }

    // -- server-sourced, tagged (filtered listen) ----------------------

    pub fn apply_tagged_query_overwrite(&mut self, tag: QueryTag, node: Node) -> Vec<(RegistrationId, Event)> {
        let Some(query) = self.tag_to_query.get(&tag).cloned() else {
            log::debug!("apply_tagged_query_overwrite: unknown tag {tag}, ignoring");
            return Vec::new();
        };
        let op = Operation::Overwrite {
            source: OperationSource::ServerTaggedQuery(tag),
            path: query.path.clone(),
            node,
        };
        self.apply_tagged_operation(&query, &op)
    }

    pub fn apply_tagged_query_merge(
        &mut self,
        tag: QueryTag,
        children: ImmutableTree<Node>,
    ) -> Vec<(RegistrationId, Event)> {
        let Some(query) = self.tag_to_query.get(&tag).cloned() else {
            log::debug!("apply_tagged_query_merge: unknown tag {tag}, ignoring");
            return Vec::new();
        };
        let op = Operation::Merge {
            source: OperationSource::ServerTaggedQuery(tag),
            path: query.path.clone(),
            children,
        };
        self.apply_tagged_operation(&query, &op)
    }

    pub fn apply_tagged_listen_complete(&mut self, tag: QueryTag) -> Vec<(RegistrationId, Event)> {
        let Some(query) = self.tag_to_query.get(&tag).cloned() else {
            log::debug!("apply_tagged_listen_complete: unknown tag {tag}, ignoring");
            return Vec::new();
        };
        let op = Operation::ListenComplete {
            source: OperationSource::ServerTaggedQuery(tag),
            path: query.path.clone(),
        };
        self.apply_tagged_operation(&query, &op)
    }

    fn apply_tagged_operation(&mut self, query: &Query, op: &Operation) -> Vec<(RegistrationId, Event)> {
        let path = &query.path;
        let writes = self.pending_write_tree.child_writes(path);
        let mut sync_point = self.sync_point_tree.get(path).cloned().unwrap_or_default();
        let events = sync_point.apply_operation_to_view(query, op, &writes, None);
        self.sync_point_tree = self.sync_point_tree.set(path, sync_point);
        events
    }

    // -- user-sourced, optimistic local writes -------------------------

    pub fn apply_user_overwrite(
        &mut self,
        path: Path,
        node: Node,
        visible: bool,
    ) -> (u64, Vec<(RegistrationId, Event)>) {
        let write_id = self.allocate_write_id();
        self.pending_write_tree.add_overwrite(path.clone(), node.clone(), write_id, visible);
        if !visible {
            return (write_id, Vec::new());
        }
        let op = Operation::Overwrite {
            source: OperationSource::User,
            path,
            node,
        };
        (write_id, self.dispatch(&op))
    }

    pub fn apply_user_merge(
        &mut self,
        path: Path,
        children: std::collections::BTreeMap<std::sync::Arc<str>, Node>,
    ) -> (u64, Vec<(RegistrationId, Event)>) {
        let write_id = self.allocate_write_id();
        self.pending_write_tree.add_merge(path.clone(), children.clone(), write_id);

        let mut change_tree = ImmutableTree::empty();
        for (key, node) in &children {
            change_tree = change_tree.set(&Path::root().child(key), node.clone());
        }
        let op = Operation::Merge {
            source: OperationSource::User,
            path,
            children: change_tree,
        };
        (write_id, self.dispatch(&op))
    }

    /// Clears a previously issued write from the pending log and
    /// recomputes affected views. `revert` marks this as the write
    /// failing rather than being confirmed -- both cases remove the
    /// write identically; the flag is carried through so a caller
    /// downstream (e.g. a transaction retry) can tell them apart.
    pub fn ack_user_write(&mut self, write_id: u64, revert: bool) -> Vec<(RegistrationId, Event)> {
        let Some(write) = self.pending_write_tree.get_write(write_id).cloned() else {
            log::debug!("ack_user_write: write {write_id} is not pending, ignoring");
            return Vec::new();
        };
        let affected_tree = crate::write_tree::affected_tree_for_write(&write);

        if !self.pending_write_tree.remove_write(write_id) {
            return Vec::new();
        }

        let op = Operation::AckUserWrite {
            path: write.path,
            affected_tree,
            revert,
        };
        self.dispatch(&op)
    }

    // -- registrations --------------------------------------------------

    pub fn add_event_registration(&mut self, id: RegistrationId, query: Query) -> Vec<(RegistrationId, Event)> {
        let path = query.path.clone();
        let writes = self.pending_write_tree.child_writes(&path);
        let server_snap = self.assemble_server_snapshot(&path);

        let mut sync_point = self.sync_point_tree.get(&path).cloned().unwrap_or_default();
        let (created, mut events) = sync_point.add_event_registration(id, query.clone(), server_snap, &writes);
        self.sync_point_tree = self.sync_point_tree.set(&path, sync_point);

        // A complete view at this location or an ancestor already
        // subsumes anything we'd subscribe here -- spec.md §4.6 step 7.
        if created && !self.is_shadowed(&query) {
            events.extend(self.setup_listener(query));
        }
        events
    }

    pub fn remove_event_registration(
        &mut self,
        query: &Query,
        registration_id: Option<RegistrationId>,
        cancel_error: Option<&CancelError>,
    ) -> Vec<(RegistrationId, Event)> {
        let path = query.path.clone();
        let Some(mut sync_point) = self.sync_point_tree.get(&path).cloned() else {
            return Vec::new();
        };
        if query.query_identifier() != DEFAULT_QUERY_IDENTIFIER && !sync_point.view_exists_for_query(query) {
            return Vec::new();
        }

        let (removed_queries, mut events) = sync_point.remove_event_registration(Some(query), registration_id, cancel_error);

        if sync_point.is_empty() {
            self.sync_point_tree = self.sync_point_tree.remove(&path);
        } else {
            self.sync_point_tree = self.sync_point_tree.set(&path, sync_point);
        }

        let removing_default = removed_queries.iter().any(|q| q.params.loads_all_data());
        let covered = self.ancestor_has_complete_view(&path);

        if removing_default && !covered {
            events.extend(self.resume_shadowed_descendants(&path));
        }

        if !covered && !removed_queries.is_empty() && cancel_error.is_none() {
            if removing_default {
                self.teardown_listener(&query_for_listening(query));
            }
            for removed in &removed_queries {
                if !removed.params.loads_all_data() {
                    self.teardown_listener(removed);
                }
            }
        }

        for removed in &removed_queries {
            if !removed.params.loads_all_data() {
                if let Some(tag) = self.query_to_tag.remove(&QueryKey::new(removed)) {
                    self.tag_to_query.remove(&tag);
                }
            }
        }

        events
    }

    /// True iff some *strict* ancestor of `path` has a complete view --
    /// the condition under which a new registration at `path` is already
    /// shadowed and should not open its own server listen (spec.md §4.6
    /// step 7, §4.7 step 4).
    fn ancestor_has_complete_view(&self, path: &Path) -> bool {
        self.sync_point_tree
            .find_on_path(path, |walked, sync_point| {
                (walked.len() < path.len() && sync_point.has_complete_view()).then_some(())
            })
            .is_some()
    }

    /// True iff `query` is already covered by a complete view -- either
    /// at an ancestor, or by a different view at its own Sync Point (the
    /// case where a filtered query is registered after, or alongside, an
    /// already-complete sibling).
    fn is_shadowed(&self, query: &Query) -> bool {
        if self.ancestor_has_complete_view(&query.path) {
            return true;
        }
        self.sync_point_tree.get(&query.path).is_some_and(|sync_point| {
            sync_point
                .get_complete_view()
                .is_some_and(|view| view.query().query_identifier() != query.query_identifier())
        })
    }

    /// Restarts listens for every distinct view still registered at or
    /// below `path` now that the default listener covering them has been
    /// removed (spec.md §4.7 step 5).
    fn resume_shadowed_descendants(&mut self, path: &Path) -> Vec<(RegistrationId, Event)> {
        let subtree = self.sync_point_tree.subtree(path);
        let mut events = Vec::new();
        for query in distinct_views(&subtree) {
            events.extend(self.setup_listener(query));
        }
        events
    }

    fn setup_listener(&mut self, query: Query) -> Vec<(RegistrationId, Event)> {
        let events = self.start_listen(&query);

        let listen_query = query_for_listening(&query);
        if listen_query.params.is_default() {
            // A new complete listener shadows every other view at this
            // Sync Point and everything below it -- stop their now
            // redundant server listens (spec.md §4.8 step 3).
            self.shadow_descendants(&query);
        } else {
            debug_assert!(
                !self.sync_point_tree.get(&listen_query.path).is_some_and(SyncPoint::has_complete_view),
                "a new tagged listen should never be shadowed -- a complete view here should have pre-empted it"
            );
        }
        events
    }

    /// Starts (or restarts) a single listen for `query`, assigning it a
    /// fresh tag if it's filtered and doesn't already have one. Returns
    /// whatever bootstrap events the provider hands back for data it
    /// already has cached (spec.md §4.8 step 1).
    fn start_listen(&mut self, query: &Query) -> Vec<(RegistrationId, Event)> {
        let listen_query = query_for_listening(query);
        let hash = self.view_hash(query);
        if listen_query.params.is_default() {
            return self.listen_provider.start_listening(&listen_query, None, &hash);
        }

        let key = QueryKey::new(&listen_query);
        let tag = match self.query_to_tag.get(&key).copied() {
            Some(tag) => tag,
            None => {
                let tag = self.allocate_query_tag();
                self.query_to_tag.insert(key, tag);
                self.tag_to_query.insert(tag, listen_query.clone());
                tag
            }
        };
        self.listen_provider.start_listening(&listen_query, Some(tag.value()), &hash)
    }

    /// The content hash of `query`'s own view's server cache, or the
    /// empty node's hash if the view doesn't exist yet or nothing has
    /// arrived -- fed to the transport as spec.md §4.8's `hashFn` so it
    /// can skip re-sending data the client already has.
    fn view_hash(&self, query: &Query) -> String {
        self.sync_point_tree
            .get(&query.path)
            .and_then(|sync_point| sync_point.view_for_query(query))
            .map(|view| view.server_cache().hash())
            .unwrap_or_else(|| Node::empty().hash())
    }

    /// Stops every listen shadowed by the complete view just installed at
    /// `query.path`: its filtered siblings at the same Sync Point, and
    /// every distinct view strictly below it.
    fn shadow_descendants(&mut self, query: &Query) {
        let subtree = self.sync_point_tree.subtree(&query.path);
        let mut to_stop = Vec::new();

        if let Some(sync_point) = subtree.value() {
            for view in sync_point.get_query_views() {
                if view.query().query_identifier() != query.query_identifier() {
                    to_stop.push(view.query().clone());
                }
            }
        }
        for child in subtree.children().values() {
            to_stop.extend(distinct_views(child));
        }

        for stopped in to_stop {
            log::trace!("stopping {} listen shadowed by new complete view at {}", stopped.path, query.path);
            self.teardown_listener(&stopped);
        }
    }

    fn teardown_listener(&mut self, query: &Query) {
        let listen_query = query_for_listening(query);
        if listen_query.params.is_default() {
            self.listen_provider.stop_listening(&listen_query, None);
            return;
        }

        let key = QueryKey::new(&listen_query);
        if let Some(tag) = self.query_to_tag.remove(&key) {
            self.tag_to_query.remove(&tag);
            self.listen_provider.stop_listening(&listen_query, Some(tag.value()));
        }
    }

    // -- reads ------------------------------------------------------------

    /// The authoritative-plus-optimistic value at `path`, assembled from
    /// whatever complete server caches and pending writes this tree
    /// currently has. `None` if not enough is known to answer.
    pub fn calc_complete_event_cache(&self, path: &Path) -> Option<Node> {
        let server_cache = self.complete_server_cache_for(path);
        self.pending_write_tree.calc_complete_event_cache(path, server_cache, None, true)
    }

    fn complete_server_cache_for(&self, path: &Path) -> Option<Node> {
        self.sync_point_tree
            .find_on_path(path, |walked, sync_point| sync_point.get_complete_server_cache(&path.relative_to(walked)))
    }

    /// Seeds a fresh registration's server cache: a complete cache from
    /// an ancestor if one covers `path` outright, otherwise whatever can
    /// be spliced together from `path`'s immediate children that each
    /// already have a complete cache of their own, marked incomplete
    /// (spec.md §4.6 step 3).
    fn assemble_server_snapshot(&self, path: &Path) -> CacheNode {
        if let Some(node) = self.complete_server_cache_for(path) {
            return CacheNode::complete(node);
        }

        let subtree = self.sync_point_tree.subtree(path);
        let mut node = Node::empty();
        let mut assembled_any = false;
        for (key, child_tree) in subtree.children() {
            if let Some(child_node) = child_tree
                .value()
                .and_then(|sync_point| sync_point.get_complete_server_cache(&Path::root()))
            {
                node = node.update_immediate_child(key, child_node);
                assembled_any = true;
            }
        }

        if assembled_any {
            CacheNode::incomplete(node)
        } else {
            CacheNode::empty()
        }
    }

    pub fn pending_writes(&self) -> &[PendingWrite] {
        self.pending_write_tree.writes()
    }
}

/// Canonicalizes `query` to what should actually be requested from the
/// transport: an ordering-only query (no bound, no limit) loads all
/// data just like the literal default, so it's sent as the default
/// listen -- the asymmetry spec.md §4.8 calls out and DESIGN.md records
/// as a deliberate non-unification.
fn query_for_listening(query: &Query) -> Query {
    if query.params.loads_all_data() {
        query.get_ref()
    } else {
        query.clone()
    }
}

/// Every distinct view in `tree`: a node with a complete view contributes
/// just that one view (it already subsumes whatever is below it); a node
/// without one contributes its own filtered views plus its children's
/// results. Used both to find what a new complete listener shadows
/// (spec.md §4.8 step 3) and what needs resuming once one is removed
/// (spec.md §4.7 step 5).
fn distinct_views(tree: &ImmutableTree<SyncPoint>) -> Vec<Query> {
    tree.fold(&|_relative_path, sync_point, child_results: Vec<Vec<Query>>| match sync_point {
        Some(sync_point) => match sync_point.get_complete_view() {
            Some(complete) => vec![complete.query().clone()],
            None => sync_point
                .get_query_views()
                .map(|view| view.query().clone())
                .chain(child_results.into_iter().flatten())
                .collect(),
        },
        None => child_results.into_iter().flatten().collect(),
    })
}

/// Applies `operation` to every Sync Point it reaches, walking
/// `tree` one path segment at a time. Descent uses
/// [`Operation::operation_for_child`] as the single source of truth for
/// which children are affected; a node's own Sync Point is updated
/// *after* its children's, so the returned events come out
/// deepest-first.
fn apply_operation_to_sync_point_tree(
    tree: &ImmutableTree<SyncPoint>,
    operation: &Operation,
    writes: &crate::write_tree::WriteTreeRef,
    server_cache: Option<Node>,
) -> (ImmutableTree<SyncPoint>, Vec<(RegistrationId, Event)>) {
    let server_cache = server_cache.or_else(|| {
        tree.value()
            .and_then(|sync_point| sync_point.get_complete_server_cache(&Path::root()))
    });

    let mut updated = tree.clone();
    let mut events = Vec::new();

    let keys_to_visit: Vec<std::sync::Arc<str>> = match operation.path().front() {
        Some(front) => vec![std::sync::Arc::from(front)],
        None => tree.children().keys().cloned().collect(),
    };

    for key in keys_to_visit {
        let Some(child_op) = operation.operation_for_child(&key) else {
            continue;
        };
        let child_tree = tree.children().get(&key).cloned().unwrap_or_default();
        let child_server_cache = server_cache.as_ref().map(|node| node.get_immediate_child(&key));
        let child_writes = writes.child(&key);

        let (new_child_tree, child_events) =
            apply_operation_to_sync_point_tree(&child_tree, &child_op, &child_writes, child_server_cache);
        updated = updated.set_child(&key, new_child_tree);
        events.extend(child_events);
    }

    if let Some(sync_point) = tree.value() {
        let mut sync_point = sync_point.clone();
        let own_events = sync_point.apply_operation(operation, writes, server_cache.as_ref());
        updated = updated.set_value(Some(sync_point));
        events.extend(own_events);
    }

    (updated, events)
}
