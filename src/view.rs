//! Per-query materialization: a server cache, an optimistic-write
//! overlay, and the change synthesis that turns one into events.
//!
//! Named `View`/`ViewCache`/`CacheNode` to match the roles spec.md §1
//! delegates to this layer: ordering/priority policy within a single
//! query is out of scope, so the "filter" here is just `query`'s
//! presence for bookkeeping -- children are always compared in the
//! lexicographic order `Node` already stores them in.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::CancelError;
use crate::event::{Event, EventRegistration, RegistrationId};
use crate::node::Node;
use crate::operation::Operation;
use crate::path::Path;
use crate::query::Query;
use crate::write_tree::WriteTreeRef;

/// A node plus whether it's known to be the complete, authoritative
/// value for its location (as opposed to a partial/assembled guess).
#[derive(Clone, Debug, PartialEq)]
pub struct CacheNode {
    pub node: Node,
    pub complete: bool,
}

impl CacheNode {
    pub fn empty() -> CacheNode {
        CacheNode {
            node: Node::empty(),
            complete: false,
        }
    }

    pub fn complete(node: Node) -> CacheNode {
        CacheNode {
            node,
            complete: true,
        }
    }

    pub fn incomplete(node: Node) -> CacheNode {
        CacheNode {
            node,
            complete: false,
        }
    }
}

/// The two caches a View tracks: the raw server-only snapshot (used to
/// seed descendant registrations and to answer `get_complete_server_cache`),
/// and the locally-visible snapshot with pending writes overlaid (used
/// to synthesize events).
#[derive(Clone, Debug, PartialEq)]
pub struct ViewCache {
    pub server_snap: CacheNode,
    pub event_snap: CacheNode,
}

/// A single query's materialized result, local caches, and registered
/// callback sites.
#[derive(Clone, Debug)]
pub struct View {
    query: Query,
    cache: ViewCache,
    registrations: Vec<EventRegistration>,
}

impl View {
    /// Builds a new View seeded from `server_snap`, with `writes`
    /// overlaid to produce the initial event cache. Carries no
    /// registrations yet -- callers attach the first one with
    /// [`View::add_event_registration`].
    pub fn new(query: Query, server_snap: CacheNode, writes: &WriteTreeRef) -> View {
        let event_snap = recompute_event_snap(&server_snap, writes);
        View {
            query,
            cache: ViewCache {
                server_snap,
                event_snap,
            },
            registrations: Vec::new(),
        }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn server_cache(&self) -> &Node {
        &self.cache.server_snap.node
    }

    pub fn event_cache(&self) -> &Node {
        &self.cache.event_snap.node
    }

    /// Whether this query loads all data at its path -- the Glossary's
    /// "complete view", independent of whether the server has actually
    /// finished delivering it yet. A Sync Point with a complete view
    /// shadows filtered peers and descendants.
    pub fn has_complete_view(&self) -> bool {
        self.query.get_query_params().loads_all_data()
    }

    /// The authoritative value at `relative_path`, if the server cache
    /// is known to be complete. Used to seed a new Sync Point's
    /// assembled cache from an existing complete descendant.
    pub fn get_complete_server_cache(&self, relative_path: &Path) -> Option<Node> {
        if self.cache.server_snap.complete {
            Some(self.cache.server_snap.node.get_child_at_path(relative_path))
        } else {
            None
        }
    }

    pub fn view_exists_for_query(&self, query: &Query) -> bool {
        self.query == *query
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Applies `op` (already projected to be relative to this View's
    /// query path) and returns the resulting events, one entry per
    /// `(registration, event)` pair.
    pub fn apply_operation(
        &mut self,
        op: &Operation,
        writes: &WriteTreeRef,
        server_cache_override: Option<&Node>,
    ) -> Vec<(RegistrationId, Event)> {
        let old_event_node = self.cache.event_snap.node.clone();

        self.update_server_snap(op, server_cache_override);
        self.cache.event_snap = recompute_event_snap(&self.cache.server_snap, writes);

        let new_event_node = self.cache.event_snap.node.clone();
        if old_event_node == new_event_node {
            return Vec::new();
        }
        let events = diff_events(&old_event_node, &new_event_node);
        self.fan_out(events)
    }

    fn update_server_snap(&mut self, op: &Operation, server_cache_override: Option<&Node>) {
        match op {
            Operation::Overwrite { source, path, node } if source.is_from_server() => {
                let base = server_cache_override
                    .cloned()
                    .unwrap_or_else(|| self.cache.server_snap.node.clone());
                self.cache.server_snap.node = base.update_child_at_path(path, node.clone());
                if path.is_empty() {
                    self.cache.server_snap.complete = true;
                }
            }
            Operation::Merge {
                source,
                path,
                children,
            } if source.is_from_server() => {
                let base = server_cache_override
                    .cloned()
                    .unwrap_or_else(|| self.cache.server_snap.node.clone());
                let mut updated = base;
                for (relative, child) in children.collect_leaves() {
                    updated = updated.update_child_at_path(&path.join(&relative), child);
                }
                self.cache.server_snap.node = updated;
            }
            Operation::ListenComplete { source, .. } if source.is_from_server() => {
                self.cache.server_snap.complete = true;
            }
            // User-sourced writes and AckUserWrite never touch the
            // server snapshot; the event cache alone reflects them via
            // the (already updated) write-tree overlay.
            _ => {}
        }
    }

    /// Seeds events for a freshly attached registration from the
    /// current event cache.
    pub fn add_event_registration(
        &mut self,
        id: RegistrationId,
        query: Query,
    ) -> Vec<(RegistrationId, Event)> {
        self.registrations.push(EventRegistration { id, query });

        let node = self.cache.event_snap.node.clone();
        if node.is_empty() && !self.cache.event_snap.complete {
            return Vec::new();
        }
        vec![(
            id,
            Event::ValueChanged {
                path: Path::root(),
                node,
            },
        )]
    }

    /// Removes registrations matching `registration_id` (all of them if
    /// `None`), returning the ids removed and, if `cancel_error` is
    /// `Some`, one `Cancelled` event per removal.
    pub fn remove_event_registration(
        &mut self,
        registration_id: Option<RegistrationId>,
        cancel_error: Option<&CancelError>,
    ) -> (Vec<RegistrationId>, Vec<(RegistrationId, Event)>) {
        let mut removed = Vec::new();
        let mut events = Vec::new();

        self.registrations.retain(|registration| {
            let matches = registration_id.map_or(true, |id| id == registration.id);
            if matches {
                removed.push(registration.id);
                if let Some(error) = cancel_error {
                    events.push((
                        registration.id,
                        Event::Cancelled {
                            path: Path::root(),
                            query_identifier: registration.query.query_identifier(),
                            error: error.clone(),
                        },
                    ));
                }
            }
            !matches
        });

        (removed, events)
    }

    fn fan_out(&self, events: Vec<Event>) -> Vec<(RegistrationId, Event)> {
        let mut out = Vec::with_capacity(events.len() * self.registrations.len().max(1));
        for registration in &self.registrations {
            for event in &events {
                out.push((registration.id, event.clone()));
            }
        }
        out
    }
}

fn recompute_event_snap(server_snap: &CacheNode, writes: &WriteTreeRef) -> CacheNode {
    let overlaid = writes
        .calc_complete_event_cache(&Path::root(), Some(server_snap.node.clone()), None, true)
        .unwrap_or_else(|| server_snap.node.clone());
    let complete = server_snap.complete || writes.has_visible_root_overwrite();
    CacheNode {
        node: overlaid,
        complete,
    }
}

/// Diffs `old` against `new` (both rooted at the View's own query path)
/// into child-level events in the stable order spec.md §4.3 specifies
/// (added, changed, moved, removed), followed by a trailing
/// `ValueChanged` summarizing the new node. `ChildMoved` is never
/// produced -- see the module doc.
fn diff_events(old: &Node, new: &Node) -> Vec<Event> {
    let mut events = Vec::new();

    let old_keys: BTreeSet<Arc<str>> = old.child_keys().into_iter().collect();
    let new_keys: BTreeSet<Arc<str>> = new.child_keys().into_iter().collect();

    for key in new_keys.difference(&old_keys) {
        events.push(Event::ChildAdded {
            path: Path::root(),
            key: key.clone(),
            node: new.get_immediate_child(key),
        });
    }
    for key in old_keys.intersection(&new_keys) {
        let old_child = old.get_immediate_child(key);
        let new_child = new.get_immediate_child(key);
        if old_child != new_child {
            events.push(Event::ChildChanged {
                path: Path::root(),
                key: key.clone(),
                old: old_child,
                new: new_child,
            });
        }
    }
    for key in old_keys.difference(&new_keys) {
        events.push(Event::ChildRemoved {
            path: Path::root(),
            key: key.clone(),
            node: old.get_immediate_child(key),
        });
    }

    events.push(Event::ValueChanged {
        path: Path::root(),
        node: new.clone(),
    });

    events
}
