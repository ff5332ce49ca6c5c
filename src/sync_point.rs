//! A single location in the tree: every query a caller has registered
//! interest in there, each with its own local cache.
//!
//! One `SyncPoint` can hold several [`View`]s at once -- a default
//! (unfiltered) view alongside one or more filtered ones, or several
//! differently filtered views side by side. A complete view shadows its
//! filtered siblings: once the default query has loaded everything at a
//! path, a filtered view there is redundant and new registrations are
//! served straight from the default view instead of opening another
//! server listen (spec.md §4.8).

use indexmap::IndexMap;

use crate::error::CancelError;
use crate::event::{Event, RegistrationId};
use crate::node::Node;
use crate::operation::Operation;
use crate::query::{Query, QueryKey, DEFAULT_QUERY_IDENTIFIER};
use crate::view::{CacheNode, View};
use crate::write_tree::WriteTreeRef;

/// The views registered at one path, keyed by their query's identifier
/// (`"default"` for the unfiltered view).
#[derive(Clone, Debug, Default)]
pub struct SyncPoint {
    views: IndexMap<String, View>,
}

impl SyncPoint {
    pub fn new() -> SyncPoint {
        SyncPoint {
            views: IndexMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.views.values().all(View::is_empty)
    }

    pub fn view_exists_for_query(&self, query: &Query) -> bool {
        self.views.contains_key(&query.query_identifier())
    }

    pub fn view_for_query(&self, query: &Query) -> Option<&View> {
        self.views.get(&query.query_identifier())
    }

    fn view_for_query_mut(&mut self, query: &Query) -> Option<&mut View> {
        self.views.get_mut(&query.query_identifier())
    }

    /// The first registered view that loads all data at this path, if
    /// any -- not necessarily the literal default query (an unbounded
    /// `orderByKey()` view qualifies too, per [`View::has_complete_view`]).
    pub fn get_complete_view(&self) -> Option<&View> {
        self.views.values().find(|view| view.has_complete_view())
    }

    /// Whether any registered view here loads all data -- the
    /// condition under which a filtered sibling's server listen can be
    /// skipped in favor of this one.
    pub fn has_complete_view(&self) -> bool {
        self.views.values().any(View::has_complete_view)
    }

    pub fn get_query_views(&self) -> impl Iterator<Item = &View> {
        self.views.values()
    }

    /// The authoritative value at `relative_path`, read off whichever
    /// registered view actually has a complete server cache.
    pub fn get_complete_server_cache(&self, relative_path: &crate::path::Path) -> Option<Node> {
        self.views
            .values()
            .find_map(|view| view.get_complete_server_cache(relative_path))
    }

    /// Adds `id` as a new registration on the view for `query`, creating
    /// the view (seeded from `server_snap`) if it doesn't exist yet.
    /// Returns whether a view was newly created, plus any events the
    /// fresh registration triggers immediately.
    pub fn add_event_registration(
        &mut self,
        id: RegistrationId,
        query: Query,
        server_snap: CacheNode,
        writes: &WriteTreeRef,
    ) -> (bool, Vec<(RegistrationId, Event)>) {
        let identifier = query.query_identifier();
        let created = !self.views.contains_key(&identifier);
        if created {
            self.views
                .insert(identifier.clone(), View::new(query.clone(), server_snap, writes));
        }
        let view = self.views.get_mut(&identifier).expect("just inserted or pre-existing");
        let events = view.add_event_registration(id, query);
        (created, events)
    }

    /// Removes `registration_id` from every view it's registered on (or
    /// from all views, if `query` or `registration_id` is `None`),
    /// pruning any view that ends up with no registrations. A `query`
    /// whose identifier is the literal `"default"` sentinel is a
    /// meta-query: it targets every view at this Sync Point, not just
    /// the one actually keyed `"default"` (spec.md §4.7). Returns the
    /// queries of the views that were pruned entirely, plus the events
    /// synthesized (typically `Cancelled`, when `cancel_error` is set).
    pub fn remove_event_registration(
        &mut self,
        query: Option<&Query>,
        registration_id: Option<RegistrationId>,
        cancel_error: Option<&CancelError>,
    ) -> (Vec<Query>, Vec<(RegistrationId, Event)>) {
        let mut events = Vec::new();

        let identifiers: Vec<String> = match query {
            Some(query) if query.query_identifier() == DEFAULT_QUERY_IDENTIFIER => {
                self.views.keys().cloned().collect()
            }
            Some(query) => vec![query.query_identifier()],
            None => self.views.keys().cloned().collect(),
        };

        let mut removed_queries = Vec::new();
        for identifier in identifiers {
            if let Some(view) = self.views.get_mut(&identifier) {
                let (view_removed, view_events) = view.remove_event_registration(registration_id, cancel_error);
                events.extend(view_events);
                if !view_removed.is_empty() && view.is_empty() {
                    removed_queries.push(view.query().clone());
                }
            }
        }

        self.views.retain(|_, view| !view.is_empty());

        (removed_queries, events)
    }

    /// Applies `op` to every registered view, in registration order,
    /// returning the combined set of resulting events.
    pub fn apply_operation(
        &mut self,
        op: &Operation,
        writes: &WriteTreeRef,
        server_cache_override: Option<&Node>,
    ) -> Vec<(RegistrationId, Event)> {
        let mut events = Vec::new();
        for view in self.views.values_mut() {
            events.extend(view.apply_operation(op, writes, server_cache_override));
        }
        events
    }

    /// Applies `op` only to the view for `query` -- used when dispatch
    /// is driven by a tagged server response naming one specific query.
    pub fn apply_operation_to_view(
        &mut self,
        query: &Query,
        op: &Operation,
        writes: &WriteTreeRef,
        server_cache_override: Option<&Node>,
    ) -> Vec<(RegistrationId, Event)> {
        match self.view_for_query_mut(query) {
            Some(view) => view.apply_operation(op, writes, server_cache_override),
            None => Vec::new(),
        }
    }

    pub fn query_key_for(query: &Query) -> QueryKey {
        QueryKey::new(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::OperationSource;
    use crate::path::Path;
    use crate::query::QueryParams;
    use crate::write_tree::WriteTree;

    fn writes_ref() -> WriteTreeRef {
        WriteTree::new().child_writes(&Path::root())
    }

    #[test]
    fn registering_first_query_creates_a_view() {
        let mut point = SyncPoint::new();
        let query = Query::default_at(Path::root());
        let (created, _events) =
            point.add_event_registration(RegistrationId::new(1), query.clone(), CacheNode::empty(), &writes_ref());
        assert!(created);
        assert!(point.view_exists_for_query(&query));
    }

    #[test]
    fn second_registration_on_same_query_reuses_the_view() {
        let mut point = SyncPoint::new();
        let query = Query::default_at(Path::root());
        point.add_event_registration(RegistrationId::new(1), query.clone(), CacheNode::empty(), &writes_ref());
        let (created, _events) =
            point.add_event_registration(RegistrationId::new(2), query, CacheNode::empty(), &writes_ref());
        assert!(!created);
    }

    #[test]
    fn distinct_queries_get_distinct_views() {
        let mut point = SyncPoint::new();
        let default_query = Query::default_at(Path::root());
        let filtered = Query::new(
            Path::root(),
            QueryParams {
                limit_to_first: Some(1),
                ..Default::default()
            },
        );
        point.add_event_registration(RegistrationId::new(1), default_query.clone(), CacheNode::empty(), &writes_ref());
        point.add_event_registration(RegistrationId::new(2), filtered.clone(), CacheNode::empty(), &writes_ref());
        assert!(point.view_exists_for_query(&default_query));
        assert!(point.view_exists_for_query(&filtered));
    }

    #[test]
    fn removing_last_registration_prunes_the_view() {
        let mut point = SyncPoint::new();
        let query = Query::default_at(Path::root());
        point.add_event_registration(RegistrationId::new(1), query.clone(), CacheNode::empty(), &writes_ref());
        point.remove_event_registration(Some(&query), Some(RegistrationId::new(1)), None);
        assert!(!point.view_exists_for_query(&query));
        assert!(point.is_empty());
    }

    #[test]
    fn has_complete_view_true_only_for_unfiltered_registration() {
        let mut point = SyncPoint::new();
        let filtered = Query::new(
            Path::root(),
            QueryParams {
                limit_to_first: Some(1),
                ..Default::default()
            },
        );
        point.add_event_registration(RegistrationId::new(1), filtered, CacheNode::empty(), &writes_ref());
        assert!(!point.has_complete_view());

        let default_query = Query::default_at(Path::root());
        point.add_event_registration(RegistrationId::new(2), default_query, CacheNode::empty(), &writes_ref());
        assert!(point.has_complete_view());
    }

    #[test]
    fn apply_operation_reaches_every_registered_view() {
        let mut point = SyncPoint::new();
        let default_query = Query::default_at(Path::root());
        let filtered = Query::new(
            Path::root(),
            QueryParams {
                limit_to_first: Some(1),
                ..Default::default()
            },
        );
        point.add_event_registration(RegistrationId::new(1), default_query, CacheNode::empty(), &writes_ref());
        point.add_event_registration(RegistrationId::new(2), filtered, CacheNode::empty(), &writes_ref());

        let op = Operation::Overwrite {
            source: OperationSource::Server,
            path: Path::root(),
            node: Node::leaf(1),
        };
        let events = point.apply_operation(&op, &writes_ref(), None);
        // Both views saw the overwrite and each has one registration.
        assert_eq!(events.len(), 2);
    }
}
