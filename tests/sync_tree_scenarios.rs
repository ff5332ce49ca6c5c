//! End-to-end scenarios wired through a full `SyncTree` + `ListenProvider`
//! pair, covering the six numbered scenarios and the boundary conditions
//! from spec.md §8 that need more than one module in isolation.

use synctree::{
    CancelError, Event, ImmutableTree, Node, Path, Query, QueryParams, RegistrationId, SyncTree,
};
use synctree::listen_provider::NullListenProvider;
use synctree::query::OrderBy;

fn tree() -> SyncTree<NullListenProvider> {
    SyncTree::new(NullListenProvider::new())
}

fn value_events(events: &[(RegistrationId, Event)], id: RegistrationId) -> Vec<&Node> {
    events
        .iter()
        .filter_map(|(reg, event)| {
            if *reg != id {
                return None;
            }
            match event {
                Event::ValueChanged { node, .. } => Some(node),
                _ => None,
            }
        })
        .collect()
}

/// Scenario 1 -- optimistic-then-ack: a user write, then the server
/// confirming the same value, then acking the write, should settle on
/// exactly the confirmed value with no further change visible.
#[test]
fn scenario_1_optimistic_then_ack() {
    let mut t = tree();
    let reg = RegistrationId::new(1);
    t.add_event_registration(reg, Query::default_at(Path::parse("a")));

    let (write_id, events) = t.apply_user_overwrite(Path::parse("a"), Node::leaf(1), true);
    assert_eq!(value_events(&events, reg), vec![&Node::leaf(1)]);

    let events = t.apply_server_overwrite(Path::parse("a"), Node::leaf(1));
    // The server's value matches what's already visible locally; no new
    // value event need be manufactured, but reconciliation must not
    // introduce a *different* one either.
    for node in value_events(&events, reg) {
        assert_eq!(node, &Node::leaf(1));
    }

    let events = t.ack_user_write(write_id, false);
    for node in value_events(&events, reg) {
        assert_eq!(node, &Node::leaf(1));
    }
    assert_eq!(t.calc_complete_event_cache(&Path::parse("a")), Some(Node::leaf(1)));
}

/// Scenario 2 -- revert: an optimistic write is visible immediately, and
/// reverting it falls back to whatever the server actually holds (or
/// empty, if nothing has arrived yet).
#[test]
fn scenario_2_revert_falls_back_to_prior_state() {
    let mut t = tree();
    let reg = RegistrationId::new(1);
    t.add_event_registration(reg, Query::default_at(Path::parse("a")));

    let (write_id, events) = t.apply_user_overwrite(Path::parse("a"), Node::leaf(9), true);
    assert_eq!(value_events(&events, reg), vec![&Node::leaf(9)]);

    let events = t.ack_user_write(write_id, true);
    assert_eq!(value_events(&events, reg), vec![&Node::empty()]);
    assert_eq!(t.calc_complete_event_cache(&Path::parse("a")), Some(Node::empty()));
}

/// Scenario 3 -- shadowing: a filtered listen's server subscription must
/// stop once a default (unfiltered) query is registered at the same
/// path, and the default subscription alone must then feed both views.
#[test]
fn scenario_3_default_registration_shadows_filtered_listen() {
    let mut t = tree();
    let filtered_reg = RegistrationId::new(1);
    let default_reg = RegistrationId::new(2);

    let filtered = Query::new(
        Path::parse("a"),
        QueryParams {
            order_by: Some(OrderBy::Child(std::sync::Arc::from("k"))),
            limit_to_first: Some(1),
            ..Default::default()
        },
    );
    t.add_event_registration(filtered_reg, filtered.clone());
    assert_eq!(t.listen_provider().active_listens().len(), 1);

    t.add_event_registration(default_reg, Query::default_at(Path::parse("a")));
    // The filtered listen's own server subscription was torn down; only
    // the default's untagged listen remains.
    assert_eq!(t.listen_provider().active_listens(), &[(Path::parse("a"), None)]);

    let events = t.apply_server_overwrite(
        Path::parse("a"),
        Node::from_children([(std::sync::Arc::from("x"), Node::leaf(1))]),
    );
    // Both registrations are fed from the single default subscription.
    assert!(events.iter().any(|(id, _)| *id == filtered_reg));
    assert!(events.iter().any(|(id, _)| *id == default_reg));
}

/// Scenario 4 -- tag reuse after removal: a fresh filtered registration
/// at a path that previously held a (now-removed) filtered registration
/// must get a strictly greater tag, never the recycled one.
#[test]
fn scenario_4_tag_is_not_reused_after_removal() {
    let mut t = tree();
    let q1 = Query::new(
        Path::parse("a"),
        QueryParams {
            limit_to_first: Some(1),
            ..Default::default()
        },
    );
    let reg1 = RegistrationId::new(1);
    t.add_event_registration(reg1, q1.clone());
    let first_tag = t.listen_provider().active_listens()[0].1;
    assert_eq!(first_tag, Some(1));

    t.remove_event_registration(&q1, Some(reg1), None);
    assert!(t.listen_provider().active_listens().is_empty());

    let q2 = Query::new(
        Path::parse("a"),
        QueryParams {
            limit_to_first: Some(2),
            ..Default::default()
        },
    );
    let reg2 = RegistrationId::new(2);
    t.add_event_registration(reg2, q2);
    let second_tag = t.listen_provider().active_listens()[0].1;
    assert!(second_tag.unwrap() > first_tag.unwrap());
}

/// Scenario 5 -- incomplete assembled cache: a parent with no data of its
/// own, but two children that each have a complete server cache, should
/// seed a new registration from exactly those children, flagged
/// incomplete, and only promote to complete once the parent's own
/// `listen_complete` arrives.
#[test]
fn scenario_5_assembled_cache_promotes_on_listen_complete() {
    let mut t = tree();
    t.add_event_registration(RegistrationId::new(1), Query::default_at(Path::parse("a/b")));
    t.apply_server_overwrite(Path::parse("a/b"), Node::leaf("b-value"));
    t.add_event_registration(RegistrationId::new(2), Query::default_at(Path::parse("a/c")));
    t.apply_server_overwrite(Path::parse("a/c"), Node::leaf("c-value"));

    // Nothing has arrived for /a itself, so the complete cache isn't
    // known yet even though both children are fully populated.
    assert_eq!(t.calc_complete_event_cache(&Path::parse("a")), None);

    let reg = RegistrationId::new(3);
    let events = t.add_event_registration(reg, Query::default_at(Path::parse("a")));
    // A new registration seeded from two complete children still sees a
    // value -- it's just not marked complete in the cache used for
    // transaction purposes until listen_complete arrives.
    assert!(!events.is_empty());

    t.apply_listen_complete(Path::parse("a"));
    let node = t.calc_complete_event_cache(&Path::parse("a")).unwrap();
    assert_eq!(node.get_immediate_child("b"), Node::leaf("b-value"));
    assert_eq!(node.get_immediate_child("c"), Node::leaf("c-value"));
}

/// Scenario 6 -- tagged drop: a tagged update addressed to a tag that is
/// no longer registered (the query was already removed) is dropped
/// silently, with no effect on any other state.
#[test]
fn scenario_6_tagged_update_for_unknown_tag_is_dropped() {
    let mut t = tree();
    let before = t.calc_complete_event_cache(&Path::parse("a"));

    let events = t.apply_tagged_query_overwrite(synctree::QueryTag::new(42), Node::leaf(1));
    assert!(events.is_empty());
    assert_eq!(t.calc_complete_event_cache(&Path::parse("a")), before);
}

/// Boundary: registering the first query at a path opens exactly one
/// server listen; a second, different filtered query at the same path
/// opens a second listen only because neither shadows the other.
#[test]
fn boundary_distinct_filtered_queries_each_get_their_own_listen() {
    let mut t = tree();
    let a = Query::new(
        Path::parse("p"),
        QueryParams {
            limit_to_first: Some(1),
            ..Default::default()
        },
    );
    let b = Query::new(
        Path::parse("p"),
        QueryParams {
            limit_to_first: Some(2),
            ..Default::default()
        },
    );
    t.add_event_registration(RegistrationId::new(1), a);
    assert_eq!(t.listen_provider().active_listens().len(), 1);
    t.add_event_registration(RegistrationId::new(2), b);
    assert_eq!(t.listen_provider().active_listens().len(), 2);
}

/// Boundary: an operation at the root with an empty path visits every
/// Sync Point in the tree exactly once.
#[test]
fn boundary_root_operation_reaches_every_sync_point() {
    let mut t = tree();
    t.add_event_registration(RegistrationId::new(1), Query::default_at(Path::parse("a")));
    t.add_event_registration(RegistrationId::new(2), Query::default_at(Path::parse("b")));
    t.add_event_registration(RegistrationId::new(3), Query::default_at(Path::parse("a/x")));

    let events = t.apply_server_overwrite(
        Path::root(),
        Node::from_children([
            (std::sync::Arc::from("a"), Node::from_children([(std::sync::Arc::from("x"), Node::leaf(5))])),
            (std::sync::Arc::from("b"), Node::leaf(2)),
        ]),
    );
    assert!(events.iter().any(|(id, _)| *id == RegistrationId::new(1)));
    assert!(events.iter().any(|(id, _)| *id == RegistrationId::new(2)));
    assert!(events.iter().any(|(id, _)| *id == RegistrationId::new(3)));
}

/// Registering a default query at a path currently holding only filtered
/// queries stops each filtered listen and starts one default listen
/// (the reverse-order variant of scenario 3).
#[test]
fn boundary_default_after_multiple_filtered_collapses_to_one_listen() {
    let mut t = tree();
    let a = Query::new(
        Path::parse("p"),
        QueryParams {
            limit_to_first: Some(1),
            ..Default::default()
        },
    );
    let b = Query::new(
        Path::parse("p"),
        QueryParams {
            limit_to_last: Some(1),
            ..Default::default()
        },
    );
    t.add_event_registration(RegistrationId::new(1), a);
    t.add_event_registration(RegistrationId::new(2), b);
    assert_eq!(t.listen_provider().active_listens().len(), 2);

    t.add_event_registration(RegistrationId::new(3), Query::default_at(Path::parse("p")));
    assert_eq!(t.listen_provider().active_listens(), &[(Path::parse("p"), None)]);
}

/// Removing the default registration that was shadowing a filtered
/// sibling resumes that sibling's own server listen.
#[test]
fn removing_default_resumes_shadowed_filtered_listen() {
    let mut t = tree();
    let filtered = Query::new(
        Path::parse("p"),
        QueryParams {
            limit_to_first: Some(1),
            ..Default::default()
        },
    );
    let default = Query::default_at(Path::parse("p"));

    t.add_event_registration(RegistrationId::new(1), filtered.clone());
    t.add_event_registration(RegistrationId::new(2), default.clone());
    assert_eq!(t.listen_provider().active_listens(), &[(Path::parse("p"), None)]);

    t.remove_event_registration(&default, Some(RegistrationId::new(2)), None);
    assert_eq!(t.listen_provider().active_listens().len(), 1);
    assert_eq!(t.listen_provider().active_listens()[0].0, Path::parse("p"));
    assert!(t.listen_provider().active_listens()[0].1.is_some());
}

/// A server-listen failure tears down every registration at that path
/// via a synthesized cancel event, not just the one that failed.
#[test]
fn server_listen_failure_cancels_every_registration_at_the_path() {
    let mut t = tree();
    let query = Query::default_at(Path::parse("a"));
    t.add_event_registration(RegistrationId::new(1), query.clone());
    t.add_event_registration(RegistrationId::new(2), query.clone());

    let error = CancelError::from_status("permission_denied");
    let events = t.remove_event_registration(&query, None, Some(&error));

    let cancelled: Vec<_> = events
        .iter()
        .filter(|(_, event)| matches!(event, Event::Cancelled { .. }))
        .collect();
    assert_eq!(cancelled.len(), 2);
}

/// A merge with no changed children is a no-op: it produces no events
/// and leaves the materialized value untouched.
#[test]
fn merge_with_no_children_is_a_no_op() {
    let mut t = tree();
    t.add_event_registration(RegistrationId::new(1), Query::default_at(Path::parse("a")));
    t.apply_server_overwrite(Path::parse("a"), Node::leaf(1));

    let events = t.apply_server_merge(Path::parse("a"), ImmutableTree::empty());
    assert!(events.is_empty());
    assert_eq!(t.calc_complete_event_cache(&Path::parse("a")), Some(Node::leaf(1)));
}
