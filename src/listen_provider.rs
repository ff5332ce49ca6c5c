//! The external boundary through which the sync core asks a transport
//! layer to open and close server subscriptions.
//!
//! Mirrors the shape spec.md §6 describes: two calls, no async, no
//! callback registration inside the trait itself -- results come back
//! later as ordinary `Operation`s fed into `SyncTree::apply_server_*`.
//! A transport crate built on top of this one owns the actual wire
//! protocol; this crate only needs to know when to start and stop
//! asking for data.

use crate::event::{Event, RegistrationId};
use crate::path::Path;
use crate::query::Query;

/// What `SyncTree` asks a transport to do when the first (or last)
/// registration for a query appears (or disappears).
///
/// spec.md §4.8's `createListenerForView` bundles a listen with a
/// `hashFn`/`onComplete` pair; this trait keeps the `hashFn` half
/// (`hash`, below) but not `onComplete` as a closure threaded through
/// the call. The core never invokes callbacks directly (spec.md §9,
/// "Observable events via return values") and the concurrency model
/// requires `onComplete` fire only from a later top-level dispatch
/// (spec.md §5) -- so a real transport reports listen completion and
/// failure the same way it reports ordinary data: by calling back into
/// `SyncTree::apply_listen_complete` / `apply_tagged_listen_complete` /
/// `remove_event_registration(.., cancel_error)` from its own event
/// loop, not synchronously from inside `start_listening`.
pub trait ListenProvider {
    /// Start listening for `query`. `tag` is `Some` for a filtered
    /// query that needs its responses disambiguated from other
    /// concurrent listens at the same path; `None` for the default,
    /// untagged listen. `hash` is the content hash of the view's
    /// current server cache (or the empty node's hash, if nothing has
    /// arrived yet) -- a transport can compare it against the server's
    /// own hash to skip re-sending data the client already has
    /// (spec.md §4.8's `hashFn`).
    ///
    /// Returns any events the transport can already answer from data it
    /// holds cached for this query without waiting on the network --
    /// these are folded into the caller's own return value the same way
    /// any other dispatch's events are.
    fn start_listening(&mut self, query: &Query, tag: Option<u64>, hash: &str) -> Vec<(RegistrationId, Event)>;

    /// Stop listening for `query`. Called when the last registration
    /// backing it is removed, or when a broader (complete) view makes
    /// a filtered listen redundant.
    fn stop_listening(&mut self, query: &Query, tag: Option<u64>);
}

/// A `ListenProvider` that does nothing -- useful for tests and for
/// embedding this crate purely as a local, offline reconciliation
/// engine with no transport attached.
#[derive(Clone, Debug, Default)]
pub struct NullListenProvider {
    started: Vec<(Path, Option<u64>)>,
    last_hash: Option<String>,
}

impl NullListenProvider {
    pub fn new() -> NullListenProvider {
        NullListenProvider {
            started: Vec::new(),
            last_hash: None,
        }
    }

    /// The `(path, tag)` pairs currently believed to be listening, in
    /// the order `start_listening` was called. Exposed for tests that
    /// want to assert on listen/unlisten behavior without a real
    /// transport.
    pub fn active_listens(&self) -> &[(Path, Option<u64>)] {
        &self.started
    }

    /// The hash passed to the most recent `start_listening` call, if
    /// any -- exposed so a test can assert the core is reporting the
    /// right server-cache hash without a real transport to observe it.
    pub fn last_hash(&self) -> Option<&str> {
        self.last_hash.as_deref()
    }
}

impl ListenProvider for NullListenProvider {
    fn start_listening(&mut self, query: &Query, tag: Option<u64>, hash: &str) -> Vec<(RegistrationId, Event)> {
        log::trace!("start_listening({}, tag={:?}, hash={hash})", query.path, tag);
        self.started.push((query.path.clone(), tag));
        self.last_hash = Some(hash.to_string());
        Vec::new()
    }

    fn stop_listening(&mut self, query: &Query, tag: Option<u64>) {
        log::trace!("stop_listening({}, tag={:?})", query.path, tag);
        if let Some(pos) = self
            .started
            .iter()
            .position(|(path, t)| *path == query.path && *t == tag)
        {
            self.started.remove(pos);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryParams;

    #[test]
    fn null_provider_tracks_listen_and_unlisten() {
        let mut provider = NullListenProvider::new();
        let query = Query::default_at(Path::parse("a"));
        provider.start_listening(&query, None, "somehash");
        assert_eq!(provider.active_listens(), &[(Path::parse("a"), None)]);
        assert_eq!(provider.last_hash(), Some("somehash"));

        provider.stop_listening(&query, None);
        assert!(provider.active_listens().is_empty());
    }

    #[test]
    fn distinct_tags_tracked_independently() {
        let mut provider = NullListenProvider::new();
        let query = Query::new(
            Path::parse("a"),
            QueryParams {
                limit_to_first: Some(1),
                ..Default::default()
            },
        );
        provider.start_listening(&query, Some(1), "h1");
        provider.start_listening(&query, Some(2), "h2");
        assert_eq!(provider.active_listens().len(), 2);

        provider.stop_listening(&query, Some(1));
        assert_eq!(provider.active_listens(), &[(Path::parse("a"), Some(2))]);
    }
}
