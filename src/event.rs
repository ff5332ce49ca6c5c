//! The event shapes the core returns. Per spec.md §6 an event's payload
//! is opaque to the core -- nothing here is dispatched internally, it is
//! only ever concatenated and handed back to the caller -- but the core
//! still needs *a* concrete shape to hand back, since no external
//! façade crate is in scope.

use std::fmt;
use std::sync::Arc;

use crate::error::CancelError;
use crate::node::Node;
use crate::path::Path;
use crate::query::Query;

/// Identifies one `addEventRegistration` call, so a caller juggling many
/// registrations at overlapping paths knows which registration each
/// `(RegistrationId, Event)` pair a dispatch call returns belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(u64);

impl RegistrationId {
    /// Wraps a caller-chosen id. Callers are free to use whatever
    /// numbering scheme fits their own registration bookkeeping -- the
    /// core only ever compares these for equality.
    pub fn new(value: u64) -> RegistrationId {
        RegistrationId(value)
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reg#{}", self.0)
    }
}

/// One registered callback site: a query plus the id the caller uses to
/// address it again in `remove_event_registration`.
#[derive(Clone, Debug, PartialEq)]
pub struct EventRegistration {
    pub id: RegistrationId,
    pub query: Query,
}

/// A single observable change. `ChildMoved` is representable but never
/// emitted by this crate's `View` -- ordering/priority policy within a
/// query is delegated to a richer `Node` (spec.md §1), and this crate's
/// `Node` orders children purely by key, so nothing ever moves.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    ValueChanged {
        path: Path,
        node: Node,
    },
    ChildAdded {
        path: Path,
        key: Arc<str>,
        node: Node,
    },
    ChildChanged {
        path: Path,
        key: Arc<str>,
        old: Node,
        new: Node,
    },
    ChildRemoved {
        path: Path,
        key: Arc<str>,
        node: Node,
    },
    ChildMoved {
        path: Path,
        key: Arc<str>,
        node: Node,
    },
    Cancelled {
        path: Path,
        query_identifier: String,
        error: CancelError,
    },
}
