//! A synchronization core for a realtime hierarchical database client:
//! reconciles an optimistic local write log against server-delivered
//! state and turns the result into a stream of child/value events for
//! every registered query.
//!
//! [`SyncTree`] is the entry point. It owns a persistent tree of
//! [`sync_point::SyncPoint`]s (one per path with an active registration),
//! each holding one [`view::View`] per distinct query registered there.
//! Mutations arrive as [`operation::Operation`]s -- tagged descriptions
//! of what changed and who (server or local user) caused it -- and are
//! dispatched depth-first through the Sync Point tree, narrowing by
//! path one segment at a time.

pub mod error;
pub mod event;
pub mod immutable_tree;
pub mod listen_provider;
pub mod node;
pub mod operation;
pub mod path;
pub mod query;
pub mod sync_point;
pub mod sync_tree;
pub mod view;
pub mod write_tree;

pub use error::CancelError;
pub use event::{Event, EventRegistration, RegistrationId};
pub use immutable_tree::ImmutableTree;
pub use listen_provider::{ListenProvider, NullListenProvider};
pub use node::Node;
pub use operation::{Operation, OperationSource, QueryTag};
pub use path::Path;
pub use query::{OrderBy, Query, QueryBound, QueryKey, QueryParams};
pub use sync_point::SyncPoint;
pub use sync_tree::SyncTree;
pub use view::{CacheNode, View, ViewCache};
pub use write_tree::{PendingWrite, WriteContent, WriteTree, WriteTreeRef};
