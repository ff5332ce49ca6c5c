//! Tagged description of a single mutation flowing through the sync
//! core, and the per-child projection that drives tree dispatch.
//!
//! Operation is a closed sum type on purpose (spec.md §9): four
//! variants, permanently fixed, each carrying its own fields and (except
//! `AckUserWrite`) a `source` discriminator. A class hierarchy would
//! buy nothing here.

use std::fmt;

use crate::immutable_tree::ImmutableTree;
use crate::node::Node;
use crate::path::Path;

/// A small integer uniquely identifying a filtered server subscription,
/// assigned by `SyncTree::next_query_tag`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryTag(u64);

impl QueryTag {
    pub fn new(value: u64) -> QueryTag {
        QueryTag(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for QueryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who originated an operation: a locally issued write, the server's
/// default/complete listen, or the server's response to one specific
/// tagged (filtered) subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum OperationSource {
    User,
    Server,
    ServerTaggedQuery(QueryTag),
}

impl OperationSource {
    pub fn tag(&self) -> Option<QueryTag> {
        match self {
            OperationSource::ServerTaggedQuery(tag) => Some(*tag),
            _ => None,
        }
    }

    pub fn is_from_server(&self) -> bool {
        matches!(self, OperationSource::Server | OperationSource::ServerTaggedQuery(_))
    }
}

/// A tagged description of a mutation to apply to the sync tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Operation {
    /// Replace the subtree at `path` with `node` in its entirety.
    Overwrite {
        source: OperationSource,
        path: Path,
        node: Node,
    },
    /// Replace the descendants enumerated in `children`, leaving
    /// everything else at `path` untouched.
    Merge {
        source: OperationSource,
        path: Path,
        children: ImmutableTree<Node>,
    },
    /// Clear or revert a previously applied local write. `affected_tree`
    /// marks (relative to `path`) which subpaths the write touched.
    AckUserWrite {
        path: Path,
        affected_tree: ImmutableTree<bool>,
        revert: bool,
    },
    /// The server has delivered all data for the query subscribed at
    /// `path`.
    ListenComplete { source: OperationSource, path: Path },
}

impl Operation {
    pub fn source(&self) -> Option<&OperationSource> {
        match self {
            Operation::Overwrite { source, .. }
            | Operation::Merge { source, .. }
            | Operation::ListenComplete { source, .. } => Some(source),
            Operation::AckUserWrite { .. } => None,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Operation::Overwrite { path, .. }
            | Operation::Merge { path, .. }
            | Operation::ListenComplete { path, .. }
            | Operation::AckUserWrite { path, .. } => path,
        }
    }

    /// Returns the path-shifted operation relevant to `key`, or `None` if
    /// `key` falls outside this operation's effect.
    pub fn operation_for_child(&self, key: &str) -> Option<Operation> {
        match self {
            Operation::Overwrite { source, path, node } => {
                if let Some(front) = path.front() {
                    if front != key {
                        return None;
                    }
                    Some(Operation::Overwrite {
                        source: source.clone(),
                        path: path.pop_front(),
                        node: node.clone(),
                    })
                } else {
                    Some(Operation::Overwrite {
                        source: source.clone(),
                        path: Path::root(),
                        node: node.get_immediate_child(key),
                    })
                }
            }
            Operation::Merge {
                source,
                path,
                children,
            } => {
                if let Some(front) = path.front() {
                    if front != key {
                        return None;
                    }
                    Some(Operation::Merge {
                        source: source.clone(),
                        path: path.pop_front(),
                        children: children.clone(),
                    })
                } else {
                    let child_key_path = Path::root().child(key);
                    let subtree = children.subtree(&child_key_path);
                    if subtree.is_empty() {
                        return None;
                    }
                    if let Some(node) = subtree.value() {
                        Some(Operation::Overwrite {
                            source: source.clone(),
                            path: Path::root(),
                            node: node.clone(),
                        })
                    } else {
                        Some(Operation::Merge {
                            source: source.clone(),
                            path: Path::root(),
                            children: subtree,
                        })
                    }
                }
            }
            Operation::AckUserWrite {
                path,
                affected_tree,
                revert,
            } => {
                if let Some(front) = path.front() {
                    if front != key {
                        return None;
                    }
                    Some(Operation::AckUserWrite {
                        path: path.pop_front(),
                        affected_tree: affected_tree.clone(),
                        revert: *revert,
                    })
                } else {
                    let subtree = affected_tree.subtree(&Path::root().child(key));
                    if subtree.is_empty() {
                        return None;
                    }
                    Some(Operation::AckUserWrite {
                        path: Path::root(),
                        affected_tree: subtree,
                        revert: *revert,
                    })
                }
            }
            Operation::ListenComplete { source, path } => {
                if let Some(front) = path.front() {
                    if front != key {
                        return None;
                    }
                    Some(Operation::ListenComplete {
                        source: source.clone(),
                        path: path.pop_front(),
                    })
                } else {
                    Some(Operation::ListenComplete {
                        source: source.clone(),
                        path: Path::root(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overwrite_for_child_outside_path_is_none() {
        let op = Operation::Overwrite {
            source: OperationSource::Server,
            path: Path::parse("a"),
            node: Node::leaf(1),
        };
        assert_eq!(op.operation_for_child("b"), None);
    }

    #[test]
    fn overwrite_for_child_on_path_advances() {
        let op = Operation::Overwrite {
            source: OperationSource::Server,
            path: Path::parse("a/b"),
            node: Node::leaf(1),
        };
        let child = op.operation_for_child("a").unwrap();
        assert_eq!(child.path(), &Path::parse("b"));
    }

    #[test]
    fn overwrite_at_root_projects_immediate_child() {
        let node = Node::empty().update_immediate_child("x", Node::leaf(42));
        let op = Operation::Overwrite {
            source: OperationSource::Server,
            path: Path::root(),
            node,
        };
        let child = op.operation_for_child("x").unwrap();
        match child {
            Operation::Overwrite { node, path, .. } => {
                assert!(path.is_empty());
                assert_eq!(node, Node::leaf(42));
            }
            _ => panic!("expected overwrite"),
        }
        // A child that doesn't exist in the node still projects -- to
        // the empty node, clearing it if it existed locally.
        let empty_child = op.operation_for_child("missing").unwrap();
        match empty_child {
            Operation::Overwrite { node, .. } => assert!(node.is_empty()),
            _ => panic!("expected overwrite"),
        }
    }

    #[test]
    fn merge_at_root_with_exact_child_overwrite_becomes_overwrite() {
        let children = ImmutableTree::empty().set(&Path::parse("a"), Node::leaf(1));
        let op = Operation::Merge {
            source: OperationSource::User,
            path: Path::root(),
            children,
        };
        let child = op.operation_for_child("a").unwrap();
        match child {
            Operation::Overwrite { node, .. } => assert_eq!(node, Node::leaf(1)),
            _ => panic!("expected overwrite"),
        }
        assert_eq!(op.operation_for_child("b"), None);
    }

    #[test]
    fn merge_at_root_with_nested_change_stays_merge() {
        let children = ImmutableTree::empty().set(&Path::parse("a/b"), Node::leaf(1));
        let op = Operation::Merge {
            source: OperationSource::User,
            path: Path::root(),
            children,
        };
        let child = op.operation_for_child("a").unwrap();
        match child {
            Operation::Merge { children, .. } => {
                assert_eq!(children.get(&Path::parse("b")), Some(&Node::leaf(1)));
            }
            _ => panic!("expected merge"),
        }
    }

    #[test]
    fn ack_user_write_projects_affected_subtree() {
        let affected = ImmutableTree::empty().set(&Path::parse("x"), true);
        let op = Operation::AckUserWrite {
            path: Path::root(),
            affected_tree: affected,
            revert: true,
        };
        assert!(op.operation_for_child("x").is_some());
        assert_eq!(op.operation_for_child("y"), None);
    }

    #[test]
    fn listen_complete_always_applies_once_path_is_empty() {
        let op = Operation::ListenComplete {
            source: OperationSource::Server,
            path: Path::root(),
        };
        assert!(op.operation_for_child("anything").is_some());
    }

    #[test]
    fn ack_user_write_has_no_source() {
        let op = Operation::AckUserWrite {
            path: Path::root(),
            affected_tree: ImmutableTree::empty(),
            revert: false,
        };
        assert_eq!(op.source(), None);
    }
}
