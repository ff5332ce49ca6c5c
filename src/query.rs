//! Query descriptors and the query-key canonicalization used to key the
//! tag registry.
//!
//! The sync core treats `Query` as an external value type (spec.md §6);
//! this module owns a minimal implementation good enough to drive
//! dispatch and the tests, not a filtering/ordering engine -- see
//! `view.rs` for why children are never reordered by these params.

use std::fmt;
use std::sync::Arc;

use strum::Display;

use crate::path::Path;

/// The sentinel identifier of the canonical, unfiltered query.
pub const DEFAULT_QUERY_IDENTIFIER: &str = "default";

/// What a query orders its children by. Ordering alone (no bound, no
/// limit) does not make a query filtered -- see [`QueryParams::loads_all_data`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Display)]
pub enum OrderBy {
    #[strum(serialize = "key")]
    Key,
    #[strum(serialize = "value")]
    Value,
    #[strum(to_string = "child:{0}")]
    Child(Arc<str>),
}

/// An inclusive range bound: a comparison value plus, for ties, the key
/// to start/end at.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryBound {
    pub index_value: crate::node::Node,
    pub key: Option<Arc<str>>,
}

/// The filter/window a query applies on top of its path. Defaults to "no
/// filtering" -- the canonical default query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryParams {
    pub order_by: Option<OrderBy>,
    pub start_at: Option<QueryBound>,
    pub end_at: Option<QueryBound>,
    pub limit_to_first: Option<u32>,
    pub limit_to_last: Option<u32>,
}

impl QueryParams {
    /// Whether this query would load every descendant of its path -- no
    /// bound and no limit. An ordering with no window still loads all
    /// data (e.g. `orderByKey()` with no `startAt`/`limitToFirst`).
    pub fn loads_all_data(&self) -> bool {
        self.start_at.is_none()
            && self.end_at.is_none()
            && self.limit_to_first.is_none()
            && self.limit_to_last.is_none()
    }

    /// Whether this is the literal canonical query: loads all data *and*
    /// requests no particular ordering. This is a strictly narrower
    /// condition than [`Self::loads_all_data`] -- see the
    /// `queryForListening` asymmetry in spec.md §4.8, preserved
    /// deliberately rather than unified (DESIGN.md).
    pub fn is_default(&self) -> bool {
        self.order_by.is_none() && self.loads_all_data()
    }

    fn render_identifier(&self) -> String {
        let mut parts = Vec::new();
        if let Some(order_by) = &self.order_by {
            parts.push(format!("o:{order_by}"));
        }
        if let Some(bound) = &self.start_at {
            parts.push(format!(
                "sa:{}:{}",
                bound.index_value.hash(),
                bound.key.as_deref().unwrap_or("")
            ));
        }
        if let Some(bound) = &self.end_at {
            parts.push(format!(
                "ea:{}:{}",
                bound.index_value.hash(),
                bound.key.as_deref().unwrap_or("")
            ));
        }
        if let Some(n) = self.limit_to_first {
            parts.push(format!("lf:{n}"));
        }
        if let Some(n) = self.limit_to_last {
            parts.push(format!("ll:{n}"));
        }
        parts.join(",")
    }
}

/// A subscription descriptor: a path plus the filter/ordering applied to
/// it.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub path: Path,
    pub params: QueryParams,
}

impl Query {
    pub fn new(path: Path, params: QueryParams) -> Query {
        Query { path, params }
    }

    /// The canonical, unfiltered query at `path`.
    pub fn default_at(path: Path) -> Query {
        Query {
            path,
            params: QueryParams::default(),
        }
    }

    pub fn get_query_params(&self) -> &QueryParams {
        &self.params
    }

    /// The opaque string identifying this query's filter/ordering,
    /// independent of path. `"default"` for the canonical query.
    pub fn query_identifier(&self) -> String {
        if self.params.is_default() {
            DEFAULT_QUERY_IDENTIFIER.to_string()
        } else {
            self.params.render_identifier()
        }
    }

    /// The default query at the same path -- used to canonicalize
    /// "loads all data but isn't literally default" queries for listen
    /// purposes (spec.md §4.8).
    pub fn get_ref(&self) -> Query {
        Query::default_at(self.path.clone())
    }
}

/// The `(path, queryIdentifier)` pair canonicalized to a single string,
/// used as the key of `SyncTree`'s tag registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QueryKey(String);

const QUERY_KEY_SEPARATOR: char = '$';

impl QueryKey {
    pub fn new(query: &Query) -> QueryKey {
        make_query_key(&query.path, &query.query_identifier())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builds the canonical key for `(path, identifier)`.
pub fn make_query_key(path: &Path, identifier: &str) -> QueryKey {
    QueryKey(format!("{path}{QUERY_KEY_SEPARATOR}{identifier}"))
}

/// Parses a key produced by [`make_query_key`] back into its path and
/// identifier. A malformed key (no separator) is a programming error:
/// every key stored in the registry was produced by `make_query_key`.
pub fn parse_query_key(key: &QueryKey) -> (Path, String) {
    let raw = key.as_str();
    let sep = raw
        .find(QUERY_KEY_SEPARATOR)
        .expect("malformed query key: no separator");
    let (path, rest) = raw.split_at(sep);
    (Path::parse(path), rest[1..].to_string())
}
