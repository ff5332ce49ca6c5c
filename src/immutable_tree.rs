//! A persistent, path-keyed tree with structural sharing.
//!
//! This is the general-purpose trie that backs both the Sync Point tree
//! (`ImmutableTree<SyncPoint>`) and the change-description trees carried by
//! [`crate::operation::Operation::Merge`] and
//! [`crate::operation::Operation::AckUserWrite`]
//! (`ImmutableTree<Node>` / `ImmutableTree<bool>`). Every mutation returns a
//! new tree; unmodified subtrees are shared with the original via `Arc`, so
//! retaining an old version after mutating is always safe and cheap.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::path::Path;

/// A persistent map from [`Path`] to an optional value of type `T`.
#[derive(Clone, Debug)]
pub struct ImmutableTree<T> {
    value: Option<Arc<T>>,
    children: Arc<BTreeMap<Arc<str>, ImmutableTree<T>>>,
}

impl<T> ImmutableTree<T> {
    pub fn empty() -> Self {
        ImmutableTree {
            value: None,
            children: Arc::new(BTreeMap::new()),
        }
    }

    pub fn leaf(value: T) -> Self {
        ImmutableTree {
            value: Some(Arc::new(value)),
            children: Arc::new(BTreeMap::new()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }

    pub fn value(&self) -> Option<&T> {
        self.value.as_deref()
    }

    pub fn children(&self) -> &BTreeMap<Arc<str>, ImmutableTree<T>> {
        &self.children
    }

    /// Returns the subtree rooted at `path`, or an empty tree if nothing has
    /// been recorded there.
    pub fn subtree(&self, path: &Path) -> ImmutableTree<T> {
        match path.front() {
            None => self.clone(),
            Some(key) => match self.children.get(key) {
                Some(child) => child.subtree(&path.pop_front()),
                None => ImmutableTree::empty(),
            },
        }
    }

    /// Returns the value stored exactly at `path`, if any.
    pub fn get(&self, path: &Path) -> Option<&T> {
        self.subtree_ref(path).and_then(|t| t.value())
    }

    fn subtree_ref(&self, path: &Path) -> Option<&ImmutableTree<T>> {
        match path.front() {
            None => Some(self),
            Some(key) => self.children.get(key).and_then(|c| c.subtree_ref(&path.pop_front())),
        }
    }

    /// Returns a new tree with `value` recorded at `path`.
    pub fn set(&self, path: &Path, value: T) -> ImmutableTree<T>
    where
        T: Clone,
    {
        match path.front() {
            None => ImmutableTree {
                value: Some(Arc::new(value)),
                children: Arc::clone(&self.children),
            },
            Some(key) => {
                let existing_child = self
                    .children
                    .get(key)
                    .cloned()
                    .unwrap_or_else(ImmutableTree::empty);
                let updated_child = existing_child.set(&path.pop_front(), value);

                let mut children = (*self.children).clone();
                children.insert(Arc::from(key), updated_child);

                ImmutableTree {
                    value: self.value.clone(),
                    children: Arc::new(children),
                }
            }
        }
    }

    /// Returns a new tree with the value (and any now-dangling intermediate
    /// nodes) at `path` removed.
    pub fn remove(&self, path: &Path) -> ImmutableTree<T>
    where
        T: Clone,
    {
        match path.front() {
            None => {
                if self.children.is_empty() {
                    ImmutableTree::empty()
                } else {
                    ImmutableTree {
                        value: None,
                        children: Arc::clone(&self.children),
                    }
                }
            }
            Some(key) => {
                let Some(existing_child) = self.children.get(key) else {
                    return self.clone();
                };

                let updated_child = existing_child.remove(&path.pop_front());
                let mut children = (*self.children).clone();

                if updated_child.is_empty() {
                    children.remove(key);
                } else {
                    children.insert(Arc::from(key), updated_child);
                }

                if children.is_empty() && self.value.is_none() {
                    ImmutableTree::empty()
                } else {
                    ImmutableTree {
                        value: self.value.clone(),
                        children: Arc::new(children),
                    }
                }
            }
        }
    }

    /// Invokes `f` for every ancestor of `path` (root first) that holds a
    /// value, including `path` itself.
    pub fn foreach_on_path<F>(&self, path: &Path, mut f: F)
    where
        F: FnMut(&Path, &T),
    {
        self.foreach_on_path_inner(path, &mut Path::root(), &mut f);
    }

    fn foreach_on_path_inner<F>(&self, remaining: &Path, walked: &mut Path, f: &mut F)
    where
        F: FnMut(&Path, &T),
    {
        if let Some(value) = self.value() {
            f(walked, value);
        }
        if let Some(key) = remaining.front() {
            if let Some(child) = self.children.get(key) {
                let mut child_walked = walked.child(key);
                child.foreach_on_path_inner(&remaining.pop_front(), &mut child_walked, f);
            }
        }
    }

    /// Walks root-to-`path`, returning the first non-`None` result of `pred`
    /// (applied to each ancestor that holds a value, including `path`).
    pub fn find_on_path<F, R>(&self, path: &Path, mut pred: F) -> Option<R>
    where
        F: FnMut(&Path, &T) -> Option<R>,
    {
        self.find_on_path_inner(path, &mut Path::root(), &mut pred)
    }

    fn find_on_path_inner<F, R>(&self, remaining: &Path, walked: &mut Path, pred: &mut F) -> Option<R>
    where
        F: FnMut(&Path, &T) -> Option<R>,
    {
        if let Some(value) = self.value() {
            if let Some(result) = pred(walked, value) {
                return Some(result);
            }
        }
        let key = remaining.front()?;
        let child = self.children.get(key)?;
        let mut child_walked = walked.child(key);
        child.find_on_path_inner(&remaining.pop_front(), &mut child_walked, pred)
    }

    /// Returns a new tree with this node's own value replaced, leaving
    /// every child subtree untouched (and shared via `Arc` with the
    /// original).
    pub fn set_value(&self, value: Option<T>) -> ImmutableTree<T> {
        ImmutableTree {
            value: value.map(Arc::new),
            children: Arc::clone(&self.children),
        }
    }

    /// Returns a new tree with the immediate child named `key` replaced
    /// wholesale by `child`. Setting an empty subtree removes the
    /// entry, matching [`ImmutableTree::remove`]'s no-dangling-entries
    /// invariant. Used by recursive tree transforms that need to splice
    /// back an already-updated child subtree in one step, rather than
    /// one value at a time via [`ImmutableTree::set`].
    pub fn set_child(&self, key: &str, child: ImmutableTree<T>) -> ImmutableTree<T>
    where
        T: Clone,
    {
        let mut children = (*self.children).clone();
        if child.is_empty() {
            children.remove(key);
        } else {
            children.insert(Arc::from(key), child);
        }
        ImmutableTree {
            value: self.value.clone(),
            children: Arc::new(children),
        }
    }

    pub fn foreach_child<F>(&self, mut f: F)
    where
        F: FnMut(&str, &ImmutableTree<T>),
    {
        for (key, child) in self.children.iter() {
            f(key, child);
        }
    }

    /// Bottom-up structural fold: `f` is invoked once per node that is
    /// either non-empty or has non-empty children, receiving the path
    /// relative to the fold's root, this node's value (if any), and the
    /// already-folded results of its children in key order.
    pub fn fold<F, R>(&self, f: &F) -> R
    where
        F: Fn(&Path, Option<&T>, Vec<R>) -> R,
    {
        self.fold_inner(&Path::root(), f)
    }

    fn fold_inner<F, R>(&self, at: &Path, f: &F) -> R
    where
        F: Fn(&Path, Option<&T>, Vec<R>) -> R,
    {
        let child_results: Vec<R> = self
            .children
            .iter()
            .map(|(key, child)| child.fold_inner(&at.child(key), f))
            .collect();
        f(at, self.value(), child_results)
    }

    /// Flattens every value in the tree into `(path, value)` pairs, path
    /// relative to the receiver. Used to splice a `Merge`'s `changeTree`
    /// into a `Node` one leaf at a time.
    pub fn collect_leaves(&self) -> Vec<(Path, T)>
    where
        T: Clone,
    {
        let mut acc = Vec::new();
        self.collect_leaves_inner(&Path::root(), &mut acc);
        acc
    }

    fn collect_leaves_inner(&self, at: &Path, acc: &mut Vec<(Path, T)>)
    where
        T: Clone,
    {
        if let Some(value) = self.value() {
            acc.push((at.clone(), value.clone()));
        }
        for (key, child) in self.children.iter() {
            child.collect_leaves_inner(&at.child(key), acc);
        }
    }
}

impl<T> Default for ImmutableTree<T> {
    fn default() -> Self {
        ImmutableTree::empty()
    }
}
