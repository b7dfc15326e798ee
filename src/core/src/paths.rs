//! Ordered sets of file paths.
//!
//! Priority paths are opaque strings: they are compared exactly
//! (case-sensitive) and never normalized here.

use std::collections::btree_set;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// An ordered set of file paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSet(BTreeSet<String>);

/// Paths the caller requires to be present in the optimized artifact.
pub type PrioritySet = PathSet;

/// Priority paths that could not be located within some scope.
pub type MissingSet = PathSet;

impl PathSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    /// Add a path. Returns true if it was not already present.
    pub fn insert(&mut self, path: impl Into<String>) -> bool {
        self.0.insert(path.into())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Paths present in both sets.
    pub fn intersection(&self, other: &PathSet) -> PathSet {
        Self(self.0.intersection(&other.0).cloned().collect())
    }

    pub fn is_subset(&self, other: &PathSet) -> bool {
        self.0.is_subset(&other.0)
    }

    /// Iterate in sorted order.
    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.0.iter()
    }

    /// Sorted list of the paths.
    pub fn to_vec(&self) -> Vec<String> {
        self.0.iter().cloned().collect()
    }
}

impl<S: Into<String>> FromIterator<S> for PathSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for PathSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for PathSet {
    type Item = String;
    type IntoIter = btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PathSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
