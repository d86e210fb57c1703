//! Paths into a GraphQL response.
//!
//! A [`QueryPath`] identifies one position in the response tree: a sequence of
//! response keys and list indices.  Errors are reported against these paths,
//! and incremental payloads carry the path they should be merged in at.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One segment of a [`QueryPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryPathSegment {
    /// A field response key (the alias if one was given).
    Field(String),
    /// An index into a list value.
    Index(usize),
}

impl fmt::Display for QueryPathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryPathSegment::Field(name) => write!(f, "{name}"),
            QueryPathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

impl From<&str> for QueryPathSegment {
    fn from(name: &str) -> Self {
        QueryPathSegment::Field(name.to_string())
    }
}

impl From<String> for QueryPathSegment {
    fn from(name: String) -> Self {
        QueryPathSegment::Field(name)
    }
}

impl From<usize> for QueryPathSegment {
    fn from(index: usize) -> Self {
        QueryPathSegment::Index(index)
    }
}

/// A path from the root of the response to one field position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPath(Vec<QueryPathSegment>);

impl QueryPath {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The depth of this path.  The root selection set sits at level zero,
    /// its fields at level one.
    pub fn level(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&QueryPathSegment> {
        self.0.last()
    }

    /// Returns a new path with `segment` appended.
    #[must_use]
    pub fn child(&self, segment: impl Into<QueryPathSegment>) -> Self {
        let mut child = self.clone();
        child.0.push(segment.into());
        child
    }

    /// Returns the path with its last segment removed, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.0.pop();
        Some(parent)
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueryPathSegment> {
        self.0.iter()
    }
}

impl fmt::Display for QueryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            if i != 0 {
                write!(f, ".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl<S> FromIterator<S> for QueryPath
where
    S: Into<QueryPathSegment>,
{
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        QueryPath(iter.into_iter().map(Into::into).collect())
    }
}

impl IntoIterator for QueryPath {
    type Item = QueryPathSegment;
    type IntoIter = std::vec::IntoIter<QueryPathSegment>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
