use core::fmt::{Display, Formatter};
use serde_json::Value;

/// One step in a [`TreePath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Look up a map key.
    Key(String),

    /// Index into a sequence.
    Index(usize),

    /// The final element of a sequence.
    Last,
}

/// Location of a sub-tree inside a result tree, e.g. `repository.pullRequests`
/// or `repository.refs.nodes[-1].target.history`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TreePath {
    segments: Vec<Segment>,
}

impl TreePath {
    #[must_use]
    pub const fn root() -> Self {
        Self { segments: Vec::new() }
    }

    /// Build a path made only of map keys.
    #[must_use]
    pub fn keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: keys.into_iter().map(|k| Segment::Key(k.into())).collect(),
        }
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(Segment::Key(key.into()));
        self
    }

    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.segments.push(Segment::Index(index));
        self
    }

    #[must_use]
    pub fn last(mut self) -> Self {
        self.segments.push(Segment::Last);
        self
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Resolve the path against `tree`, returning `None` when any step is missing.
    #[must_use]
    pub fn lookup<'a>(&self, tree: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(tree, |node, segment| match segment {
            Segment::Key(key) => node.get(key),
            Segment::Index(index) => node.get(index),
            Segment::Last => node.as_array().and_then(|items| items.last()),
        })
    }
}

impl Display for TreePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "<root>");
        }

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if i == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
                Segment::Last => write!(f, "[-1]")?,
            }
        }
        Ok(())
    }
}
