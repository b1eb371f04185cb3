//! The result tree: the untyped JSON structure every task, channel, and page produces.
//!
//! Partial trees are folded together with [`merge`]; sub-trees are located with
//! [`TreePath`].

mod merge;
mod path;

pub use merge::{merge, merge_into, union_top_level};
pub use path::{Segment, TreePath};
