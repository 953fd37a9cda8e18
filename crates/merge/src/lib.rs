//! Revision-tree library for the davenport document store
//!
//! A document's edit history is a forest of revision paths. This crate owns
//! that model and everything that operates on it without touching storage:
//! - Tree types and traversal
//! - Merging an incoming edit path into an existing tree, with depth-limited
//!   stemming and conflict classification
//! - Winning-revision selection, leaf and conflict collection
//! - Parsing raw JSON documents into metadata + body halves
//!
//! The persistent adapter consumes this crate as a pure library; nothing in
//! here performs I/O.

mod merge;
mod metadata;
mod parse;
mod tree;
mod winner;

pub use merge::{merge, MergeOutcome, Merged};
pub use metadata::Metadata;
pub use parse::{parse_doc, DocInfo};
pub use tree::{traverse, RevNode, RevStatus, RevTree, RootedPath};
pub use winner::{collect_conflicts, collect_leaves, is_deleted, winning_rev, Leaf};
