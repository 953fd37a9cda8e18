//! Document metadata
//!
//! The metadata half of a parsed document: everything the adapter persists
//! in the document store. The body half lives in the sequence store under
//! `seq`.

use crate::tree::RevTree;
use davenport_common::{Rev, Seq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub id: String,
    /// Revision produced by the most recent parsed edit of this document.
    pub rev: Rev,
    pub rev_tree: RevTree,
    /// Every revision ever materialized in the sequence store, by seq.
    #[serde(default)]
    pub rev_map: BTreeMap<String, Seq>,
    /// Sequence of the most recently written revision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<Seq>,
    /// Derived from the winning leaf of `rev_tree`.
    #[serde(default)]
    pub deleted: bool,
}
