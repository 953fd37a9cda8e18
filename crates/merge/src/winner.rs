//! Winning-revision selection and leaf collection
//!
//! The winner is chosen deterministically across all leaves: a non-deleted
//! leaf beats a deleted one, then the higher generation wins, then the
//! lexicographically higher hash breaks ties.

use crate::metadata::Metadata;
use crate::tree::{find_node, traverse, RevStatus, RevTree};
use davenport_common::Rev;

/// A leaf of the revision tree: a candidate winning revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leaf {
    pub rev: Rev,
    pub deleted: bool,
    pub status: RevStatus,
}

/// Deterministic winner across all leaves of the document's tree.
pub fn winning_rev(metadata: &Metadata) -> Rev {
    let mut best: Option<(bool, u64, &str)> = None;
    traverse(&metadata.rev_tree, |is_leaf, pos, node| {
        if !is_leaf {
            return;
        }
        let candidate = (node.deleted, pos, node.hash.as_str());
        best = Some(match best {
            None => candidate,
            Some(current) => {
                let better = if current.0 != candidate.0 {
                    current.0
                } else if current.1 != candidate.1 {
                    candidate.1 > current.1
                } else {
                    candidate.2 > current.2
                };
                if better {
                    candidate
                } else {
                    current
                }
            }
        });
    });
    // Parse and merge never leave a tree without leaves.
    let (_, pos, hash) = best.expect("revision tree has at least one leaf");
    Rev::new(pos, hash)
}

/// All leaves, sorted by generation descending.
pub fn collect_leaves(tree: &RevTree) -> Vec<Leaf> {
    let mut leaves = Vec::new();
    traverse(tree, |is_leaf, pos, node| {
        if is_leaf {
            leaves.push(Leaf {
                rev: Rev::new(pos, node.hash.clone()),
                deleted: node.deleted,
                status: node.status,
            });
        }
    });
    leaves.sort_by(|a, b| b.rev.pos.cmp(&a.rev.pos));
    leaves
}

/// Non-deleted leaves that lost the winner election.
pub fn collect_conflicts(metadata: &Metadata) -> Vec<Rev> {
    let winner = winning_rev(metadata);
    collect_leaves(&metadata.rev_tree)
        .into_iter()
        .filter(|leaf| !leaf.deleted && leaf.rev != winner)
        .map(|leaf| leaf.rev)
        .collect()
}

/// Whether the given revision (default: the winner) is a deletion.
pub fn is_deleted(metadata: &Metadata, rev: Option<&Rev>) -> bool {
    match rev {
        Some(rev) => find_node(&metadata.rev_tree, rev).is_some_and(|node| node.deleted),
        None => {
            let winner = winning_rev(metadata);
            find_node(&metadata.rev_tree, &winner).is_some_and(|node| node.deleted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{RevNode, RootedPath};
    use std::collections::BTreeMap;

    fn meta_with(tree: RevTree) -> Metadata {
        Metadata {
            id: "doc".to_string(),
            rev: Rev::new(1, "x"),
            rev_tree: tree,
            rev_map: BTreeMap::new(),
            seq: None,
            deleted: false,
        }
    }

    fn branching_tree() -> RevTree {
        let mut root = RevNode::leaf("a", RevStatus::Missing, false);
        root.children
            .push(RevNode::leaf("bbb", RevStatus::Available, false));
        root.children
            .push(RevNode::leaf("ccc", RevStatus::Available, false));
        vec![RootedPath { pos: 1, node: root }]
    }

    #[test]
    fn higher_hash_breaks_generation_ties() {
        let meta = meta_with(branching_tree());
        assert_eq!(winning_rev(&meta), Rev::new(2, "ccc"));
    }

    #[test]
    fn non_deleted_leaf_beats_deeper_deleted_leaf() {
        let mut root = RevNode::leaf("a", RevStatus::Missing, false);
        let mut mid = RevNode::leaf("bbb", RevStatus::Missing, false);
        mid.children
            .push(RevNode::leaf("ddd", RevStatus::Available, true));
        root.children.push(mid);
        root.children
            .push(RevNode::leaf("ccc", RevStatus::Available, false));
        let meta = meta_with(vec![RootedPath { pos: 1, node: root }]);

        assert_eq!(winning_rev(&meta), Rev::new(2, "ccc"));
    }

    #[test]
    fn leaves_sorted_by_generation_descending() {
        let mut root = RevNode::leaf("a", RevStatus::Missing, false);
        let mut mid = RevNode::leaf("bbb", RevStatus::Available, false);
        mid.children
            .push(RevNode::leaf("ddd", RevStatus::Available, false));
        root.children.push(mid);
        root.children
            .push(RevNode::leaf("ccc", RevStatus::Available, false));
        let tree = vec![RootedPath { pos: 1, node: root }];

        let leaves = collect_leaves(&tree);
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].rev, Rev::new(3, "ddd"));
        assert_eq!(leaves[1].rev, Rev::new(2, "ccc"));
    }

    #[test]
    fn conflicts_exclude_winner_and_deleted() {
        let mut tree = branching_tree();
        tree[0]
            .node
            .children
            .push(RevNode::leaf("ddd", RevStatus::Available, true));
        let meta = meta_with(tree);

        let conflicts = collect_conflicts(&meta);
        assert_eq!(conflicts, vec![Rev::new(2, "bbb")]);
    }

    #[test]
    fn is_deleted_checks_requested_rev() {
        let mut root = RevNode::leaf("a", RevStatus::Missing, false);
        root.children
            .push(RevNode::leaf("bbb", RevStatus::Available, true));
        let meta = meta_with(vec![RootedPath { pos: 1, node: root }]);

        assert!(is_deleted(&meta, None));
        assert!(is_deleted(&meta, Some(&Rev::new(2, "bbb"))));
        assert!(!is_deleted(&meta, Some(&Rev::new(1, "a"))));
    }
}
