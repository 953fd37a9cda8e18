//! Merging an incoming edit path into a revision tree
//!
//! An edit arrives as a single rooted path (usually a parent node with the
//! new leaf as its only child). Merging grafts that path into the existing
//! forest, classifies what happened, and stems the result so no root-to-leaf
//! path exceeds the configured depth.

use crate::tree::{path_to_tree, root_to_leaf, traverse, RevNode, RevStatus, RevTree, RootedPath};
use davenport_common::Rev;
use std::collections::BTreeSet;

/// What merging an edit did to the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The edit extended an existing leaf: the one non-conflicting case for
    /// a regular edit.
    NewLeaf,
    /// The edit forked a new branch off an interior node.
    NewBranch,
    /// Every revision in the edit already existed in the tree.
    InternalNode,
}

/// Result of [`merge`].
#[derive(Debug, Clone)]
pub struct Merged {
    pub tree: RevTree,
    pub outcome: MergeOutcome,
    /// Revisions cut off by stemming; compaction may drop their bodies.
    pub stemmed_revs: Vec<Rev>,
}

/// Merge `path` into `tree`, then stem every root-to-leaf path to at most
/// `depth` nodes.
pub fn merge(tree: &RevTree, path: &RootedPath, depth: usize) -> Merged {
    let (merged, outcome) = do_merge(tree, path, true);
    let (stemmed, stemmed_revs) = stem(&merged, depth.max(1));
    Merged {
        tree: stemmed,
        outcome: outcome.unwrap_or(MergeOutcome::InternalNode),
        stemmed_revs,
    }
}

/// Graft one rooted path into the forest. `expand` allows walking down an
/// earlier-rooted tree to find the graft point; it is disabled when
/// remerging already-stemmed paths so stemming cannot reconnect what it cut.
fn do_merge(tree: &RevTree, path: &RootedPath, expand: bool) -> (RevTree, Option<MergeOutcome>) {
    if tree.is_empty() {
        return (vec![path.clone()], Some(MergeOutcome::NewLeaf));
    }

    let mut restree = Vec::with_capacity(tree.len());
    let mut outcome = None;
    let mut merged = false;

    for branch in tree {
        if branch.pos == path.pos && branch.node.hash == path.node.hash {
            // Same root: merge node-by-node.
            let mut branch = branch.clone();
            let sub = merge_into(&mut branch.node, &path.node);
            outcome = outcome.or(sub);
            restree.push(branch);
            merged = true;
        } else if expand {
            // Roots differ: walk the earlier tree down to the later root's
            // generation and graft there if the hashes line up.
            let (mut earlier, later) = if branch.pos < path.pos {
                (branch.clone(), path)
            } else {
                (path.clone(), branch)
            };
            let diff = later.pos - earlier.pos;
            let mut trail = Vec::new();
            if find_at_depth(&earlier.node, diff, &later.node.hash, &mut trail) {
                let graft = node_at_mut(&mut earlier.node, &trail);
                let sub = merge_into(graft, &later.node);
                outcome = outcome.or(sub);
                restree.push(earlier);
                merged = true;
            } else {
                restree.push(branch.clone());
            }
        } else {
            restree.push(branch.clone());
        }
    }

    if !merged {
        restree.push(path.clone());
    }
    restree.sort_by_key(|p| p.pos);
    (restree, outcome)
}

/// Merge `incoming` into `target`, which carry the same revision. Returns
/// the classification of the deepest change, or `None` when nothing new was
/// added.
fn merge_into(target: &mut RevNode, incoming: &RevNode) -> Option<MergeOutcome> {
    // A revision seen as available anywhere stays available.
    if target.status == RevStatus::Missing && incoming.status == RevStatus::Available {
        target.status = RevStatus::Available;
    }

    let mut outcome = None;
    for child in &incoming.children {
        if target.children.is_empty() {
            outcome = Some(MergeOutcome::NewLeaf);
            target.children.push(child.clone());
            continue;
        }
        match target.children.iter_mut().find(|c| c.hash == child.hash) {
            Some(existing) => {
                let sub = merge_into(existing, child);
                outcome = sub.or(outcome);
            }
            None => {
                outcome = Some(MergeOutcome::NewBranch);
                let idx = target.children.partition_point(|c| c.hash < child.hash);
                target.children.insert(idx, child.clone());
            }
        }
    }
    outcome
}

/// Depth-first search for the node `depth` generations below `node` whose
/// hash matches; records the child-index trail to it.
fn find_at_depth(node: &RevNode, depth: u64, hash: &str, trail: &mut Vec<usize>) -> bool {
    if depth == 0 {
        return node.hash == hash;
    }
    for (idx, child) in node.children.iter().enumerate() {
        trail.push(idx);
        if find_at_depth(child, depth - 1, hash, trail) {
            return true;
        }
        trail.pop();
    }
    false
}

fn node_at_mut<'a>(mut node: &'a mut RevNode, trail: &[usize]) -> &'a mut RevNode {
    for &idx in trail {
        node = &mut node.children[idx];
    }
    node
}

/// Cut every root-to-leaf path down to at most `depth` nodes, remerging the
/// trimmed paths into a fresh forest. Returns the revisions that fell off.
fn stem(tree: &RevTree, depth: usize) -> (RevTree, Vec<Rev>) {
    let mut stemmed_revs: BTreeSet<Rev> = BTreeSet::new();
    let mut result: Option<RevTree> = None;

    for path in root_to_leaf(tree) {
        let num_stemmed = path.nodes.len().saturating_sub(depth);
        for (offset, node) in path.nodes[..num_stemmed].iter().enumerate() {
            stemmed_revs.insert(Rev::new(path.pos + offset as u64, node.hash.clone()));
        }
        let Some(node) = path_to_tree(&path.nodes[num_stemmed..]) else {
            continue;
        };
        let rooted = RootedPath {
            pos: path.pos + num_stemmed as u64,
            node,
        };
        result = Some(match result {
            Some(current) => do_merge(&current, &rooted, false).0,
            None => vec![rooted],
        });
    }

    let result = result.unwrap_or_default();
    // A rev that survived on another path was not actually stemmed.
    traverse(&result, |_, pos, node| {
        stemmed_revs.remove(&Rev::new(pos, node.hash.clone()));
    });
    (result, stemmed_revs.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(hash: &str) -> RevNode {
        RevNode::leaf(hash, RevStatus::Available, false)
    }

    fn edit(parent_pos: u64, parent_hash: &str, new_hash: &str) -> RootedPath {
        let mut parent = RevNode::leaf(parent_hash, RevStatus::Missing, false);
        parent.children.push(leaf(new_hash));
        RootedPath {
            pos: parent_pos,
            node: parent,
        }
    }

    #[test]
    fn first_edit_into_empty_tree_is_new_leaf() {
        let path = RootedPath {
            pos: 1,
            node: leaf("aaa"),
        };
        let merged = merge(&Vec::new(), &path, 1000);
        assert_eq!(merged.outcome, MergeOutcome::NewLeaf);
        assert_eq!(merged.tree, vec![path]);
        assert!(merged.stemmed_revs.is_empty());
    }

    #[test]
    fn extending_the_leaf_is_new_leaf() {
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("aaa"),
        }];
        let merged = merge(&tree, &edit(1, "aaa", "bbb"), 1000);
        assert_eq!(merged.outcome, MergeOutcome::NewLeaf);
        assert_eq!(merged.tree.len(), 1);
        assert_eq!(merged.tree[0].node.children[0].hash, "bbb");
        // The parent stays available: it was available in the stored tree.
        assert_eq!(merged.tree[0].node.status, RevStatus::Available);
    }

    #[test]
    fn sibling_edit_is_new_branch() {
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("aaa"),
        }];
        let once = merge(&tree, &edit(1, "aaa", "bbb"), 1000).tree;
        let merged = merge(&once, &edit(1, "aaa", "ccc"), 1000);
        assert_eq!(merged.outcome, MergeOutcome::NewBranch);
        let children: Vec<&str> = merged.tree[0]
            .node
            .children
            .iter()
            .map(|c| c.hash.as_str())
            .collect();
        assert_eq!(children, vec!["bbb", "ccc"]);
    }

    #[test]
    fn replayed_edit_is_internal_node() {
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("aaa"),
        }];
        let once = merge(&tree, &edit(1, "aaa", "bbb"), 1000).tree;
        let merged = merge(&once, &edit(1, "aaa", "bbb"), 1000);
        assert_eq!(merged.outcome, MergeOutcome::InternalNode);
        assert_eq!(merged.tree, once);
    }

    #[test]
    fn later_rooted_path_grafts_into_earlier_tree() {
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("aaa"),
        }];
        let grown = merge(&tree, &edit(1, "aaa", "bbb"), 1000).tree;
        // Edit rooted at generation 2, as a replicated edit would arrive.
        let merged = merge(&grown, &edit(2, "bbb", "ccc"), 1000);
        assert_eq!(merged.outcome, MergeOutcome::NewLeaf);
        assert_eq!(merged.tree.len(), 1);
        assert_eq!(merged.tree[0].pos, 1);
        let grandchild = &merged.tree[0].node.children[0].children[0];
        assert_eq!(grandchild.hash, "ccc");
    }

    #[test]
    fn unrelated_root_becomes_second_tree() {
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("aaa"),
        }];
        let other = RootedPath {
            pos: 1,
            node: leaf("zzz"),
        };
        let merged = merge(&tree, &other, 1000);
        assert_eq!(merged.tree.len(), 2);
        assert_eq!(merged.outcome, MergeOutcome::InternalNode);
    }

    #[test]
    fn stemming_cuts_oldest_revs_and_reports_them() {
        let mut tree = vec![RootedPath {
            pos: 1,
            node: leaf("r1"),
        }];
        for gen in 1..5u64 {
            let path = edit(gen, &format!("r{gen}"), &format!("r{}", gen + 1));
            tree = merge(&tree, &path, 1000).tree;
        }
        // Five generations; stem to three.
        let merged = merge(&tree, &edit(5, "r5", "r6"), 3);
        assert_eq!(merged.tree.len(), 1);
        assert_eq!(merged.tree[0].pos, 4);
        let stemmed: Vec<String> = merged.stemmed_revs.iter().map(Rev::to_string).collect();
        assert_eq!(stemmed, vec!["1-r1", "2-r2", "3-r3"]);
    }

    #[test]
    fn stemming_keeps_revs_shared_with_surviving_branches() {
        // Build: 1-a -> 2-b -> 3-c and a sibling 2-z off the same root.
        let tree = vec![RootedPath {
            pos: 1,
            node: leaf("a"),
        }];
        let tree = merge(&tree, &edit(1, "a", "b"), 1000).tree;
        let tree = merge(&tree, &edit(1, "a", "z"), 1000).tree;
        let merged = merge(&tree, &edit(2, "b", "c"), 2);
        // The long branch is stemmed to (2-b, 3-c); the short branch (1-a,
        // 2-z) still holds 1-a, so only nothing shared is reported.
        let stemmed: Vec<String> = merged.stemmed_revs.iter().map(Rev::to_string).collect();
        assert_eq!(stemmed, Vec::<String>::new());
        assert_eq!(merged.tree.len(), 2);
    }
}
