//! Revision tree types and traversal
//!
//! A tree is a forest of rooted paths. Each root records the generation
//! (`pos`) of its first node; descending one child level adds one
//! generation. Children are kept sorted by hash so sibling order is
//! deterministic.

use davenport_common::Rev;
use serde::{Deserialize, Serialize};

/// Forest of revision paths for one document.
pub type RevTree = Vec<RootedPath>;

/// Whether a revision's body is still materialized in the sequence store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevStatus {
    #[default]
    Available,
    Missing,
}

/// One node in a revision tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevNode {
    /// Hash half of the revision id; the generation comes from tree depth.
    pub hash: String,
    #[serde(default)]
    pub status: RevStatus,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RevNode>,
}

impl RevNode {
    pub fn leaf(hash: impl Into<String>, status: RevStatus, deleted: bool) -> Self {
        RevNode {
            hash: hash.into(),
            status,
            deleted,
            children: Vec::new(),
        }
    }
}

/// A tree rooted at generation `pos`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootedPath {
    pub pos: u64,
    pub node: RevNode,
}

/// Visit every node in the forest. The callback receives
/// `(is_leaf, generation, node)`.
pub fn traverse<'a, F>(tree: &'a [RootedPath], mut visit: F)
where
    F: FnMut(bool, u64, &'a RevNode),
{
    let mut stack: Vec<(u64, &RevNode)> = tree.iter().map(|p| (p.pos, &p.node)).collect();
    while let Some((pos, node)) = stack.pop() {
        visit(node.children.is_empty(), pos, node);
        for child in &node.children {
            stack.push((pos + 1, child));
        }
    }
}

/// Find the node carrying the given revision, if the tree contains it.
pub fn find_node<'a>(tree: &'a [RootedPath], rev: &Rev) -> Option<&'a RevNode> {
    let mut found = None;
    traverse(tree, |_, pos, node| {
        if found.is_none() && pos == rev.pos && node.hash == rev.hash {
            found = Some(node);
        }
    });
    found
}

/// A root-to-leaf path flattened out of the forest.
#[derive(Debug, Clone)]
pub(crate) struct FlatPath {
    /// Generation of the first node.
    pub pos: u64,
    /// Nodes from root to leaf.
    pub nodes: Vec<RevNode>,
}

/// Break the forest into its complete set of root-to-leaf paths.
pub(crate) fn root_to_leaf(tree: &[RootedPath]) -> Vec<FlatPath> {
    let mut paths = Vec::new();
    for root in tree {
        let mut trail = Vec::new();
        collect_paths(root.pos, &root.node, &mut trail, &mut paths);
    }
    paths
}

fn collect_paths(root_pos: u64, node: &RevNode, trail: &mut Vec<RevNode>, out: &mut Vec<FlatPath>) {
    trail.push(RevNode {
        hash: node.hash.clone(),
        status: node.status,
        deleted: node.deleted,
        children: Vec::new(),
    });
    if node.children.is_empty() {
        out.push(FlatPath {
            pos: root_pos,
            nodes: trail.clone(),
        });
    } else {
        for child in &node.children {
            collect_paths(root_pos, child, trail, out);
        }
    }
    trail.pop();
}

/// Rebuild a single-child chain from a flattened path slice.
pub(crate) fn path_to_tree(nodes: &[RevNode]) -> Option<RevNode> {
    let mut rebuilt: Option<RevNode> = None;
    for flat in nodes.iter().rev() {
        let mut node = RevNode {
            hash: flat.hash.clone(),
            status: flat.status,
            deleted: flat.deleted,
            children: Vec::new(),
        };
        if let Some(child) = rebuilt.take() {
            node.children.push(child);
        }
        rebuilt = Some(node);
    }
    rebuilt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(hashes: &[&str]) -> RevNode {
        let nodes: Vec<RevNode> = hashes
            .iter()
            .map(|h| RevNode::leaf(*h, RevStatus::Available, false))
            .collect();
        path_to_tree(&nodes).unwrap()
    }

    #[test]
    fn traverse_visits_every_node() {
        let tree = vec![RootedPath {
            pos: 1,
            node: chain(&["a", "b", "c"]),
        }];
        let mut seen = Vec::new();
        traverse(&tree, |is_leaf, pos, node| {
            seen.push((is_leaf, pos, node.hash.clone()));
        });
        assert_eq!(
            seen,
            vec![
                (false, 1, "a".to_string()),
                (false, 2, "b".to_string()),
                (true, 3, "c".to_string()),
            ]
        );
    }

    #[test]
    fn find_node_by_rev() {
        let tree = vec![RootedPath {
            pos: 1,
            node: chain(&["a", "b"]),
        }];
        assert!(find_node(&tree, &Rev::new(2, "b")).is_some());
        assert!(find_node(&tree, &Rev::new(1, "b")).is_none());
        assert!(find_node(&tree, &Rev::new(3, "zz")).is_none());
    }

    #[test]
    fn root_to_leaf_splits_branches() {
        let mut root = chain(&["a"]);
        root.children.push(RevNode::leaf("b", RevStatus::Available, false));
        root.children.push(RevNode::leaf("c", RevStatus::Available, true));
        let tree = vec![RootedPath { pos: 1, node: root }];

        let paths = root_to_leaf(&tree);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.pos == 1 && p.nodes.len() == 2));
        let leaves: Vec<&str> = paths.iter().map(|p| p.nodes[1].hash.as_str()).collect();
        assert_eq!(leaves, vec!["b", "c"]);
    }
}
