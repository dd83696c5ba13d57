//! Arena-backed phylogenetic trees.
//!
//! Nodes live in a flat `Vec<Node>` and refer to each other by [`NodeId`].
//! Unrooted trees are stored rooted at a node of degree three or more; a
//! bifurcating root marks a rooted tree and can be removed with
//! [`Tree::unroot`]. Mutating operations work on the tree in place, so callers
//! that need the previous topology clone first.

use crate::error::{PhyloError, Result};

/// Index into the tree's node arena.
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Taxon name for leaves, optional label (e.g. support) for internal nodes.
    pub name: Option<String>,
    /// Length of the edge to the parent.
    pub branch_length: Option<f64>,
}

impl Node {
    fn new(parent: Option<NodeId>, name: Option<String>, branch_length: Option<f64>) -> Self {
        Node { parent, children: Vec::new(), name, branch_length }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl Tree {
    /// A tree holding a single unnamed root.
    pub fn new() -> Self {
        Tree { nodes: vec![Node::new(None, None, None)], root: 0 }
    }

    /// Attach a new node under `parent` and return its id.
    pub fn add_child(&mut self, parent: NodeId, name: Option<String>, branch_length: Option<f64>) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node::new(Some(parent), name, branch_length));
        self.nodes[parent].children.push(id);
        id
    }

    #[inline]
    pub fn root(&self) -> NodeId {
        self.root
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    /// Number of nodes in the arena.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.nodes[id].is_leaf()
    }

    /// Nodes in preorder (parents before children).
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id].children.iter().rev());
        }
        order
    }

    /// Nodes in postorder (children before parents).
    pub fn postorder(&self) -> Vec<NodeId> {
        let mut order = self.preorder();
        order.reverse();
        order
    }

    /// Leaf ids in left-to-right order.
    pub fn leaves(&self) -> Vec<NodeId> {
        self.preorder().into_iter().filter(|&id| self.is_leaf(id)).collect()
    }

    pub fn num_leaves(&self) -> usize {
        self.leaves().len()
    }

    /// Leaf names in left-to-right order; unnamed leaves yield an empty string.
    pub fn leaf_names(&self) -> Vec<String> {
        self.leaves()
            .into_iter()
            .map(|id| self.nodes[id].name.clone().unwrap_or_default())
            .collect()
    }

    /// Leaf names sorted, failing on unnamed or duplicated leaves.
    pub fn sorted_taxa(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for id in self.leaves() {
            match &self.nodes[id].name {
                Some(n) if !n.is_empty() => names.push(n.clone()),
                _ => return Err(PhyloError::Parse("tree contains an unnamed leaf".into())),
            }
        }
        names.sort();
        if let Some(w) = names.windows(2).find(|w| w[0] == w[1]) {
            return Err(PhyloError::Parse(format!("leaf label '{}' appears more than once", w[0])));
        }
        Ok(names)
    }

    /// Non-root nodes; each identifies the edge to its parent.
    pub fn edges(&self) -> Vec<NodeId> {
        self.preorder().into_iter().filter(|&id| id != self.root).collect()
    }

    /// Non-root internal nodes: the edges whose removal leaves two subtrees
    /// with at least two leaves each in a binary tree.
    pub fn internal_edges(&self) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|&id| id != self.root && !self.is_leaf(id))
            .collect()
    }

    pub fn branch_length(&self, id: NodeId) -> f64 {
        self.nodes[id].branch_length.unwrap_or(0.0)
    }

    pub fn set_branch_length(&mut self, id: NodeId, length: f64) {
        self.nodes[id].branch_length = Some(length);
    }

    /// Sum of all branch lengths.
    pub fn total_length(&self) -> f64 {
        self.edges().iter().map(|&id| self.branch_length(id)).sum()
    }

    /// Give every edge without a length the value `default`.
    pub fn fill_missing_lengths(&mut self, default: f64) {
        let root = self.root;
        for (id, node) in self.nodes.iter_mut().enumerate() {
            if id != root && node.branch_length.is_none() {
                node.branch_length = Some(default);
            }
        }
    }

    /// Drop all internal node labels.
    pub fn clear_internal_labels(&mut self) {
        for node in self.nodes.iter_mut().filter(|n| !n.children.is_empty()) {
            node.name = None;
        }
    }

    /// Whether the root is bifurcating.
    pub fn is_rooted(&self) -> bool {
        self.nodes[self.root].children.len() == 2
    }

    /// Remove a bifurcating root by merging its two edges into one.
    ///
    /// The internal child of the old root becomes the new root and the
    /// other child hangs from it with the summed branch length. Trees with
    /// fewer than three leaves are left untouched.
    pub fn unroot(&mut self) {
        if !self.is_rooted() || self.num_leaves() < 3 {
            return;
        }
        let root = self.root;
        let (a, b) = (self.nodes[root].children[0], self.nodes[root].children[1]);
        let (new_root, other) = if !self.is_leaf(a) { (a, b) } else { (b, a) };
        let merged = match (self.nodes[a].branch_length, self.nodes[b].branch_length) {
            (None, None) => None,
            (x, y) => Some(x.unwrap_or(0.0) + y.unwrap_or(0.0)),
        };
        self.nodes[new_root].parent = None;
        self.nodes[new_root].branch_length = None;
        self.nodes[other].parent = Some(new_root);
        self.nodes[other].branch_length = merged;
        self.nodes[new_root].children.push(other);
        self.nodes[root].children.clear();
        self.root = new_root;
        self.compact();
    }

    /// Detach the subtree at `id`, then splice out nodes left with a single
    /// child. Branch lengths of spliced edges are summed.
    pub fn prune(&mut self, id: NodeId) {
        if let Some(p) = self.nodes[id].parent {
            self.nodes[p].children.retain(|&c| c != id);
            self.nodes[id].parent = None;
        }
        self.suppress_unary();
    }

    /// Splice out every node with exactly one child.
    pub fn suppress_unary(&mut self) {
        for id in self.postorder() {
            if self.nodes[id].children.len() != 1 {
                continue;
            }
            let child = self.nodes[id].children[0];
            match self.nodes[id].parent {
                Some(p) => {
                    let merged = match (self.nodes[id].branch_length, self.nodes[child].branch_length) {
                        (None, None) => None,
                        (x, y) => Some(x.unwrap_or(0.0) + y.unwrap_or(0.0)),
                    };
                    self.nodes[child].branch_length = merged;
                    self.nodes[child].parent = Some(p);
                    if let Some(slot) = self.nodes[p].children.iter_mut().find(|c| **c == id) {
                        *slot = child;
                    }
                }
                None => {
                    self.nodes[child].parent = None;
                    self.nodes[child].branch_length = None;
                    self.root = child;
                }
            }
            self.nodes[id].children.clear();
        }
        self.compact();
    }

    /// Exchange the subtrees rooted at `a` and `b`, keeping each subtree's
    /// branch length. Neither node may be an ancestor of the other.
    pub fn swap_subtrees(&mut self, a: NodeId, b: NodeId) {
        let (Some(pa), Some(pb)) = (self.nodes[a].parent, self.nodes[b].parent) else {
            return;
        };
        if let Some(slot) = self.nodes[pa].children.iter_mut().find(|c| **c == a) {
            *slot = b;
        }
        if let Some(slot) = self.nodes[pb].children.iter_mut().find(|c| **c == b) {
            *slot = a;
        }
        self.nodes[a].parent = Some(pb);
        self.nodes[b].parent = Some(pa);
    }

    /// The two nearest-neighbour interchanges around the internal edge above
    /// `v`: each swaps one child of `v` with a sibling of `v`. Returns the
    /// node pairs to pass to [`Tree::swap_subtrees`].
    pub fn nni_moves(&self, v: NodeId) -> Vec<(NodeId, NodeId)> {
        let Some(p) = self.nodes[v].parent else {
            return Vec::new();
        };
        if self.is_leaf(v) {
            return Vec::new();
        }
        let sibling = self.nodes[p].children.iter().copied().find(|&s| s != v);
        let Some(s) = sibling else {
            return Vec::new();
        };
        self.nodes[v].children.iter().map(|&c| (c, s)).take(2).collect()
    }

    /// Leaf id by taxon name.
    pub fn find_leaf(&self, name: &str) -> Option<NodeId> {
        self.leaves()
            .into_iter()
            .find(|&id| self.nodes[id].name.as_deref() == Some(name))
    }

    /// Rebuild the arena with only the nodes reachable from the root, in preorder.
    fn compact(&mut self) {
        let order = self.preorder();
        let mut remap = vec![usize::MAX; self.nodes.len()];
        for (new, &old) in order.iter().enumerate() {
            remap[old] = new;
        }
        let mut nodes = Vec::with_capacity(order.len());
        for &old in &order {
            let node = &self.nodes[old];
            nodes.push(Node {
                parent: node.parent.map(|p| remap[p]),
                children: node.children.iter().map(|&c| remap[c]).collect(),
                name: node.name.clone(),
                branch_length: node.branch_length,
            });
        }
        self.nodes = nodes;
        self.root = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// ((A,B),(C,D)) with all lengths 1.
    fn rooted_quartet() -> Tree {
        let mut t = Tree::new();
        let x = t.add_child(0, None, Some(1.0));
        let y = t.add_child(0, None, Some(1.0));
        for (p, n) in [(x, "A"), (x, "B"), (y, "C"), (y, "D")] {
            t.add_child(p, Some(n.into()), Some(1.0));
        }
        t
    }

    #[test]
    fn traversals_cover_all_nodes() {
        let t = rooted_quartet();
        assert_eq!(t.preorder().len(), 7);
        assert_eq!(t.postorder().last(), Some(&0));
        assert_eq!(t.leaf_names(), vec!["A", "B", "C", "D"]);
        assert_eq!(t.total_length(), 6.0);
    }

    #[test]
    fn unroot_merges_root_edges() {
        let mut t = rooted_quartet();
        assert!(t.is_rooted());
        t.unroot();
        assert!(!t.is_rooted());
        assert_eq!(t.node(t.root()).children.len(), 3);
        assert_eq!(t.num_leaves(), 4);
        assert_eq!(t.total_length(), 6.0);
        assert_eq!(t.len(), 6);
    }

    #[test]
    fn prune_suppresses_unary_nodes() {
        let mut t = rooted_quartet();
        let a = t.find_leaf("A").unwrap();
        t.prune(a);
        assert_eq!(t.num_leaves(), 3);
        let b = t.find_leaf("B").unwrap();
        assert_eq!(t.branch_length(b), 2.0);
        assert!(t.preorder().iter().all(|&id| t.node(id).children.len() != 1));
    }

    #[test]
    fn nni_swaps_across_edge() {
        let mut t = rooted_quartet();
        t.unroot();
        let v = t.internal_edges()[0];
        let moves = t.nni_moves(v);
        assert_eq!(moves.len(), 2);
        let (a, b) = moves[0];
        let before = t.node(v).children.clone();
        t.swap_subtrees(a, b);
        assert_ne!(t.node(v).children, before);
        assert_eq!(t.num_leaves(), 4);
        assert!(t.node(v).children.contains(&b));
    }

    #[test]
    fn sorted_taxa_rejects_duplicates() {
        let mut t = Tree::new();
        t.add_child(0, Some("A".into()), None);
        t.add_child(0, Some("A".into()), None);
        assert!(matches!(t.sorted_taxa(), Err(PhyloError::Parse(_))));
    }
}
