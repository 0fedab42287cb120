use rustc_hash::FxHashSet;

use crate::{Graph, Node, Region};

/// Yields a region's nodes so that every node appears only after all nodes
/// whose outputs it consumes; equivalently, in non-decreasing depth order.
///
/// The traverser holds no borrow of the graph between steps, so the caller
/// may insert nodes or divert edges while iterating. Nodes inserted during
/// traversal are yielded as long as their depth is at least the depth of the
/// node most recently returned; nodes removed during traversal are skipped.
pub struct TopDownTraverser {
    region: Region,
    visited: FxHashSet<Node>,
}

impl TopDownTraverser {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            visited: FxHashSet::default(),
        }
    }

    pub fn next(&mut self, graph: &Graph) -> Option<Node> {
        let mut candidate: Option<(usize, Node)> = None;
        for node in graph.region_nodes(self.region) {
            if self.visited.contains(&node) {
                continue;
            }
            let depth = graph.node_depth(node);
            match candidate {
                Some((best, _)) if best <= depth => {}
                _ => candidate = Some((depth, node)),
            }
        }
        let (_, node) = candidate?;
        self.visited.insert(node);
        Some(node)
    }
}

/// Snapshots the top-down order of a region's current nodes
pub fn topdown_order(graph: &Graph, region: Region) -> Vec<Node> {
    let mut traverser = TopDownTraverser::new(region);
    let mut order = Vec::with_capacity(graph.region_num_nodes(region));
    while let Some(node) = traverser.next(graph) {
        order.push(node);
    }
    order
}
