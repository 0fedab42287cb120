//! Aggregation reduces a structured control-flow graph, bottom-up, into a
//! tree of control structures: linear chains, branches, and loops over
//! entry/exit/block leaves. The working graph collapses one reducible
//! subgraph at a time into a placeholder node carrying the subtree built so
//! far; a structured graph always reduces to a single node, and a graph
//! that gets stuck is reported as unstructured.

use rustc_hash::FxHashSet;

use crate::{
    cfg::{Cfg, CfgNode},
    FrontendError,
};

/// The control structure carried by an aggregation-tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    /// The function entry; binds the argument variables
    Entry,
    /// The function exit; reads the result variables
    Exit,
    /// A basic block, or a synthesized empty block (`None`) standing for a
    /// branch arm with no code.
    Block(Option<CfgNode>),
    /// Two children executed in sequence
    Linear,
    /// A branch: the first child is the split (ending in the predicate
    /// computation), the remaining children are the arms in alternative
    /// order.
    Branch,
    /// A loop: the single child is the body
    Loop,
}

/// A node of the aggregation tree.
///
/// Ids are assigned in preorder once the tree is complete and index the
/// demand annotation computed before construction.
#[derive(Debug)]
pub struct AggNode {
    pub structure: Structure,
    pub children: Vec<AggNode>,
    pub id: usize,
}

impl AggNode {
    fn new(structure: Structure, children: Vec<AggNode>) -> Self {
        Self {
            structure,
            children,
            id: 0,
        }
    }

    pub fn entry() -> Self {
        Self::new(Structure::Entry, Vec::new())
    }

    pub fn exit() -> Self {
        Self::new(Structure::Exit, Vec::new())
    }

    pub fn block(node: CfgNode) -> Self {
        Self::new(Structure::Block(Some(node)), Vec::new())
    }

    pub fn empty_block() -> Self {
        Self::new(Structure::Block(None), Vec::new())
    }

    pub fn linear(first: AggNode, second: AggNode) -> Self {
        Self::new(Structure::Linear, vec![first, second])
    }

    pub fn branch(children: Vec<AggNode>) -> Self {
        Self::new(Structure::Branch, children)
    }

    pub fn loop_(body: AggNode) -> Self {
        Self::new(Structure::Loop, vec![body])
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> &AggNode {
        &self.children[index]
    }

    /// The number of nodes in this subtree
    pub fn num_nodes(&self) -> usize {
        1 + self.children.iter().map(AggNode::num_nodes).sum::<usize>()
    }

    fn assign_ids(&mut self, counter: &mut usize) {
        self.id = *counter;
        *counter += 1;
        for child in &mut self.children {
            child.assign_ids(counter);
        }
    }
}

struct WorkNode {
    tree: AggNode,
    preds: Vec<usize>,
    /// Successors in edge-index order; a successor may appear once per edge
    succs: Vec<usize>,
}

/// Reduces the structured CFG `cfg` (back edges included) to its
/// aggregation tree.
pub fn aggregate(cfg: &Cfg) -> Result<AggNode, FrontendError> {
    let mut index_of = rustc_hash::FxHashMap::default();
    let mut work: Vec<Option<WorkNode>> = Vec::new();
    for node in cfg.iter_nodes() {
        let tree = if node == cfg.entry() {
            AggNode::entry()
        } else if node == cfg.exit() {
            AggNode::exit()
        } else {
            AggNode::block(node)
        };
        index_of.insert(node, work.len());
        work.push(Some(WorkNode {
            tree,
            preds: Vec::new(),
            succs: Vec::new(),
        }));
    }
    for node in cfg.iter_nodes() {
        let source = index_of[&node];
        for edge in cfg.out_edges(node) {
            let sink = index_of[&cfg.edge(edge).sink];
            work[source].as_mut().unwrap().succs.push(sink);
            work[sink].as_mut().unwrap().preds.push(source);
        }
    }

    loop {
        let alive: Vec<usize> = (0..work.len()).filter(|i| work[*i].is_some()).collect();
        if alive.len() == 1 {
            let mut root = work[alive[0]].take().unwrap().tree;
            let mut counter = 0;
            root.assign_ids(&mut counter);
            return Ok(root);
        }

        let mut changed = false;
        for index in alive {
            if work[index].is_none() {
                continue;
            }
            changed |= try_reduce_loop(&mut work, index);
            changed |= try_reduce_branch(&mut work, index);
            changed |= try_reduce_linear(&mut work, index);
        }
        if !changed {
            return Err(FrontendError::NotStructured);
        }
    }
}

/// True if the CFG reduces completely; the dual of [aggregate] failing
pub fn is_structured(cfg: &Cfg) -> bool {
    aggregate(cfg).is_ok()
}

/// A node whose successor list contains itself is a fully reduced loop body
fn try_reduce_loop(work: &mut [Option<WorkNode>], index: usize) -> bool {
    let node = work[index].as_ref().unwrap();
    if !node.succs.contains(&index) {
        return false;
    }
    let node = work[index].as_mut().unwrap();
    let tree = std::mem::replace(&mut node.tree, AggNode::entry());
    node.tree = AggNode::loop_(tree);
    node.succs.retain(|s| *s != index);
    node.preds.retain(|p| *p != index);
    true
}

/// Merges `index` with its unique successor when that successor has no
/// other predecessor.
fn try_reduce_linear(work: &mut [Option<WorkNode>], index: usize) -> bool {
    let node = work[index].as_ref().unwrap();
    if node.succs.len() != 1 {
        return false;
    }
    let next = node.succs[0];
    if next == index || work[next].as_ref().unwrap().preds.len() != 1 {
        return false;
    }

    let absorbed = work[next].take().unwrap();
    let node = work[index].as_mut().unwrap();
    let tree = std::mem::replace(&mut node.tree, AggNode::entry());
    node.tree = AggNode::linear(tree, absorbed.tree);
    node.succs = absorbed.succs;
    let succs = node.succs.clone();
    for succ in succs {
        for pred in &mut work[succ].as_mut().unwrap().preds {
            if *pred == next {
                *pred = index;
            }
        }
    }
    true
}

/// Reduces a single-join branch: every successor is either a one-in/one-out
/// arm converging on the same join, or the join itself (an empty arm).
fn try_reduce_branch(work: &mut [Option<WorkNode>], index: usize) -> bool {
    let node = work[index].as_ref().unwrap();
    if node.succs.len() < 2 {
        return false;
    }

    let mut join: Option<usize> = None;
    for succ in &node.succs {
        let succ = *succ;
        if succ == index {
            return false;
        }
        let arm = work[succ].as_ref().unwrap();
        let candidate = if arm.preds == [index] && arm.succs.len() == 1 {
            arm.succs[0]
        } else {
            // The arm is empty: the edge reaches the join directly.
            succ
        };
        match join {
            None => join = Some(candidate),
            Some(existing) if existing == candidate => {}
            Some(_) => return false,
        }
    }
    let join = join.unwrap();
    if join == index {
        return false;
    }

    let succs: Vec<usize> = work[index].as_ref().unwrap().succs.clone();
    let mut children = Vec::with_capacity(succs.len() + 1);
    let split = std::mem::replace(&mut work[index].as_mut().unwrap().tree, AggNode::entry());
    children.push(split);
    let mut removed: FxHashSet<usize> = FxHashSet::default();
    for succ in &succs {
        if *succ == join {
            children.push(AggNode::empty_block());
        } else {
            let arm = work[*succ].take().unwrap();
            children.push(arm.tree);
            removed.insert(*succ);
        }
    }

    let node = work[index].as_mut().unwrap();
    node.tree = AggNode::branch(children);
    node.succs = vec![join];
    let join_node = work[join].as_mut().unwrap();
    join_node.preds.retain(|p| !removed.contains(p) && *p != index);
    join_node.preds.push(index);
    true
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn is_linear(node: &AggNode) -> bool {
        node.structure == Structure::Linear && node.num_children() == 2
    }

    fn is_block(node: &AggNode) -> bool {
        matches!(node.structure, Structure::Block(Some(_))) && node.num_children() == 0
    }

    fn is_entry(node: &AggNode) -> bool {
        node.structure == Structure::Entry && node.num_children() == 0
    }

    fn is_exit(node: &AggNode) -> bool {
        node.structure == Structure::Exit && node.num_children() == 0
    }

    fn is_loop(node: &AggNode) -> bool {
        node.structure == Structure::Loop && node.num_children() == 1
    }

    fn is_branch(node: &AggNode, nchildren: usize) -> bool {
        node.structure == Structure::Branch && node.num_children() == nchildren
    }

    /// Collects the basic blocks of the fringe, left to right
    fn fringe(node: &AggNode, out: &mut Vec<CfgNode>) {
        if let Structure::Block(Some(block)) = node.structure {
            out.push(block);
        }
        for child in &node.children {
            fringe(child, out);
        }
    }

    #[test]
    fn linear_reduction() {
        let mut cfg = Cfg::new();
        let bb = cfg.create_basic_block();
        cfg.add_edge(cfg.entry(), bb, 0);
        cfg.add_edge(bb, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        assert!(is_linear(&root));
        assert!(is_linear(root.child(0)));
        assert!(is_entry(root.child(0).child(0)));
        assert!(is_block(root.child(0).child(1)));
        assert!(is_exit(root.child(1)));
    }

    #[test]
    fn loop_reduction() {
        let mut cfg = Cfg::new();
        let bb1 = cfg.create_basic_block();
        let bb2 = cfg.create_basic_block();
        cfg.add_edge(cfg.entry(), bb1, 0);
        cfg.add_edge(bb1, bb2, 0);
        cfg.add_edge(bb2, cfg.exit(), 0);
        cfg.add_edge(bb2, bb1, 1);

        let root = aggregate(&cfg).unwrap();
        // linear(entry, linear(loop(linear(bb1, bb2)), exit))
        assert!(is_linear(&root));
        assert!(is_entry(root.child(0)));
        let inner = root.child(1);
        assert!(is_linear(inner));
        assert!(is_exit(inner.child(1)));
        let loop_node = inner.child(0);
        assert!(is_loop(loop_node));
        let body = loop_node.child(0);
        assert!(is_linear(body));
        assert!(is_block(body.child(0)));
        assert!(is_block(body.child(1)));
    }

    #[test]
    fn branch_reduction() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let bb1 = cfg.create_basic_block();
        let bb2 = cfg.create_basic_block();
        let bb3 = cfg.create_basic_block();
        let bb4 = cfg.create_basic_block();
        let join = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, bb1, 0);
        cfg.add_edge(split, bb3, 1);
        cfg.add_edge(bb1, bb2, 0);
        cfg.add_edge(bb2, join, 0);
        cfg.add_edge(bb3, bb4, 0);
        cfg.add_edge(bb4, join, 0);
        cfg.add_edge(join, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        let mut blocks = Vec::new();
        fringe(&root, &mut blocks);
        assert_eq!(blocks, vec![split, bb1, bb2, bb3, bb4, join]);

        // One branch with the split plus two arms.
        fn find_branch(node: &AggNode) -> Option<&AggNode> {
            if node.structure == Structure::Branch {
                return Some(node);
            }
            node.children.iter().find_map(find_branch)
        }
        let branch = find_branch(&root).expect("aggregation must produce a branch");
        assert!(is_branch(branch, 3));
        assert!(is_linear(branch.child(1)));
        assert!(is_linear(branch.child(2)));
    }

    #[test]
    fn if_then_with_empty_arm() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let then = cfg.create_basic_block();
        let join = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, then, 0);
        cfg.add_edge(split, join, 1);
        cfg.add_edge(then, join, 0);
        cfg.add_edge(join, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        fn find_branch(node: &AggNode) -> Option<&AggNode> {
            if node.structure == Structure::Branch {
                return Some(node);
            }
            node.children.iter().find_map(find_branch)
        }
        let branch = find_branch(&root).expect("aggregation must produce a branch");
        assert!(is_branch(branch, 3));
        assert!(is_block(branch.child(1)));
        assert_eq!(branch.child(2).structure, Structure::Block(None));
    }

    #[test]
    fn branch_of_loops() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let bb1 = cfg.create_basic_block();
        let bb2 = cfg.create_basic_block();
        let bb3 = cfg.create_basic_block();
        let bb4 = cfg.create_basic_block();
        let join = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, bb1, 0);
        cfg.add_edge(split, bb3, 1);
        cfg.add_edge(bb1, bb2, 0);
        cfg.add_edge(bb2, join, 0);
        cfg.add_edge(bb2, bb1, 1);
        cfg.add_edge(bb3, bb4, 0);
        cfg.add_edge(bb4, join, 0);
        cfg.add_edge(bb4, bb3, 1);
        cfg.add_edge(join, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        fn count_loops(node: &AggNode) -> usize {
            let own = usize::from(node.structure == Structure::Loop);
            own + node.children.iter().map(count_loops).sum::<usize>()
        }
        assert_eq!(count_loops(&root), 2);
    }

    #[test]
    fn unstructured_graph_is_rejected() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let a = cfg.create_basic_block();
        let b = cfg.create_basic_block();
        let c = cfg.create_basic_block();
        let d = cfg.create_basic_block();

        // Two arms crossing into different continuation points.
        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, a, 0);
        cfg.add_edge(split, b, 1);
        cfg.add_edge(a, c, 0);
        cfg.add_edge(a, d, 1);
        cfg.add_edge(b, d, 0);
        cfg.add_edge(c, cfg.exit(), 0);
        cfg.add_edge(d, cfg.exit(), 0);

        assert!(matches!(aggregate(&cfg), Err(FrontendError::NotStructured)));
        assert!(!is_structured(&cfg));
    }

    #[test]
    fn ids_are_preorder_unique() {
        let mut cfg = Cfg::new();
        let bb = cfg.create_basic_block();
        cfg.add_edge(cfg.entry(), bb, 0);
        cfg.add_edge(bb, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        let mut ids = Vec::new();
        fn collect(node: &AggNode, ids: &mut Vec<usize>) {
            ids.push(node.id);
            for child in &node.children {
                collect(child, ids);
            }
        }
        collect(&root, &mut ids);
        let unique: FxHashSet<usize> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert_eq!(root.id, 0);
    }
}
