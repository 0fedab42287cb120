//! Control-flow restructuring: rewrites arbitrary (including irreducible)
//! control flow into a strictly structured form in two phases. The loop
//! phase gives every strongly-connected component a single entry, a single
//! exit, and a single back edge, dispatching through fresh control
//! variables where the original flow had more. The branch phase funnels
//! every branch region into a single continuation point. Recorded back
//! edges are kept out of the graph until both phases are done, so the
//! branch phase and aggregation see an acyclic graph.

use indexmap::IndexMap;
use loomc_rvsdg::{BitValue, Operation};
use loomc_rvsdg_type::Type;
use rustc_hash::FxHashSet;

use crate::{
    cfg::{Cfg, CfgEdge, CfgNode},
    FrontendError,
};

/// A back edge removed during the loop phase and re-added after the branch
/// phase.
#[derive(Debug, Copy, Clone)]
struct BackEdge {
    source: CfgNode,
    sink: CfgNode,
    index: usize,
}

/// Restructures `cfg` in place; returns the back edges of the result, one
/// per loop.
pub fn restructure(cfg: &mut Cfg) -> Result<Vec<CfgEdge>, FrontendError> {
    if !cfg.is_closed() {
        return Err(FrontendError::MalformedCfg {
            reason: "control-flow graph is not closed".to_string(),
        });
    }

    let mut back_edges = Vec::new();
    restructure_loops(cfg, &mut back_edges);
    debug_assert!(cfg.is_acyclic(), "loop phase must leave the graph acyclic");

    restructure_branches(cfg);

    let edges = back_edges
        .iter()
        .map(|back_edge| cfg.add_edge(back_edge.source, back_edge.sink, back_edge.index))
        .collect();
    Ok(edges)
}

fn ceil_log2(n: usize) -> usize {
    if n <= 1 {
        0
    } else {
        (usize::BITS - (n - 1).leading_zeros()) as usize
    }
}

/// Appends `match q / branch` dispatch TACs to `block`
fn append_dispatch(cfg: &mut Cfg, block: CfgNode, selector: crate::cfg::Variable, n: usize) {
    let nbits = cfg.variables.ty(selector).bits_width().expect("selector is a bit variable");
    let ctl = cfg.variables.create(Type::Ctl(n), "#ctl#");
    cfg.append(
        block,
        Operation::identity_match(nbits, (n - 1) as u64),
        vec![selector],
        vec![ctl],
    );
    cfg.append(block, Operation::Branch { nalternatives: n }, vec![ctl], vec![]);
}

// --- loop phase ------------------------------------------------------------

fn restructure_loops(cfg: &mut Cfg, back_edges: &mut Vec<BackEdge>) {
    // Every round breaks all current cycles; nested loops surface as new
    // components once their enclosing back edge is gone.
    loop {
        let sccs = cfg.cyclic_sccs();
        if sccs.is_empty() {
            return;
        }
        for scc in sccs {
            restructure_loop(cfg, &scc, back_edges);
        }
    }
}

fn restructure_loop(cfg: &mut Cfg, scc: &FxHashSet<CfgNode>, back_edges: &mut Vec<BackEdge>) {
    let mut nodes: Vec<CfgNode> = scc.iter().copied().collect();
    nodes.sort();

    // Entry edges/vertices, exit edges/vertices, and repetition edges.
    let mut ae: Vec<CfgEdge> = Vec::new();
    let mut ve: IndexMap<CfgNode, usize> = IndexMap::new();
    let mut ax: Vec<CfgEdge> = Vec::new();
    let mut vx: IndexMap<CfgNode, usize> = IndexMap::new();
    let mut ar: Vec<CfgEdge> = Vec::new();
    for node in &nodes {
        for edge in cfg.in_edges(*node) {
            if !scc.contains(&cfg.edge(edge).source) {
                ae.push(edge);
                let next = ve.len();
                ve.entry(*node).or_insert(next);
            }
        }
        for edge in cfg.out_edges(*node) {
            let sink = cfg.edge(edge).sink;
            if !scc.contains(&sink) {
                ax.push(edge);
                let next = vx.len();
                vx.entry(sink).or_insert(next);
            }
        }
    }
    for node in &nodes {
        for edge in cfg.out_edges(*node) {
            if ve.contains_key(&cfg.edge(edge).sink) {
                ar.push(edge);
            }
        }
    }

    // The loop already has the required structure; record the back edge and
    // let the next round handle whatever the body still contains.
    if ae.len() == 1
        && ar.len() == 1
        && ax.len() == 1
        && cfg.edge(ar[0]).source == cfg.edge(ax[0]).source
    {
        let repetition = cfg.edge(ar[0]);
        back_edges.push(BackEdge {
            source: repetition.source,
            sink: repetition.sink,
            index: repetition.index,
        });
        cfg.remove_edge(ar[0]);
        return;
    }

    let nbits = ceil_log2(ve.len().max(vx.len())).max(1);
    let q = cfg.variables.create(Type::Bits(nbits), "#q#");
    let r = cfg.variables.create(Type::Bits(1), "#r#");

    // Tail block: repeat while r selects alternative 1.
    let vt = cfg.create_basic_block();
    append_dispatch(cfg, vt, r, 2);

    // Entry dispatcher.
    let new_ve = if ve.len() > 1 {
        let new_ve = cfg.create_basic_block();
        append_dispatch(cfg, new_ve, q, ve.len());
        for edge in &ae {
            let sink = cfg.edge(*edge).sink;
            let ass = cfg.create_basic_block();
            cfg.append(
                ass,
                Operation::BitConstant(BitValue::new(nbits, ve[&sink] as u64)),
                vec![],
                vec![q],
            );
            cfg.add_edge(ass, new_ve, 0);
            cfg.divert_edge(*edge, ass);
        }
        for (vertex, index) in &ve {
            cfg.add_edge(new_ve, *vertex, *index);
        }
        new_ve
    } else {
        *ve.first().expect("loop has at least one entry vertex").0
    };

    // Exit dispatcher.
    let new_vx = if vx.len() > 1 {
        let new_vx = cfg.create_basic_block();
        append_dispatch(cfg, new_vx, q, vx.len());
        for (vertex, index) in &vx {
            cfg.add_edge(new_vx, *vertex, *index);
        }
        new_vx
    } else {
        *vx.first().expect("loop has at least one exit vertex").0
    };

    for edge in &ax {
        let sink = cfg.edge(*edge).sink;
        let ass = cfg.create_basic_block();
        cfg.append(ass, Operation::BitConstant(BitValue::new(1, 0)), vec![], vec![r]);
        if vx.len() > 1 {
            cfg.append(
                ass,
                Operation::BitConstant(BitValue::new(nbits, vx[&sink] as u64)),
                vec![],
                vec![q],
            );
        }
        cfg.add_edge(ass, vt, 0);
        cfg.divert_edge(*edge, ass);
    }

    for edge in &ar {
        let sink = cfg.edge(*edge).sink;
        let ass = cfg.create_basic_block();
        cfg.append(ass, Operation::BitConstant(BitValue::new(1, 1)), vec![], vec![r]);
        if ve.len() > 1 {
            cfg.append(
                ass,
                Operation::BitConstant(BitValue::new(nbits, ve[&sink] as u64)),
                vec![],
                vec![q],
            );
        }
        cfg.add_edge(ass, vt, 0);
        cfg.divert_edge(*edge, ass);
    }

    cfg.add_edge(vt, new_vx, 0);
    back_edges.push(BackEdge {
        source: vt,
        sink: new_ve,
        index: 1,
    });
}

// --- branch phase ----------------------------------------------------------

fn restructure_branches(cfg: &mut Cfg) {
    let mut worklist = vec![(cfg.entry(), cfg.exit())];
    while let Some((start, end)) = worklist.pop() {
        restructure_branch_region(cfg, start, end, &mut worklist);
    }
}

fn find_head_branch(cfg: &Cfg, mut start: CfgNode, end: CfgNode) -> CfgNode {
    loop {
        if cfg.num_out_edges(start) > 1 || start == end {
            return start;
        }
        start = cfg.edge(cfg.out_edges(start)[0]).sink;
    }
}

/// The set of nodes reachable from `edge`'s sink through edges all of whose
/// predecessors are already inside the set; an iterative fixed point.
fn find_dominator_graph(cfg: &Cfg, edge: CfgEdge) -> FxHashSet<CfgNode> {
    let mut nodes: FxHashSet<CfgNode> = FxHashSet::default();
    let mut accepted: FxHashSet<CfgEdge> = FxHashSet::from_iter([edge]);

    let mut to_visit = std::collections::VecDeque::from([cfg.edge(edge).sink]);
    while let Some(node) = to_visit.pop_front() {
        if nodes.contains(&node) {
            continue;
        }
        let accept = cfg.in_edges(node).iter().all(|e| accepted.contains(e));
        if accept {
            nodes.insert(node);
            for e in cfg.out_edges(node) {
                accepted.insert(e);
                to_visit.push_back(cfg.edge(e).sink);
            }
        }
    }
    nodes
}

fn restructure_branch_region(
    cfg: &mut Cfg,
    start: CfgNode,
    end: CfgNode,
    worklist: &mut Vec<(CfgNode, CfgNode)>,
) {
    let head_branch = find_head_branch(cfg, start, end);
    if head_branch == end {
        return;
    }

    // The branch graphs of every arm, and their union.
    let af = cfg.out_edges(head_branch);
    let mut branch_nodes: Vec<FxHashSet<CfgNode>> = Vec::with_capacity(af.len());
    let mut all_branch_nodes: FxHashSet<CfgNode> = FxHashSet::default();
    for arm in &af {
        let nodes = find_dominator_graph(cfg, *arm);
        all_branch_nodes.extend(nodes.iter().copied());
        branch_nodes.push(nodes);
    }

    // Continuation points and per-arm exit edges.
    let mut cpoints: IndexMap<CfgNode, usize> = IndexMap::new();
    let mut branch_out_edges: Vec<Vec<CfgEdge>> = Vec::with_capacity(af.len());
    for (arm, nodes) in af.iter().zip(&branch_nodes) {
        let mut out_edges = Vec::new();
        if nodes.is_empty() {
            out_edges.push(*arm);
            let next = cpoints.len();
            cpoints.entry(cfg.edge(*arm).sink).or_insert(next);
        } else {
            let mut sorted: Vec<CfgNode> = nodes.iter().copied().collect();
            sorted.sort();
            for node in sorted {
                for edge in cfg.out_edges(node) {
                    let sink = cfg.edge(edge).sink;
                    if !all_branch_nodes.contains(&sink) {
                        out_edges.push(edge);
                        let next = cpoints.len();
                        cpoints.entry(sink).or_insert(next);
                    }
                }
            }
        }
        branch_out_edges.push(out_edges);
    }
    debug_assert!(!cpoints.is_empty(), "branch region has no continuation point");

    // A single continuation point needs no dispatch, only null blocks where
    // an arm exits through more than one edge.
    if cpoints.len() == 1 {
        let cpoint = *cpoints.first().unwrap().0;
        for (arm, out_edges) in af.iter().zip(&branch_out_edges) {
            if cfg.edge(*arm).sink == cpoint {
                continue;
            }
            if out_edges.len() == 1 {
                worklist.push((cfg.edge(*arm).sink, cfg.edge(out_edges[0]).source));
                continue;
            }
            let null = cfg.create_basic_block();
            cfg.add_edge(null, cpoint, 0);
            for edge in out_edges {
                cfg.divert_edge(*edge, null);
            }
            worklist.push((cfg.edge(*arm).sink, null));
        }
        worklist.push((cpoint, end));
        return;
    }

    // Dispatch through a fresh branch variable.
    let nbits = ceil_log2(cpoints.len());
    let p = cfg.variables.create(Type::Bits(nbits), "#p#");
    let vt = cfg.create_basic_block();
    append_dispatch(cfg, vt, p, cpoints.len());
    for (cpoint, index) in &cpoints {
        cfg.add_edge(vt, *cpoint, *index);
    }

    for (arm, out_edges) in af.iter().zip(&branch_out_edges) {
        if out_edges.len() == 1 {
            let boe = out_edges[0];
            let sink = cfg.edge(boe).sink;
            let arm_sink = cfg.edge(*arm).sink;
            let ass = cfg.create_basic_block();
            cfg.append(
                ass,
                Operation::BitConstant(BitValue::new(nbits, cpoints[&sink] as u64)),
                vec![],
                vec![p],
            );
            cfg.add_edge(ass, vt, 0);
            cfg.divert_edge(boe, ass);
            if boe != *arm {
                worklist.push((arm_sink, ass));
            }
            continue;
        }

        let null = cfg.create_basic_block();
        cfg.add_edge(null, vt, 0);
        for edge in out_edges {
            let sink = cfg.edge(*edge).sink;
            let ass = cfg.create_basic_block();
            cfg.append(
                ass,
                Operation::BitConstant(BitValue::new(nbits, cpoints[&sink] as u64)),
                vec![],
                vec![p],
            );
            cfg.add_edge(ass, null, 0);
            cfg.divert_edge(*edge, ass);
        }
        worklist.push((cfg.edge(*arm).sink, null));
    }

    worklist.push((vt, end));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    /// Two blocks forming an irreducible loop: both are entered from
    /// outside, so neither dominates the other.
    #[test]
    fn irreducible_loop() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let a = cfg.create_basic_block();
        let b = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        let p = cfg.variables.create(Type::Bits(1), "p");
        append_dispatch(&mut cfg, split, p, 2);
        cfg.add_edge(split, a, 0);
        cfg.add_edge(split, b, 1);
        cfg.add_edge(a, b, 0);
        cfg.add_edge(b, a, 1);
        cfg.add_edge(a, cfg.exit(), 1);
        cfg.add_edge(b, cfg.exit(), 0);

        let back_edges = restructure(&mut cfg).unwrap();

        // Exactly one back edge, and the graph is acyclic without it.
        assert_eq!(back_edges.len(), 1);
        cfg.remove_edge(back_edges[0]);
        assert!(cfg.is_acyclic());
    }

    #[test]
    fn well_formed_loop_is_left_alone() {
        let mut cfg = Cfg::new();
        let header = cfg.create_basic_block();
        let body = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), header, 0);
        cfg.add_edge(header, body, 0);
        cfg.add_edge(body, cfg.exit(), 0);
        cfg.add_edge(body, header, 1);

        let blocks_before = cfg.num_blocks();
        let back_edges = restructure(&mut cfg).unwrap();

        assert_eq!(back_edges.len(), 1);
        let back = cfg.edge(back_edges[0]);
        assert_eq!((back.source, back.sink), (body, header));
        // No dispatchers or assignment blocks were synthesized.
        assert_eq!(cfg.num_blocks(), blocks_before);
    }

    #[test]
    fn diamond_needs_no_restructuring() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let t = cfg.create_basic_block();
        let f = cfg.create_basic_block();
        let join = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, t, 0);
        cfg.add_edge(split, f, 1);
        cfg.add_edge(t, join, 0);
        cfg.add_edge(f, join, 0);
        cfg.add_edge(join, cfg.exit(), 0);

        let blocks_before = cfg.num_blocks();
        let back_edges = restructure(&mut cfg).unwrap();
        assert!(back_edges.is_empty());
        assert_eq!(cfg.num_blocks(), blocks_before);
    }

    /// A branch whose arms reach two different continuation points forces a
    /// dispatcher.
    #[test]
    fn multi_continuation_branch() {
        let mut cfg = Cfg::new();
        let split = cfg.create_basic_block();
        let a = cfg.create_basic_block();
        let b = cfg.create_basic_block();
        let c = cfg.create_basic_block();
        let d = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, a, 0);
        cfg.add_edge(split, b, 1);
        cfg.add_edge(a, c, 0);
        cfg.add_edge(b, d, 0);
        // Crossing edge: a's arm can also continue at d.
        cfg.add_edge(a, d, 1);
        cfg.add_edge(c, cfg.exit(), 0);
        cfg.add_edge(d, cfg.exit(), 0);

        let blocks_before = cfg.num_blocks();
        restructure(&mut cfg).unwrap();
        // Restructuring synthesized dispatch and assignment blocks.
        assert!(cfg.num_blocks() > blocks_before);
        assert!(cfg.is_acyclic());
    }

    #[test]
    fn open_graph_is_rejected() {
        let mut cfg = Cfg::new();
        let a = cfg.create_basic_block();
        cfg.add_edge(cfg.entry(), a, 0);
        // No edge to exit.
        let err = restructure(&mut cfg).unwrap_err();
        assert!(matches!(err, FrontendError::MalformedCfg { .. }));
    }
}
