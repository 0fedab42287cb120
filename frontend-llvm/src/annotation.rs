//! Demand annotation over the aggregation tree: for every subtree, the set
//! of variables it reads before writing (which must flow in), the set it
//! definitely writes, and the set it may write. Construction combines these
//! bottom-up sets with top-down liveness to size gamma entry/exit variables
//! and theta loop variables.

use indexmap::IndexSet;

use crate::{
    aggregation::{AggNode, Structure},
    cfg::{Cfg, Variable},
};

#[derive(Debug, Default, Clone)]
pub struct Demand {
    /// Variables the subtree needs bound on entry: read before any write of
    /// its own, or written only on some of its paths (the untaken paths
    /// pass the incoming value through).
    pub reads: IndexSet<Variable>,
    /// Variables the subtree writes on every path
    pub writes: IndexSet<Variable>,
    /// Variables the subtree writes on at least one path
    pub may_writes: IndexSet<Variable>,
}

/// Computes the demand of every aggregation node, indexed by [AggNode::id]
pub fn annotate(cfg: &Cfg, root: &AggNode) -> Vec<Demand> {
    let mut demands = vec![Demand::default(); root.num_nodes()];
    annotate_node(cfg, root, &mut demands);
    demands
}

fn annotate_node(cfg: &Cfg, node: &AggNode, demands: &mut Vec<Demand>) {
    for child in &node.children {
        annotate_node(cfg, child, demands);
    }

    let demand = match &node.structure {
        Structure::Entry => {
            let writes: IndexSet<Variable> = cfg.arguments.iter().copied().collect();
            Demand {
                reads: IndexSet::new(),
                may_writes: writes.clone(),
                writes,
            }
        }
        Structure::Exit => Demand {
            reads: cfg.results.iter().copied().collect(),
            writes: IndexSet::new(),
            may_writes: IndexSet::new(),
        },
        Structure::Block(None) => Demand::default(),
        Structure::Block(Some(block)) => {
            let mut demand = Demand::default();
            for tac in &cfg.block(*block).tacs {
                for operand in &tac.operands {
                    if !demand.writes.contains(operand) {
                        demand.reads.insert(*operand);
                    }
                }
                for result in &tac.results {
                    demand.writes.insert(*result);
                }
            }
            demand.may_writes = demand.writes.clone();
            demand
        }
        Structure::Linear => {
            let first = demands[node.child(0).id].clone();
            let second = &demands[node.child(1).id];
            let mut reads = first.reads;
            for read in &second.reads {
                if !first.writes.contains(read) {
                    reads.insert(*read);
                }
            }
            let mut writes = first.writes;
            writes.extend(second.writes.iter().copied());
            let mut may_writes = first.may_writes;
            may_writes.extend(second.may_writes.iter().copied());
            Demand {
                reads,
                writes,
                may_writes,
            }
        }
        Structure::Branch => {
            let split = demands[node.child(0).id].clone();
            let arms: Vec<&Demand> =
                node.children[1..].iter().map(|arm| &demands[arm.id]).collect();

            // Everything any arm reads flows in, and so does everything
            // written on some paths but not all of them: the paths that do
            // not write such a variable pass the incoming value through.
            let mut arm_reads: IndexSet<Variable> = IndexSet::new();
            let mut any_writes: IndexSet<Variable> = IndexSet::new();
            for arm in &arms {
                arm_reads.extend(arm.reads.iter().copied());
                any_writes.extend(arm.may_writes.iter().copied());
            }
            let all_writes: IndexSet<Variable> = any_writes
                .iter()
                .copied()
                .filter(|variable| arms.iter().all(|arm| arm.writes.contains(variable)))
                .collect();

            let mut reads = split.reads.clone();
            for read in arm_reads.iter().chain(any_writes.difference(&all_writes)) {
                if !split.writes.contains(read) {
                    reads.insert(*read);
                }
            }
            let mut writes = split.writes;
            writes.extend(all_writes.iter().copied());
            let mut may_writes = split.may_writes;
            may_writes.extend(any_writes.iter().copied());
            Demand {
                reads,
                writes,
                may_writes,
            }
        }
        Structure::Loop => {
            // The body runs at least once, and every variable it touches is
            // carried by a loop variable, so all of them must be bound on
            // entry.
            let body = &demands[node.child(0).id];
            let mut reads = body.reads.clone();
            reads.extend(body.may_writes.iter().copied());
            Demand {
                reads,
                writes: body.writes.clone(),
                may_writes: body.may_writes.clone(),
            }
        }
    };

    demands[node.id] = demand;
}

#[cfg(test)]
mod tests {
    use loomc_rvsdg::{BitBinaryKind, Operation};
    use loomc_rvsdg_type::Type;

    use super::*;
    use crate::aggregation::aggregate;

    #[test]
    fn straight_line_demand() {
        let mut cfg = Cfg::new();
        let x = cfg.variables.create(Type::Bits(32), "x");
        let y = cfg.variables.create(Type::Bits(32), "y");
        cfg.arguments.push(x);
        cfg.results.push(y);

        let bb = cfg.create_basic_block();
        cfg.append(
            bb,
            Operation::BitBinary {
                kind: BitBinaryKind::Add,
                width: 32,
            },
            vec![x, x],
            vec![y],
        );
        cfg.add_edge(cfg.entry(), bb, 0);
        cfg.add_edge(bb, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        let demands = annotate(&cfg, &root);

        // The root reads nothing from outside and writes both variables.
        assert!(demands[root.id].reads.is_empty());
        assert!(demands[root.id].writes.contains(&x));
        assert!(demands[root.id].writes.contains(&y));
    }

    #[test]
    fn partial_writes_count_as_reads() {
        let mut cfg = Cfg::new();
        let p = cfg.variables.create(Type::Bits(1), "p");
        let v = cfg.variables.create(Type::Bits(32), "v");
        let ctl = cfg.variables.create(Type::Ctl(2), "ctl");
        cfg.arguments.push(p);
        cfg.results.push(v);

        let split = cfg.create_basic_block();
        cfg.append(
            split,
            Operation::Match {
                nbits: 1,
                mapping: vec![(0, 0)],
                default_alternative: 1,
                nalternatives: 2,
            },
            vec![p],
            vec![ctl],
        );
        cfg.append(split, Operation::Branch { nalternatives: 2 }, vec![ctl], vec![]);
        let then = cfg.create_basic_block();
        cfg.append(
            then,
            Operation::BitConstant(loomc_rvsdg::BitValue::new(32, 1)),
            vec![],
            vec![v],
        );
        let join = cfg.create_basic_block();

        cfg.add_edge(cfg.entry(), split, 0);
        cfg.add_edge(split, then, 0);
        cfg.add_edge(split, join, 1);
        cfg.add_edge(then, join, 0);
        cfg.add_edge(join, cfg.exit(), 0);

        let root = aggregate(&cfg).unwrap();
        let demands = annotate(&cfg, &root);

        fn find_branch(node: &AggNode) -> Option<&AggNode> {
            if node.structure == Structure::Branch {
                return Some(node);
            }
            node.children.iter().find_map(find_branch)
        }
        let branch = find_branch(&root).unwrap();
        // `v` is written by the taken arm only, so it must flow in for the
        // empty arm's pass-through, and it is not a definite write.
        assert!(demands[branch.id].reads.contains(&v));
        assert!(demands[branch.id].may_writes.contains(&v));
        assert!(!demands[branch.id].writes.contains(&v));
    }
}
