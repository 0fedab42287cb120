//! Common-node elimination: detects outputs that provably compute the same
//! value and diverts every user to one representative per congruence
//! class. Congruence is a fixed point: simple nodes are congruent when
//! their operations are equal and their operands congruent; gamma entry
//! variables when their origins are congruent; gamma exit variables when
//! their per-subregion results are pairwise congruent; theta loop variables
//! when both their inputs and their post-results are congruent.

use loomc_rvsdg::{
    traverser::topdown_order, Graph, Node, NodeKind, Operation, Output, Region, RvsdgModule,
    StructuralKind,
};
use loomc_session::{Statistic, StatisticsCollector};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::Transform;

pub struct CommonNodeElimination;

impl Transform for CommonNodeElimination {
    fn name(&self) -> &'static str {
        "cne"
    }

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector) {
        let mut statistic = Statistic::new("cne", module.source_filename.clone());
        statistic.add_measurement("inputs-before", crate::count_inputs(&module.graph, module.graph.root()));
        statistic.start_timer("time");

        let graph = &mut module.graph;
        let root = graph.root();
        let mut congruence = Congruence::default();
        mark_region(graph, root, &mut congruence);
        divert_region(graph, root, &mut congruence);
        sweep_region(graph, root);

        statistic.stop_timer("time");
        statistic.add_measurement("inputs-after", crate::count_inputs(&module.graph, module.graph.root()));
        collector.collect(statistic);
    }
}

/// A union-find over outputs; the representative of a class is its oldest
/// output, which every other member's users are diverted to.
#[derive(Debug, Default, Clone)]
struct Congruence {
    parent: FxHashMap<Output, Output>,
}

impl Congruence {
    fn find(&mut self, output: Output) -> Output {
        let mut root = output;
        while let Some(parent) = self.parent.get(&root) {
            root = *parent;
        }
        let mut current = output;
        while current != root {
            let parent = self.parent[&current];
            self.parent.insert(current, root);
            current = parent;
        }
        root
    }

    fn union(&mut self, a: Output, b: Output) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (representative, absorbed) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent.insert(absorbed, representative);
    }
}

fn operand_reps(graph: &Graph, node: Node, congruence: &mut Congruence) -> SmallVec<[Output; 4]> {
    graph
        .node_inputs(node)
        .iter()
        .map(|input| congruence.find(graph.input_origin(*input)))
        .collect()
}

fn mark_region(graph: &Graph, region: Region, congruence: &mut Congruence) {
    let mut known: FxHashMap<(Operation, SmallVec<[Output; 4]>), Node> = FxHashMap::default();
    for node in topdown_order(graph, region) {
        match graph.node_kind(node) {
            NodeKind::Simple(op) => {
                let key = (op.clone(), operand_reps(graph, node, congruence));
                match known.get(&key) {
                    Some(existing) => {
                        for (a, b) in
                            graph.node_outputs(*existing).iter().zip(graph.node_outputs(node))
                        {
                            congruence.union(*a, *b);
                        }
                    }
                    None => {
                        known.insert(key, node);
                    }
                }
            }
            NodeKind::Structural(StructuralKind::Gamma) => mark_gamma(graph, node, congruence),
            NodeKind::Structural(StructuralKind::Theta) => mark_theta(graph, node, congruence),
            NodeKind::Structural(_) => {
                for subregion in graph.node_subregions(node) {
                    mark_region(graph, *subregion, congruence);
                }
            }
        }
    }
}

fn mark_gamma(graph: &Graph, gamma: Node, congruence: &mut Congruence) {
    // Entry variables with congruent origins share their arguments.
    let mut first_by_origin: FxHashMap<Output, usize> = FxHashMap::default();
    for index in 1..graph.node_inputs(gamma).len() {
        let rep = congruence.find(graph.input_origin(graph.node_input(gamma, index)));
        match first_by_origin.get(&rep) {
            Some(first) => {
                let existing = graph.gamma_entryvar(gamma, *first);
                let duplicate = graph.gamma_entryvar(gamma, index);
                for (a, b) in existing.arguments.iter().zip(duplicate.arguments.iter()) {
                    congruence.union(*a, *b);
                }
            }
            None => {
                first_by_origin.insert(rep, index);
            }
        }
    }

    for subregion in graph.node_subregions(gamma) {
        mark_region(graph, *subregion, congruence);
    }

    // Exit variables whose per-subregion results are pairwise congruent
    // share their outputs.
    let mut first_by_results: FxHashMap<SmallVec<[Output; 2]>, usize> = FxHashMap::default();
    for index in 0..graph.gamma_num_exitvars(gamma) {
        let xv = graph.gamma_exitvar(gamma, index);
        let reps: SmallVec<[Output; 2]> = xv
            .results
            .iter()
            .map(|result| congruence.find(graph.input_origin(*result)))
            .collect();
        match first_by_results.get(&reps) {
            Some(first) => {
                let existing = graph.gamma_exitvar(gamma, *first);
                congruence.union(existing.output, xv.output);
            }
            None => {
                first_by_results.insert(reps, index);
            }
        }
    }
}

/// Loop variables are congruent when their inputs are congruent *and* their
/// post-results stay congruent under that assumption; refined to a fixed
/// point before anything is committed.
fn mark_theta(graph: &Graph, theta: Node, congruence: &mut Congruence) {
    let nloopvars = graph.theta_num_loopvars(theta);
    let body = graph.theta_subregion(theta);

    let mut partition: Vec<usize> = Vec::with_capacity(nloopvars);
    {
        let mut group_of: FxHashMap<Output, usize> = FxHashMap::default();
        for index in 0..nloopvars {
            let rep = congruence.find(graph.input_origin(graph.node_input(theta, index)));
            let next = group_of.len();
            partition.push(*group_of.entry(rep).or_insert(next));
        }
    }

    loop {
        let mut trial = congruence.clone();
        for group in 0..nloopvars {
            let members: Vec<usize> =
                (0..nloopvars).filter(|i| partition[*i] == group).collect();
            for window in members.windows(2) {
                let a = graph.theta_loopvar(theta, window[0]).argument;
                let b = graph.theta_loopvar(theta, window[1]).argument;
                trial.union(a, b);
            }
        }
        mark_region(graph, body, &mut trial);

        let mut refined: Vec<usize> = Vec::with_capacity(nloopvars);
        let mut group_of: FxHashMap<(usize, Output), usize> = FxHashMap::default();
        for index in 0..nloopvars {
            let result = graph.theta_loopvar(theta, index).result;
            let rep = trial.find(graph.input_origin(result));
            let next = group_of.len();
            refined.push(*group_of.entry((partition[index], rep)).or_insert(next));
        }

        if refined == partition {
            *congruence = trial;
            break;
        }
        partition = refined;
    }

    for group in 0..nloopvars {
        let members: Vec<usize> = (0..nloopvars).filter(|i| partition[*i] == group).collect();
        for window in members.windows(2) {
            let a = graph.theta_loopvar(theta, window[0]).output;
            let b = graph.theta_loopvar(theta, window[1]).output;
            congruence.union(a, b);
        }
    }
}

fn divert_region(graph: &mut Graph, region: Region, congruence: &mut Congruence) {
    for node in topdown_order(graph, region) {
        match graph.node_kind(node) {
            NodeKind::Simple(_) => {
                for output in graph.node_outputs(node).to_vec() {
                    let representative = congruence.find(output);
                    if representative != output {
                        graph.divert_users(output, representative);
                    }
                }
            }
            NodeKind::Structural(_) => {
                for subregion in graph.node_subregions(node).to_vec() {
                    for argument in graph.region_arguments(subregion).to_vec() {
                        let representative = congruence.find(argument);
                        if representative != argument {
                            graph.divert_users(argument, representative);
                        }
                    }
                    divert_region(graph, subregion, congruence);
                }
                for output in graph.node_outputs(node).to_vec() {
                    let representative = congruence.find(output);
                    if representative != output {
                        graph.divert_users(output, representative);
                    }
                }
            }
        }
    }
}

/// Removes simple nodes whose outputs all lost their users to a
/// representative; dead entry/exit/loop variables are left to dead-node
/// elimination, which follows in every schedule that runs this pass.
fn sweep_region(graph: &mut Graph, region: Region) {
    let mut order = topdown_order(graph, region);
    order.reverse();
    for node in order {
        if !graph.is_node_alive(node) {
            continue;
        }
        match graph.node_kind(node) {
            NodeKind::Simple(_) => {
                let dead = graph
                    .node_outputs(node)
                    .iter()
                    .all(|output| graph.output_users(*output).is_empty());
                if dead {
                    graph.remove_node(node);
                }
            }
            NodeKind::Structural(_) => {
                for subregion in graph.node_subregions(node).to_vec() {
                    sweep_region(graph, subregion);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use loomc_rvsdg::types::Type;
    use loomc_rvsdg::{BitBinaryKind, Graph, NormalFormFlags, OperationClass};
    use loomc_session::StatisticsCollector;
    use pretty_assertions::assert_eq;

    use super::*;

    fn add_op() -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Add,
            width: 32,
        }
    }

    fn neg_op() -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Sub,
            width: 32,
        }
    }

    fn module_with(graph: Graph) -> RvsdgModule {
        let mut module = RvsdgModule::new("test.ll");
        module.graph = graph;
        module
    }

    fn run_cne(module: &mut RvsdgModule) {
        let mut collector = StatisticsCollector::disabled();
        CommonNodeElimination.run(module, &mut collector);
    }

    #[test]
    fn duplicate_simple_nodes_merge() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let b1 = graph.add_simple_node(root, add_op(), &[x, y]).unwrap();
        let b2 = graph.add_simple_node(root, add_op(), &[x, y]).unwrap();
        let b3 = graph.add_simple_node(root, neg_op(), &[x, y]).unwrap();
        graph.export(graph.node_output(b1, 0), "b1");
        graph.export(graph.node_output(b2, 0), "b2");
        graph.export(graph.node_output(b3, 0), "b3");

        let mut module = module_with(graph);
        run_cne(&mut module);
        let graph = &module.graph;
        graph.assert_consistency();

        // Both adds now feed both exports; the sub is untouched.
        let root = graph.root();
        assert_eq!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 1))
        );
        assert_ne!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 2))
        );
        assert_eq!(graph.region_num_nodes(root), 2);
    }

    #[test]
    fn transitive_congruence_through_operands() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let z = graph.import(Type::Bits(32), "z");
        let root = graph.root();

        // n1 and n2 are congruent constants; b3 and b4 consume them and
        // become congruent transitively.
        let n1 = graph
            .add_simple_node(root, Operation::BitConstant(loomc_rvsdg::BitValue::new(32, 5)), &[])
            .unwrap();
        let n2 = graph
            .add_simple_node(root, Operation::BitConstant(loomc_rvsdg::BitValue::new(32, 5)), &[])
            .unwrap();
        let b3 = graph
            .add_simple_node(root, add_op(), &[graph.node_output(n1, 0), z])
            .unwrap();
        let b4 = graph
            .add_simple_node(root, add_op(), &[graph.node_output(n2, 0), z])
            .unwrap();
        graph.export(graph.node_output(b3, 0), "b3");
        graph.export(graph.node_output(b4, 0), "b4");

        let mut module = module_with(graph);
        run_cne(&mut module);
        let graph = &module.graph;
        graph.assert_consistency();

        let root = graph.root();
        assert_eq!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 1))
        );
        // One constant and one add remain.
        assert_eq!(graph.region_num_nodes(root), 2);
    }

    #[test]
    fn gamma_entry_and_exit_variables_merge() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let u1 = graph.add_simple_node(root, neg_op(), &[x, x]).unwrap();
        let u2 = graph.add_simple_node(root, neg_op(), &[x, x]).unwrap();

        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev1 = graph.gamma_add_entryvar(gamma, graph.node_output(u1, 0));
        let ev2 = graph.gamma_add_entryvar(gamma, graph.node_output(u2, 0));
        let ev3 = graph.gamma_add_entryvar(gamma, y);
        let xv1 = graph.gamma_add_exitvar(gamma, &[ev1.arguments[0], ev2.arguments[1]]);
        let xv2 = graph.gamma_add_exitvar(gamma, &[ev2.arguments[0], ev2.arguments[1]]);
        let xv3 = graph.gamma_add_exitvar(gamma, &[ev3.arguments[0], ev3.arguments[1]]);
        graph.export(xv1.output, "x1");
        graph.export(xv2.output, "x2");
        graph.export(xv3.output, "x3");

        let mut module = module_with(graph);
        run_cne(&mut module);
        let graph = &module.graph;
        graph.assert_consistency();

        // u1 and u2 merged, so ev1/ev2 share an origin and xv1/xv2 collapse.
        assert_eq!(
            graph.input_origin(graph.node_input(gamma, 1)),
            graph.input_origin(graph.node_input(gamma, 2))
        );
        let root = graph.root();
        assert_eq!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 1))
        );
        assert_ne!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 2))
        );
    }

    #[test]
    fn theta_loop_variables_merge() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let theta = graph.create_theta(root);
        let lv_c = graph.theta_add_loopvar(theta, c);
        let lv2 = graph.theta_add_loopvar(theta, x);
        let lv3 = graph.theta_add_loopvar(theta, x);
        let body = graph.theta_subregion(theta);

        let u1 = graph.add_simple_node(body, neg_op(), &[lv2.argument, lv2.argument]).unwrap();
        let u2 = graph.add_simple_node(body, neg_op(), &[lv3.argument, lv3.argument]).unwrap();
        graph.divert_input_origin(lv2.result, graph.node_output(u1, 0));
        graph.divert_input_origin(lv3.result, graph.node_output(u2, 0));
        graph.theta_set_predicate(theta, lv_c.argument);

        graph.export(lv2.output, "lv2");
        graph.export(lv3.output, "lv3");

        let mut module = module_with(graph);
        run_cne(&mut module);
        let graph = &module.graph;
        graph.assert_consistency();

        // The two loop variables carry the same value through every
        // iteration, so the exports collapse onto one output.
        let root = graph.root();
        assert_eq!(
            graph.input_origin(graph.region_result(root, 0)),
            graph.input_origin(graph.region_result(root, 1))
        );
        // And inside the body only one of the unary chains is still alive.
        assert_eq!(graph.region_num_nodes(body), 1);
    }

    #[test]
    fn cne_is_idempotent() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();
        let b1 = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let b2 = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        graph.export(graph.node_output(b1, 0), "b1");
        graph.export(graph.node_output(b2, 0), "b2");

        let mut module = module_with(graph);
        run_cne(&mut module);
        let after_first = crate::count_nodes(&module.graph, module.graph.root());
        run_cne(&mut module);
        let after_second = crate::count_nodes(&module.graph, module.graph.root());
        assert_eq!(after_first, after_second);
        module.graph.assert_consistency();
    }

    #[test]
    fn unused_flag_is_noted() {
        // NormalFormFlags is re-exported for pass configuration; make sure
        // disabling CSE at creation leaves work for this pass.
        let mut graph = Graph::new();
        graph
            .normal_forms_mut()
            .set(OperationClass::Simple, NormalFormFlags::CSE, false);
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();
        let b1 = graph.add_simple_node_normalized(root, add_op(), &[x, x]).unwrap();
        let b2 = graph.add_simple_node_normalized(root, add_op(), &[x, x]).unwrap();
        assert_ne!(b1, b2);

        graph.export(b1[0], "b1");
        graph.export(b2[0], "b2");
        let mut module = module_with(graph);
        run_cne(&mut module);
        assert_eq!(crate::count_nodes(&module.graph, module.graph.root()), 1);
    }
}
