//! Dead-node elimination: marks every output reachable backwards from the
//! graph's exports, then sweeps unmarked simple nodes bottom-up and shrinks
//! structural nodes whose ports the marking never reached. State edges make
//! side effects reachable, so a store whose memory state threads to an
//! export is never swept.

use loomc_rvsdg::{
    traverser::topdown_order, Graph, Node, NodeKind, Output, OutputOwner, Region, RvsdgModule,
    StructuralKind,
};
use loomc_session::{Statistic, StatisticsCollector};
use rustc_hash::FxHashSet;

use crate::Transform;

pub struct DeadNodeElimination;

impl Transform for DeadNodeElimination {
    fn name(&self) -> &'static str {
        "dne"
    }

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector) {
        let mut statistic = Statistic::new("dne", module.source_filename.clone());
        statistic
            .add_measurement("nodes-before", crate::count_nodes(&module.graph, module.graph.root()));
        statistic.start_timer("time");

        let graph = &mut module.graph;
        let root = graph.root();
        let mut marks = Marks::default();
        for result in graph.region_results(root).to_vec() {
            marks.mark(graph, graph.input_origin(result));
        }
        sweep_region(graph, root, &marks);

        statistic.stop_timer("time");
        statistic
            .add_measurement("nodes-after", crate::count_nodes(&module.graph, module.graph.root()));
        collector.collect(statistic);
    }
}

#[derive(Debug, Default)]
struct Marks {
    outputs: FxHashSet<Output>,
    live_nodes: FxHashSet<Node>,
}

impl Marks {
    fn is_output_marked(&self, output: Output) -> bool {
        self.outputs.contains(&output)
    }

    fn is_node_live(&self, node: Node) -> bool {
        self.live_nodes.contains(&node)
    }

    /// Marks `output` and everything it transitively depends on
    fn mark(&mut self, graph: &Graph, output: Output) {
        let mut worklist = vec![output];
        while let Some(output) = worklist.pop() {
            if !self.outputs.insert(output) {
                continue;
            }
            match graph.output_owner(output) {
                OutputOwner::Node { node, index } => {
                    self.mark_node_live(graph, node, &mut worklist);
                    match graph.node_kind(node) {
                        NodeKind::Simple(_) => {}
                        NodeKind::Structural(StructuralKind::Gamma) => {
                            for subregion in graph.node_subregions(node) {
                                worklist.push(
                                    graph.input_origin(graph.region_result(*subregion, index)),
                                );
                            }
                        }
                        NodeKind::Structural(StructuralKind::Theta) => {
                            let lv = graph.theta_loopvar(node, index);
                            worklist.push(graph.input_origin(lv.input));
                            worklist.push(graph.input_origin(lv.result));
                        }
                        NodeKind::Structural(StructuralKind::Lambda(_))
                        | NodeKind::Structural(StructuralKind::Delta(_)) => {}
                        NodeKind::Structural(StructuralKind::Phi { .. }) => {
                            let result = graph.region_result(graph.phi_subregion(node), index);
                            worklist.push(graph.input_origin(result));
                        }
                    }
                }
                OutputOwner::RegionArgument { region, index } => {
                    let Some(owner) = graph.region_owner(region) else {
                        continue;
                    };
                    self.mark_node_live(graph, owner, &mut worklist);
                    match graph.node_kind(owner) {
                        NodeKind::Structural(StructuralKind::Gamma) => {
                            worklist
                                .push(graph.input_origin(graph.node_input(owner, index + 1)));
                        }
                        NodeKind::Structural(StructuralKind::Theta) => {
                            let lv = graph.theta_loopvar(owner, index);
                            worklist.push(graph.input_origin(lv.input));
                            worklist.push(graph.input_origin(lv.result));
                        }
                        NodeKind::Structural(StructuralKind::Lambda(data)) => {
                            if index < data.nctxvars {
                                worklist
                                    .push(graph.input_origin(graph.node_input(owner, index)));
                            }
                        }
                        NodeKind::Structural(StructuralKind::Phi { nrecvars, .. }) => {
                            if index < *nrecvars {
                                worklist.push(
                                    graph.input_origin(graph.region_result(region, index)),
                                );
                            } else {
                                let ctx = index - nrecvars;
                                worklist.push(graph.input_origin(graph.node_input(owner, ctx)));
                            }
                        }
                        NodeKind::Structural(StructuralKind::Delta(_)) => {
                            worklist.push(graph.input_origin(graph.node_input(owner, index)));
                        }
                        NodeKind::Simple(_) => unreachable!("simple nodes own no regions"),
                    }
                }
            }
        }
    }

    /// The first marked output of a node makes the whole node live: all of
    /// a simple node's operands are needed, a gamma's predicate fires, a
    /// theta iterates, a lambda's results exist.
    fn mark_node_live(&mut self, graph: &Graph, node: Node, worklist: &mut Vec<Output>) {
        if !self.live_nodes.insert(node) {
            return;
        }
        match graph.node_kind(node) {
            NodeKind::Simple(_) => {
                for input in graph.node_inputs(node) {
                    worklist.push(graph.input_origin(*input));
                }
            }
            NodeKind::Structural(StructuralKind::Gamma) => {
                worklist.push(graph.input_origin(graph.gamma_predicate(node)));
            }
            NodeKind::Structural(StructuralKind::Theta) => {
                worklist.push(graph.input_origin(graph.theta_predicate(node)));
            }
            NodeKind::Structural(StructuralKind::Lambda(_)) => {
                let body = graph.lambda_subregion(node);
                for result in graph.region_results(body) {
                    worklist.push(graph.input_origin(*result));
                }
            }
            NodeKind::Structural(StructuralKind::Phi { .. })
            | NodeKind::Structural(StructuralKind::Delta(_)) => {
                for subregion in graph.node_subregions(node) {
                    for result in graph.region_results(*subregion) {
                        worklist.push(graph.input_origin(*result));
                    }
                }
            }
        }
    }
}

/// Sweeps a region bottom-up: consumers are removed before their producers,
/// fully dead structural nodes disappear whole, and partially live ones
/// shrink. Port removal is staged: dead results are detached first so the
/// nodes feeding them become removable, then the subregions are swept, then
/// the emptied arguments and ports go.
fn sweep_region(graph: &mut Graph, region: Region, marks: &Marks) {
    let mut order = topdown_order(graph, region);
    order.reverse();
    for node in order {
        if !graph.is_node_alive(node) {
            continue;
        }
        if !marks.is_node_live(node) {
            // Consumers were swept first, so a dead node has no users left.
            graph.remove_node(node);
            continue;
        }
        match graph.node_kind(node) {
            NodeKind::Simple(_) => {}
            NodeKind::Structural(StructuralKind::Gamma) => sweep_gamma(graph, node, marks),
            NodeKind::Structural(StructuralKind::Theta) => sweep_theta(graph, node, marks),
            NodeKind::Structural(StructuralKind::Lambda(_)) => {
                let body = graph.lambda_subregion(node);
                sweep_region(graph, body, marks);
                for index in (0..graph.lambda_data(node).nctxvars).rev() {
                    let argument = graph.region_argument(body, index);
                    if graph.output_users(argument).is_empty() {
                        graph.lambda_remove_ctxvar(node, index);
                    }
                }
            }
            NodeKind::Structural(StructuralKind::Phi { .. })
            | NodeKind::Structural(StructuralKind::Delta(_)) => {
                for subregion in graph.node_subregions(node).to_vec() {
                    sweep_region(graph, subregion, marks);
                }
            }
        }
    }
}

fn sweep_gamma(graph: &mut Graph, gamma: Node, marks: &Marks) {
    // Dead exit variables first: detaching their results frees the nodes
    // feeding them for the subregion sweep.
    for index in (0..graph.gamma_num_exitvars(gamma)).rev() {
        let xv = graph.gamma_exitvar(gamma, index);
        if !marks.is_output_marked(xv.output) {
            debug_assert!(graph.output_users(xv.output).is_empty());
            graph.gamma_remove_exitvar(gamma, index);
        }
    }
    for subregion in graph.node_subregions(gamma).to_vec() {
        sweep_region(graph, subregion, marks);
    }
    for index in (1..graph.node_inputs(gamma).len()).rev() {
        let ev = graph.gamma_entryvar(gamma, index);
        let dead = ev.arguments.iter().all(|argument| !marks.is_output_marked(*argument));
        if dead {
            graph.gamma_remove_entryvar(gamma, index);
        }
    }
}

fn sweep_theta(graph: &mut Graph, theta: Node, marks: &Marks) {
    let body = graph.theta_subregion(theta);
    let dead: Vec<usize> = (0..graph.theta_num_loopvars(theta))
        .rev()
        .filter(|index| {
            let lv = graph.theta_loopvar(theta, *index);
            !marks.is_output_marked(lv.output) && !marks.is_output_marked(lv.argument)
        })
        .collect();

    // Detach the dead post-results (descending, so the remaining indices
    // stay valid), free the body, then drop the now-unused pre-arguments
    // and ports in the same order.
    for index in &dead {
        graph.remove_region_result(body, index + 1);
    }
    sweep_region(graph, body, marks);
    for index in &dead {
        graph.remove_region_argument(body, *index);
        graph.remove_node_output(theta, *index);
        graph.remove_node_input(theta, *index);
    }
}

#[cfg(test)]
mod tests {
    use loomc_rvsdg::types::Type;
    use loomc_rvsdg::{BitBinaryKind, Operation, OperationClass};
    use pretty_assertions::assert_eq;

    use super::*;

    fn add_op() -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Add,
            width: 32,
        }
    }

    fn run_dne(graph: Graph) -> Graph {
        let mut module = RvsdgModule::new("dne.ll");
        module.graph = graph;
        let mut collector = StatisticsCollector::disabled();
        DeadNodeElimination.run(&mut module, &mut collector);
        module.graph.assert_consistency();
        module.graph
    }

    #[test]
    fn unexported_chains_are_swept() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let live = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let dead1 = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let dead1_out = graph.node_output(dead1, 0);
        let _dead2 = graph.add_simple_node(root, add_op(), &[dead1_out, x]).unwrap();
        graph.export(graph.node_output(live, 0), "live");

        let graph = run_dne(graph);
        assert_eq!(graph.region_num_nodes(graph.root()), 1);
    }

    #[test]
    fn gamma_shrinks_to_its_live_ports() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev_x = graph.gamma_add_entryvar(gamma, x);
        let ev_y = graph.gamma_add_entryvar(gamma, y);
        let xv_live = graph.gamma_add_exitvar(gamma, &[ev_x.arguments[0], ev_x.arguments[1]]);
        let _xv_dead = graph.gamma_add_exitvar(gamma, &[ev_y.arguments[0], ev_y.arguments[1]]);
        graph.export(xv_live.output, "out");

        let graph = run_dne(graph);
        // The dead exit variable and the entry variable feeding only it are
        // gone.
        assert_eq!(graph.gamma_num_exitvars(gamma), 1);
        assert_eq!(graph.gamma_num_entryvars(gamma), 1);
    }

    #[test]
    fn theta_drops_dead_loop_variables() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let theta = graph.create_theta(root);
        let lv_c = graph.theta_add_loopvar(theta, c);
        let lv_x = graph.theta_add_loopvar(theta, x);
        let lv_dead = graph.theta_add_loopvar(theta, y);
        let body = graph.theta_subregion(theta);
        let next = graph.add_simple_node(body, add_op(), &[lv_x.argument, lv_x.argument]).unwrap();
        // The dead loop variable is rewritten by a body node nothing needs.
        let dead_next = graph
            .add_simple_node(body, add_op(), &[lv_dead.argument, lv_dead.argument])
            .unwrap();
        graph.divert_input_origin(lv_x.result, graph.node_output(next, 0));
        graph.divert_input_origin(lv_dead.result, graph.node_output(dead_next, 0));
        graph.theta_set_predicate(theta, lv_c.argument);
        graph.export(lv_x.output, "x");

        let graph = run_dne(graph);
        // Predicate and exported loop variables survive; the dead one and
        // its body computation are gone.
        assert_eq!(graph.theta_num_loopvars(theta), 2);
        assert_eq!(graph.region_num_nodes(graph.theta_subregion(theta)), 1);
    }

    #[test]
    fn fully_dead_structural_nodes_disappear() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let live = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, x);
        let _xv = graph.gamma_add_exitvar(gamma, &[ev.arguments[0], ev.arguments[1]]);
        graph.export(graph.node_output(live, 0), "out");

        let graph = run_dne(graph);
        assert!(!graph.is_node_alive(gamma));
        assert_eq!(graph.region_num_nodes(graph.root()), 1);
    }

    #[test]
    fn stores_threaded_to_exports_survive() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let ptr = graph.import(Type::Ptr, "p");
        let value = graph.import(Type::Bits(32), "v");
        let mem = graph.import(Type::MemState, "mem");
        let root = graph.root();

        let store = graph
            .add_simple_node(
                root,
                Operation::Store {
                    ty: Type::Bits(32),
                    alignment: 4,
                    volatile: false,
                },
                &[ptr, value, mem],
            )
            .unwrap();
        graph.export(graph.node_output(store, 0), "mem");

        let graph = run_dne(graph);
        assert!(graph.is_node_alive(store));
    }
}
