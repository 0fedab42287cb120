//! Gamma pull-in: absorbs nodes from outside a gamma into its subregions.
//! The top variant pulls producers of entry variables in; the bottom
//! variant pulls unique consumers of the gamma's outputs in, creating new
//! exit variables. The heuristic entry point only pulls a node whose value
//! is used in exactly one subregion, and leaves empty two-subregion gammas
//! untouched so they can later lower to a select.

use loomc_rvsdg::{
    traverser::topdown_order, Graph, InputOwner, Node, NodeKind, Output, Region, RvsdgModule,
};
use loomc_session::{Statistic, StatisticsCollector};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::Transform;

pub struct GammaPullIn;

impl Transform for GammaPullIn {
    fn name(&self) -> &'static str {
        "pull"
    }

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector) {
        let mut statistic = Statistic::new("pull", module.source_filename.clone());
        statistic
            .add_measurement("inputs-before", crate::count_inputs(&module.graph, module.graph.root()));
        statistic.start_timer("time");

        let root = module.graph.root();
        pull_region(&mut module.graph, root);

        statistic.stop_timer("time");
        statistic
            .add_measurement("inputs-after", crate::count_inputs(&module.graph, module.graph.root()));
        collector.collect(statistic);
    }
}

fn is_empty(graph: &Graph, gamma: Node) -> bool {
    graph
        .node_subregions(gamma)
        .iter()
        .all(|subregion| graph.region_num_nodes(*subregion) == 0)
}

/// The unique successor node of `node`, if all users of all outputs belong
/// to a single node; users that are region results have no node and make
/// the successor non-unique.
fn single_successor(graph: &Graph, node: Node) -> Option<Node> {
    let mut successors: FxHashSet<Option<Node>> = FxHashSet::default();
    for output in graph.node_outputs(node) {
        for user in graph.output_users(*output) {
            match graph.input_owner(*user) {
                InputOwner::Node { node, .. } => successors.insert(Some(node)),
                InputOwner::RegionResult { .. } => successors.insert(None),
            };
        }
    }
    if successors.len() == 1 {
        successors.into_iter().next().flatten()
    } else {
        None
    }
}

/// Copies `node` into every subregion of `gamma`, routing its operands
/// through fresh entry variables and diverting the arms' uses of its value
/// to the copies.
fn pullin_node(graph: &mut Graph, gamma: Node, node: Node) {
    let nsubregions = graph.node_subregions(gamma).len();
    let mut operands: Vec<SmallVec<[Output; 4]>> = vec![SmallVec::new(); nsubregions];
    for input in graph.node_inputs(node).to_vec() {
        let ev = graph.gamma_add_entryvar(gamma, graph.input_origin(input));
        for (per_subregion, argument) in operands.iter_mut().zip(ev.arguments) {
            per_subregion.push(argument);
        }
    }

    for index in 0..nsubregions {
        let subregion = graph.node_subregion(gamma, index);
        let copy = graph
            .copy_simple_node(node, subregion, &operands[index])
            .expect("pulled node keeps its signature");

        for (position, output) in graph.node_outputs(node).to_vec().into_iter().enumerate() {
            for user in graph.output_users(output).to_vec() {
                let entry_index = match graph.input_owner(user) {
                    InputOwner::Node { node: owner, index } if owner == gamma => index,
                    owner => panic!("pulled node has a non-gamma user: {owner:?}"),
                };
                let argument = graph.region_argument(subregion, entry_index - 1);
                let replacement = graph.node_output(copy, position);
                graph.divert_users(argument, replacement);
            }
        }
    }
}

/// Removes the entry variables that routed `node`'s outputs, then the node
/// itself.
fn cleanup(graph: &mut Graph, gamma: Node, node: Node) {
    debug_assert_eq!(single_successor(graph, node), Some(gamma));
    for output in graph.node_outputs(node).to_vec() {
        while let Some(user) = graph.output_users(output).first().copied() {
            let entry_index = match graph.input_owner(user) {
                InputOwner::Node { index, .. } => index,
                owner => panic!("pulled node has a non-gamma user: {owner:?}"),
            };
            graph.gamma_remove_entryvar(gamma, entry_index);
        }
    }
    graph.remove_node(node);
}

/// Pulls every entry-variable producer with no other consumer into the
/// gamma, regardless of which subregions use it.
pub fn pullin_top(graph: &mut Graph, gamma: Node) {
    let prednode = graph.producer(graph.input_origin(graph.gamma_predicate(gamma)));
    let mut index = 1;
    while index < graph.node_inputs(gamma).len() {
        let origin = graph.input_origin(graph.node_input(gamma, index));
        let node = graph.producer(origin);
        match node {
            Some(node)
                if Some(node) != prednode && single_successor(graph, node) == Some(gamma) =>
            {
                pullin_node(graph, gamma, node);
                cleanup(graph, gamma, node);
                index = 1;
            }
            _ => index += 1,
        }
    }
}

/// Pulls unique successors of the gamma into it, adding exit variables for
/// the values their copies produce.
pub fn pullin_bottom(graph: &mut Graph, gamma: Node) {
    let gamma_depth = graph.node_depth(gamma);
    let mut workset: Vec<Node> = Vec::new();
    let mut seen: FxHashSet<Node> = FxHashSet::default();
    for output in graph.node_outputs(gamma).to_vec() {
        for user in graph.output_users(output) {
            if let InputOwner::Node { node, .. } = graph.input_owner(*user) {
                if graph.node_depth(node) == gamma_depth + 1
                    && graph.is_simple_node(node)
                    && seen.insert(node)
                {
                    workset.push(node);
                }
            }
        }
    }

    while let Some(node) = workset.pop() {
        if !graph.is_node_alive(node) {
            continue;
        }
        let nsubregions = graph.node_subregions(gamma).len();
        let noutputs = graph.node_outputs(node).len();
        let mut copies: Vec<SmallVec<[Output; 2]>> = vec![SmallVec::new(); noutputs];
        for index in 0..nsubregions {
            let subregion = graph.node_subregion(gamma, index);
            let mut operands: SmallVec<[Output; 4]> = SmallVec::new();
            for input in graph.node_inputs(node).to_vec() {
                let origin = graph.input_origin(input);
                if graph.producer(origin) == Some(gamma) {
                    // The operand comes out of the gamma itself: use the
                    // subregion's result origin directly.
                    let output_index = match graph.output_owner(origin) {
                        loomc_rvsdg::OutputOwner::Node { index, .. } => index,
                        owner => panic!("gamma output expected, found {owner:?}"),
                    };
                    let result = graph.region_result(subregion, output_index);
                    operands.push(graph.input_origin(result));
                } else {
                    let ev = graph.gamma_add_entryvar(gamma, origin);
                    operands.push(ev.arguments[index]);
                }
            }
            let copy = graph
                .copy_simple_node(node, subregion, &operands)
                .expect("pulled node keeps its signature");
            for (position, output) in graph.node_outputs(copy).to_vec().into_iter().enumerate() {
                copies[position].push(output);
            }
        }

        for position in 0..noutputs {
            let output = graph.node_output(node, position);
            for user in graph.output_users(output).to_vec() {
                if let InputOwner::Node { node: successor, .. } = graph.input_owner(user) {
                    if graph.node_depth(successor) == graph.node_depth(node) + 1
                        && graph.is_simple_node(successor)
                        && seen.insert(successor)
                    {
                        workset.push(successor);
                    }
                }
            }
            let xv = graph.gamma_add_exitvar(gamma, &copies[position]);
            graph.divert_users(output, xv.output);
        }
        graph.remove_node(node);
    }
}

/// In how many subregions is the value routed by `node`'s entry variables
/// actually used?
fn is_used_in_nsubregions(graph: &Graph, gamma: Node, node: Node) -> usize {
    let mut entry_indices: FxHashSet<usize> = FxHashSet::default();
    for output in graph.node_outputs(node) {
        for user in graph.output_users(*output) {
            if let InputOwner::Node { node: owner, index } = graph.input_owner(*user) {
                if owner == gamma {
                    entry_indices.insert(index);
                }
            }
        }
    }

    let mut used: FxHashSet<Region> = FxHashSet::default();
    for index in entry_indices {
        let ev = graph.gamma_entryvar(gamma, index);
        for argument in ev.arguments {
            if !graph.output_users(argument).is_empty() {
                used.insert(graph.output_region(argument));
            }
        }
    }
    used.len()
}

/// The selection heuristic: pull in producers used in exactly one
/// subregion, and leave empty two-subregion gammas for the select lowering.
pub fn pull_gamma(graph: &mut Graph, gamma: Node) {
    if graph.node_subregions(gamma).len() == 2 && is_empty(graph, gamma) {
        return;
    }

    let prednode = graph.producer(graph.input_origin(graph.gamma_predicate(gamma)));
    let mut index = 1;
    while index < graph.node_inputs(gamma).len() {
        let origin = graph.input_origin(graph.node_input(gamma, index));
        let node = match graph.producer(origin) {
            Some(node) if Some(node) != prednode && single_successor(graph, node) == Some(gamma) => {
                node
            }
            _ => {
                index += 1;
                continue;
            }
        };

        if is_used_in_nsubregions(graph, gamma, node) == 1 {
            // The copy lands in every subregion; the unused copies are
            // reclaimed by dead-node elimination.
            pullin_node(graph, gamma, node);
            cleanup(graph, gamma, node);
            index = 1;
        } else {
            index += 1;
        }
    }
}

fn pull_region(graph: &mut Graph, region: Region) {
    for node in topdown_order(graph, region) {
        if !graph.is_node_alive(node) {
            continue;
        }
        if let NodeKind::Structural(_) = graph.node_kind(node) {
            if graph.is_gamma(node) {
                pull_gamma(graph, node);
            }
            for subregion in graph.node_subregions(node).to_vec() {
                pull_region(graph, subregion);
            }
        }
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

    #[test]
    fn top_pull_moves_single_use_producers() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let producer = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, graph.node_output(producer, 0));
        // Make the gamma non-empty so the heuristic is allowed to fire.
        let consumer = graph
            .add_simple_node(
                graph.node_subregion(gamma, 0),
                add_op(),
                &[ev.arguments[0], ev.arguments[0]],
            )
            .unwrap();
        let xv = graph
            .gamma_add_exitvar(gamma, &[graph.node_output(consumer, 0), ev.arguments[1]]);
        graph.export(xv.output, "out");

        pullin_top(&mut graph, gamma);
        graph.assert_consistency();

        // The producer is gone from the root region and each subregion got
        // a copy.
        assert!(!graph.is_node_alive(producer));
        assert_eq!(graph.region_num_nodes(root), 1);
        assert_eq!(graph.region_num_nodes(graph.node_subregion(gamma, 0)), 2);
        assert_eq!(graph.region_num_nodes(graph.node_subregion(gamma, 1)), 1);
    }

    #[test]
    fn bottom_pull_absorbs_unique_successors() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, x);
        let xv = graph.gamma_add_exitvar(gamma, &[ev.arguments[0], ev.arguments[1]]);
        let successor = graph.add_simple_node(root, add_op(), &[xv.output, x]).unwrap();
        graph.export(graph.node_output(successor, 0), "out");

        pullin_bottom(&mut graph, gamma);
        graph.assert_consistency();

        assert!(!graph.is_node_alive(successor));
        // The export now reads a fresh exit variable of the gamma.
        let result = graph.region_result(root, 0);
        assert_eq!(graph.producer(graph.input_origin(result)), Some(gamma));
        assert_eq!(graph.region_num_nodes(graph.node_subregion(gamma, 0)), 1);
        assert_eq!(graph.region_num_nodes(graph.node_subregion(gamma, 1)), 1);
    }

    #[test]
    fn empty_two_subregion_gamma_is_left_alone() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let producer = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, graph.node_output(producer, 0));
        let xv = graph.gamma_add_exitvar(gamma, &[ev.arguments[0], ev.arguments[1]]);
        graph.export(xv.output, "out");

        pull_gamma(&mut graph, gamma);
        graph.assert_consistency();

        // The select-shaped gamma is untouched.
        assert!(graph.is_node_alive(producer));
        assert_eq!(graph.region_num_nodes(root), 2);
    }

    #[test]
    fn heuristic_skips_values_used_in_both_subregions() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let producer = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, graph.node_output(producer, 0));
        let use0 = graph
            .add_simple_node(
                graph.node_subregion(gamma, 0),
                add_op(),
                &[ev.arguments[0], ev.arguments[0]],
            )
            .unwrap();
        let use1 = graph
            .add_simple_node(
                graph.node_subregion(gamma, 1),
                add_op(),
                &[ev.arguments[1], ev.arguments[1]],
            )
            .unwrap();
        let xv = graph.gamma_add_exitvar(
            gamma,
            &[graph.node_output(use0, 0), graph.node_output(use1, 0)],
        );
        graph.export(xv.output, "out");

        pull_gamma(&mut graph, gamma);
        graph.assert_consistency();
        assert!(graph.is_node_alive(producer));
    }
}
