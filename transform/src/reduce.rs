//! Node reduction: drives the per-operation normal forms over the whole
//! graph to a fixed point, then expands the surviving flattened cascades
//! back into balanced binary trees for the backend. A tracker keyed by
//! depth makes the rewrite order deterministic and keeps the worklist
//! valid across removals and rewires.

use loomc_rvsdg::{
    binary::reduce_flattened_in_region, traverser::topdown_order, FlattenedReduction, Graph,
    InputOwner, Node, NodeKind, Region, RvsdgModule, Tracker,
};
use loomc_session::{Statistic, StatisticsCollector};

use crate::Transform;

const STATE_PENDING: usize = 0;
const STATE_DONE: usize = 1;

pub struct NodeReduction {
    expansion: FlattenedReduction,
}

impl Default for NodeReduction {
    fn default() -> Self {
        Self {
            expansion: FlattenedReduction::Parallel,
        }
    }
}

impl NodeReduction {
    pub fn with_expansion(expansion: FlattenedReduction) -> Self {
        Self { expansion }
    }
}

impl Transform for NodeReduction {
    fn name(&self) -> &'static str {
        "reduce"
    }

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector) {
        let mut statistic = Statistic::new("reduce", module.source_filename.clone());
        statistic
            .add_measurement("nodes-before", crate::count_nodes(&module.graph, module.graph.root()));
        statistic.start_timer("time");

        let graph = &mut module.graph;
        let root = graph.root();
        reduce_region(graph, root);
        reduce_flattened_in_region(graph, root, self.expansion);

        statistic.stop_timer("time");
        statistic
            .add_measurement("nodes-after", crate::count_nodes(&module.graph, module.graph.root()));
        collector.collect(statistic);
    }
}

fn reduce_region(graph: &mut Graph, region: Region) {
    let mut tracker = Tracker::new(graph, 2);
    let mut structural: Vec<Node> = Vec::new();
    for node in graph.region_nodes(region).collect::<Vec<_>>() {
        match graph.node_kind(node) {
            NodeKind::Simple(_) => tracker.set_node_state(graph, node, STATE_PENDING),
            NodeKind::Structural(_) => structural.push(node),
        }
    }

    // Producers first: normalizing a node can only enable reductions in its
    // consumers, which sit at greater depth and are revisited explicitly.
    while let Some(node) = tracker.peek_top(graph, STATE_PENDING) {
        let consumers: Vec<Node> = graph
            .node_outputs(node)
            .iter()
            .flat_map(|output| graph.output_users(*output))
            .filter_map(|user| match graph.input_owner(*user) {
                InputOwner::Node { node, .. } => Some(node),
                InputOwner::RegionResult { .. } => None,
            })
            .collect();

        if graph.normalize_node(node) {
            for consumer in consumers {
                if graph.is_node_alive(consumer) && graph.is_simple_node(consumer) {
                    tracker.set_node_state(graph, consumer, STATE_PENDING);
                }
            }
        } else {
            tracker.set_node_state(graph, node, STATE_DONE);
        }
    }
    drop(tracker);

    for node in structural {
        if !graph.is_node_alive(node) {
            continue;
        }
        for subregion in graph.node_subregions(node).to_vec() {
            reduce_region(graph, subregion);
        }
    }

    // Rewrites leave their obsolete producers behind; sweep whatever lost
    // its last user.
    let mut order = topdown_order(graph, region);
    order.reverse();
    for node in order {
        if graph.is_node_alive(node)
            && graph.is_simple_node(node)
            && graph.node_outputs(node).iter().all(|output| graph.output_users(*output).is_empty())
        {
            graph.remove_node(node);
        }
    }
}

#[cfg(test)]
mod tests {
    use loomc_rvsdg::types::Type;
    use loomc_rvsdg::{BitBinaryKind, BitValue, Operation, OperationClass};
    use loomc_session::StatisticsCollector;
    use pretty_assertions::assert_eq;

    use super::*;

    fn add_op() -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Add,
            width: 32,
        }
    }

    fn run_reduce(graph: Graph) -> Graph {
        let mut module = RvsdgModule::new("reduce.ll");
        module.graph = graph;
        let mut collector = StatisticsCollector::disabled();
        NodeReduction::default().run(&mut module, &mut collector);
        module.graph.assert_consistency();
        module.graph
    }

    #[test]
    fn constant_chains_fold_to_one_constant() {
        let mut graph = Graph::new();
        // Build without normalization, reduce afterwards.
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let root = graph.root();
        let c3 = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(32, 3)), &[])
            .unwrap();
        let c4 = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(32, 4)), &[])
            .unwrap();
        let sum = graph
            .add_simple_node(root, add_op(), &[graph.node_output(c3, 0), graph.node_output(c4, 0)])
            .unwrap();
        graph.export(graph.node_output(sum, 0), "sum");
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, true);

        let graph = run_reduce(graph);
        let root = graph.root();
        let export = graph.region_result(root, 0);
        let producer = graph.producer(graph.input_origin(export)).unwrap();
        assert_eq!(
            graph.node_operation(producer),
            &Operation::BitConstant(BitValue::new(32, 7))
        );
        assert_eq!(graph.region_num_nodes(root), 1);
    }

    #[test]
    fn folding_cascades_through_consumers() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let root = graph.root();
        let one = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(32, 1)), &[])
            .unwrap();
        let two = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(32, 2)), &[])
            .unwrap();
        // (1 + 2) + 3: folding the inner sum re-enables the outer one.
        let three = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(32, 3)), &[])
            .unwrap();
        let inner = graph
            .add_simple_node(root, add_op(), &[graph.node_output(one, 0), graph.node_output(two, 0)])
            .unwrap();
        let outer = graph
            .add_simple_node(
                root,
                add_op(),
                &[graph.node_output(inner, 0), graph.node_output(three, 0)],
            )
            .unwrap();
        graph.export(graph.node_output(outer, 0), "sum");
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, true);

        let graph = run_reduce(graph);
        let root = graph.root();
        let export = graph.region_result(root, 0);
        let producer = graph.producer(graph.input_origin(export)).unwrap();
        assert_eq!(
            graph.node_operation(producer),
            &Operation::BitConstant(BitValue::new(32, 6))
        );
    }

    #[test]
    fn flattened_nodes_expand_for_the_backend() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let w = graph.import(Type::Bits(32), "w");
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let z = graph.import(Type::Bits(32), "z");
        let root = graph.root();
        let flattened = graph
            .add_simple_node(
                root,
                Operation::FlattenedBinary {
                    kind: BitBinaryKind::Add,
                    width: 32,
                    narguments: 4,
                },
                &[w, x, y, z],
            )
            .unwrap();
        graph.export(graph.node_output(flattened, 0), "sum");
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, true);

        let graph = run_reduce(graph);
        // A balanced tree of three adds replaces the flattened node.
        let root = graph.root();
        assert_eq!(graph.region_num_nodes(root), 3);
        for node in graph.region_nodes(root) {
            assert_eq!(graph.node_operation(node), &add_op());
        }
    }
}
