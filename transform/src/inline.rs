//! Function inlining: replaces direct calls with a copy of the callee's
//! body. A call is direct when its callee operand traces back to a lambda
//! output, possibly through function/pointer conversions, context-variable
//! argument chains, and phi recursion variables. Calls through pointers
//! with any other producer are left alone.

use loomc_rvsdg::{
    Graph, Node, NodeKind, Operation, Output, OutputOwner, Region, RvsdgModule, StructuralKind,
    SubstitutionMap,
};
use loomc_session::{Statistic, StatisticsCollector};

use crate::Transform;

pub struct FunctionInlining;

impl Transform for FunctionInlining {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector) {
        let mut statistic = Statistic::new("inline", module.source_filename.clone());
        statistic.start_timer("time");

        let graph = &mut module.graph;
        let root = graph.root();
        let mut calls = Vec::new();
        collect_calls(graph, root, &mut calls);

        let mut inlined = 0;
        for call in calls {
            if !graph.is_node_alive(call) {
                continue;
            }
            let callee_origin = graph.input_origin(graph.node_input(call, 0));
            let Some(lambda) = trace_function_origin(graph, callee_origin) else {
                continue;
            };
            // Grafting a body into itself would duplicate the region being
            // walked; recursive calls stay calls.
            if graph.region_contains(graph.lambda_subregion(lambda), graph.node_region(call)) {
                continue;
            }
            inline_call(graph, call, lambda);
            inlined += 1;
        }

        statistic.stop_timer("time");
        statistic.add_measurement("inlined-calls", inlined);
        collector.collect(statistic);
    }
}

fn collect_calls(graph: &Graph, region: Region, calls: &mut Vec<Node>) {
    for node in graph.region_nodes(region) {
        match graph.node_kind(node) {
            NodeKind::Simple(Operation::Call(_)) => calls.push(node),
            NodeKind::Simple(_) => {}
            NodeKind::Structural(_) => {
                for subregion in graph.node_subregions(node) {
                    collect_calls(graph, *subregion, calls);
                }
            }
        }
    }
}

/// Follows an output back to the lambda that defines it, if any
fn trace_function_origin(graph: &Graph, mut output: Output) -> Option<Node> {
    loop {
        match graph.output_owner(output) {
            OutputOwner::Node { node, .. } => match graph.node_kind(node) {
                NodeKind::Structural(StructuralKind::Lambda(_)) => return Some(node),
                NodeKind::Simple(Operation::FunctionToPointer(_))
                | NodeKind::Simple(Operation::PointerToFunction(_)) => {
                    output = graph.input_origin(graph.node_input(node, 0));
                }
                NodeKind::Structural(StructuralKind::Phi { .. }) => {
                    // A phi output republishes the recursion variable's
                    // definition.
                    let index = match graph.output_owner(output) {
                        OutputOwner::Node { index, .. } => index,
                        _ => unreachable!(),
                    };
                    let result = graph.region_result(graph.phi_subregion(node), index);
                    output = graph.input_origin(result);
                }
                _ => return None,
            },
            OutputOwner::RegionArgument { region, index } => {
                let owner = graph.region_owner(region)?;
                match graph.node_kind(owner) {
                    NodeKind::Structural(StructuralKind::Lambda(data)) => {
                        if index < data.nctxvars {
                            output = graph.input_origin(graph.node_input(owner, index));
                        } else {
                            return None;
                        }
                    }
                    NodeKind::Structural(StructuralKind::Phi { nrecvars, .. }) => {
                        if index < *nrecvars {
                            // The recursion variable stands for the result
                            // at the same position.
                            let result = graph.region_result(region, index);
                            output = graph.input_origin(result);
                        } else {
                            let ctx = index - nrecvars;
                            output = graph.input_origin(graph.node_input(owner, ctx));
                        }
                    }
                    NodeKind::Structural(StructuralKind::Gamma) => {
                        output = graph.input_origin(graph.node_input(owner, index + 1));
                    }
                    NodeKind::Structural(StructuralKind::Theta) => {
                        output = graph.input_origin(graph.node_input(owner, index));
                    }
                    NodeKind::Structural(StructuralKind::Delta(_)) => {
                        output = graph.input_origin(graph.node_input(owner, index));
                    }
                    NodeKind::Simple(_) => return None,
                }
            }
        }
    }
}

/// Grafts `lambda`'s body at the call site: arguments are substituted by
/// the call's operands, context variables by their outer origins, and the
/// call's outputs are diverted to the grafted results.
fn inline_call(graph: &mut Graph, call: Node, lambda: Node) {
    let caller_region = graph.node_region(call);
    let body = graph.lambda_subregion(lambda);
    let nctxvars = graph.lambda_data(lambda).nctxvars;

    let mut subst = SubstitutionMap::default();
    for index in 0..nctxvars {
        let argument = graph.region_argument(body, index);
        let origin = graph.input_origin(graph.node_input(lambda, index));
        subst.insert(argument, origin);
    }
    let num_arguments = graph.region_arguments(body).len() - nctxvars;
    for index in 0..num_arguments {
        let argument = graph.region_argument(body, nctxvars + index);
        let operand = graph.input_origin(graph.node_input(call, index + 1));
        subst.insert(argument, operand);
    }

    graph
        .copy_region_contents(body, caller_region, &mut subst)
        .expect("callee body is well typed");

    for (index, result) in graph.region_results(body).to_vec().into_iter().enumerate() {
        let replacement = subst.lookup(graph.input_origin(result));
        let output = graph.node_output(call, index);
        graph.divert_users(output, replacement);
    }
    graph.remove_node(call);

    log::debug!(target: "pass:inline", "inlined call to `{}`", graph.lambda_data(lambda).name);
}
