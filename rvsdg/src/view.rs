use std::fmt::Write;

use crate::{Graph, NodeKind, Region, StructuralKind};

/// Renders a region tree as indented text, one node per line; intended for
/// debugging and test failure output, not for stable serialization.
pub fn view(graph: &Graph) -> String {
    let mut out = String::new();
    view_region(graph, graph.root(), 0, &mut out);
    out
}

fn view_region(graph: &Graph, region: Region, indent: usize, out: &mut String) {
    let pad = "  ".repeat(indent);
    let arguments: Vec<String> = graph
        .region_arguments(region)
        .iter()
        .map(|argument| format!("{argument}"))
        .collect();
    let _ = writeln!(out, "{pad}region {region} [{}] {{", arguments.join(", "));
    for node in crate::traverser::topdown_order(graph, region) {
        let operands: Vec<String> = graph
            .node_inputs(node)
            .iter()
            .map(|input| format!("{}", graph.input_origin(*input)))
            .collect();
        let outputs: Vec<String> = graph
            .node_outputs(node)
            .iter()
            .map(|output| format!("{output}"))
            .collect();
        let name = match graph.node_kind(node) {
            NodeKind::Simple(op) => op.debug_name(),
            NodeKind::Structural(StructuralKind::Gamma) => "gamma".to_string(),
            NodeKind::Structural(StructuralKind::Theta) => "theta".to_string(),
            NodeKind::Structural(StructuralKind::Lambda(data)) => {
                format!("lambda {}", data.name)
            }
            NodeKind::Structural(StructuralKind::Phi { .. }) => "phi".to_string(),
            NodeKind::Structural(StructuralKind::Delta(data)) => format!("delta {}", data.name),
        };
        let _ = writeln!(
            out,
            "{pad}  [{}] = {name} [{}] @{}",
            outputs.join(", "),
            operands.join(", "),
            graph.node_depth(node)
        );
        for subregion in graph.node_subregions(node) {
            view_region(graph, *subregion, indent + 2, out);
        }
    }
    let results: Vec<String> = graph
        .region_results(region)
        .iter()
        .map(|result| format!("{}", graph.input_origin(*result)))
        .collect();
    let _ = writeln!(out, "{pad}}} -> [{}]", results.join(", "));
}
