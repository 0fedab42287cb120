//! Optimization passes over the RVSDG. Every pass consumes and produces a
//! whole module, takes unique access to the graph, and reports its work to
//! the session's statistics collector.

mod cne;
mod dne;
mod inline;
mod pull;
mod reduce;

use loomc_rvsdg::RvsdgModule;
use loomc_session::StatisticsCollector;

pub use self::{
    cne::CommonNodeElimination,
    dne::DeadNodeElimination,
    inline::FunctionInlining,
    pull::{pullin_bottom, pullin_top, GammaPullIn},
    reduce::NodeReduction,
};

/// A whole-module transformation
pub trait Transform {
    /// The name used by the driver's pass toggles and by statistics records
    fn name(&self) -> &'static str;

    fn run(&self, module: &mut RvsdgModule, collector: &mut StatisticsCollector);
}

/// Counts all node inputs in `region` and its subregions; a cheap proxy
/// for graph size used by pass statistics.
pub(crate) fn count_inputs(graph: &loomc_rvsdg::Graph, region: loomc_rvsdg::Region) -> u64 {
    let mut count = 0;
    for node in graph.region_nodes(region) {
        count += graph.node_inputs(node).len() as u64;
        for subregion in graph.node_subregions(node) {
            count += count_inputs(graph, *subregion);
        }
    }
    count
}

/// Counts all nodes in `region` and its subregions
pub(crate) fn count_nodes(graph: &loomc_rvsdg::Graph, region: loomc_rvsdg::Region) -> u64 {
    let mut count = 0;
    for node in graph.region_nodes(region) {
        count += 1;
        for subregion in graph.node_subregions(node) {
            count += count_nodes(graph, *subregion);
        }
    }
    count
}
