use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::{
    graph::{EventQueue, GraphEvent},
    Graph, Node,
};

/// Tracks a user-defined state per node, with the nodes of each state held
/// in depth-sorted buckets.
///
/// Every node is implicitly in an *initial* pseudo-state until the first
/// [Tracker::set_node_state]; the initial state is reported as `None` and
/// has no buckets. The tracker subscribes to the graph's change events and
/// reorganizes its buckets as node depths change; destroyed nodes are
/// forgotten before their storage is reclaimed, so the tracker never holds
/// a dangling reference.
pub struct Tracker {
    queue: EventQueue,
    nodestates: FxHashMap<Node, usize>,
    depths: FxHashMap<Node, usize>,
    states: Vec<BTreeMap<usize, Vec<Node>>>,
}

impl Tracker {
    /// Registers a tracker with `nstates` states on the graph.
    ///
    /// The subscription lives as long as the tracker; dropping it
    /// deregisters on the graph's next broadcast.
    pub fn new(graph: &mut Graph, nstates: usize) -> Self {
        Self {
            queue: graph.subscribe(),
            nodestates: FxHashMap::default(),
            depths: FxHashMap::default(),
            states: vec![BTreeMap::new(); nstates],
        }
    }

    fn drain(&mut self, graph: &Graph) {
        let events: Vec<GraphEvent> = self.queue.borrow_mut().drain(..).collect();
        for event in events {
            match event {
                GraphEvent::NodeCreate(_) => {}
                GraphEvent::NodeDepthChange { node, old_depth } => {
                    if !graph.is_node_alive(node) {
                        continue;
                    }
                    if let Some(state) = self.nodestates.get(&node).copied() {
                        let cached = self.depths.get(&node).copied().unwrap_or(old_depth);
                        remove_from_bucket(&mut self.states[state], cached, node);
                        let depth = graph.node_depth(node);
                        self.states[state].entry(depth).or_default().push(node);
                        self.depths.insert(node, depth);
                    }
                }
                GraphEvent::NodeDestroy(node) => {
                    if let Some(state) = self.nodestates.remove(&node) {
                        if let Some(depth) = self.depths.remove(&node) {
                            remove_from_bucket(&mut self.states[state], depth, node);
                        }
                    }
                }
            }
        }
    }

    /// The state of `node`, or None while it is still in the initial state
    pub fn node_state(&mut self, graph: &Graph, node: Node) -> Option<usize> {
        self.drain(graph);
        self.nodestates.get(&node).copied()
    }

    pub fn set_node_state(&mut self, graph: &Graph, node: Node, state: usize) {
        assert!(state < self.states.len(), "state {state} out of range");
        self.drain(graph);
        if let Some(old_state) = self.nodestates.insert(node, state) {
            if let Some(depth) = self.depths.get(&node).copied() {
                remove_from_bucket(&mut self.states[old_state], depth, node);
            }
        }
        let depth = graph.node_depth(node);
        self.states[state].entry(depth).or_default().push(node);
        self.depths.insert(node, depth);
    }

    /// One of the minimum-depth nodes in `state`
    pub fn peek_top(&mut self, graph: &Graph, state: usize) -> Option<Node> {
        self.drain(graph);
        self.states[state]
            .iter()
            .find(|(_, nodes)| !nodes.is_empty())
            .and_then(|(_, nodes)| nodes.first().copied())
    }

    /// One of the maximum-depth nodes in `state`
    pub fn peek_bottom(&mut self, graph: &Graph, state: usize) -> Option<Node> {
        self.drain(graph);
        self.states[state]
            .iter()
            .rev()
            .find(|(_, nodes)| !nodes.is_empty())
            .and_then(|(_, nodes)| nodes.first().copied())
    }
}

fn remove_from_bucket(buckets: &mut BTreeMap<usize, Vec<Node>>, depth: usize, node: Node) {
    if let Some(bucket) = buckets.get_mut(&depth) {
        bucket.retain(|n| *n != node);
        if bucket.is_empty() {
            buckets.remove(&depth);
        }
    }
}
