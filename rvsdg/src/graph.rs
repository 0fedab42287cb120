use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use cranelift_entity::{entity_impl, PrimaryMap};
use loomc_rvsdg_type::Type;
use smallvec::SmallVec;

use crate::{normal_form::NormalFormRegistry, structural::StructuralKind, Operation};

/// A node within a region; simple or structural
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "node");

/// An ordered node container with arguments and results
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(u32);
entity_impl!(Region, "region");

/// A consumer port: a node input or a region result
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Input(u32);
entity_impl!(Input, "in");

/// A producer port: a node output or a region argument
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Output(u32);
entity_impl!(Output, "out");

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OutputOwner {
    Node { node: Node, index: usize },
    RegionArgument { region: Region, index: usize },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum InputOwner {
    Node { node: Node, index: usize },
    RegionResult { region: Region, index: usize },
}

#[derive(Debug)]
pub enum NodeKind {
    Simple(Operation),
    Structural(StructuralKind),
}

#[derive(Debug)]
pub(crate) struct NodeData {
    pub region: Region,
    pub kind: NodeKind,
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub subregions: Vec<Region>,
    pub depth: usize,
}

#[derive(Debug)]
pub(crate) struct RegionData {
    pub owner: Option<Node>,
    pub index: usize,
    pub nodes: Vec<Node>,
    pub arguments: Vec<Output>,
    pub results: Vec<Input>,
}

#[derive(Debug)]
pub(crate) struct OutputData {
    pub ty: Type,
    pub owner: OutputOwner,
    pub users: Vec<Input>,
    pub name: Option<String>,
}

#[derive(Debug)]
pub(crate) struct InputData {
    pub ty: Type,
    pub origin: Output,
    pub owner: InputOwner,
    pub name: Option<String>,
}

/// A change notification broadcast to registered observers.
///
/// `NodeDestroy` is delivered before the node's storage is reclaimed, so an
/// observer may still look the node up when draining its queue only if it
/// does so before further mutation; trackers simply drop their references.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum GraphEvent {
    NodeCreate(Node),
    NodeDepthChange { node: Node, old_depth: usize },
    NodeDestroy(Node),
}

pub(crate) type EventQueue = Rc<RefCell<VecDeque<GraphEvent>>>;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("operation `{operation}` expects {expected} operands, got {actual}")]
    OperandCountMismatch {
        operation: String,
        expected: usize,
        actual: usize,
    },
    #[error("operand {index} of `{operation}` has type {actual}, expected {expected}")]
    OperandTypeMismatch {
        operation: String,
        index: usize,
        expected: Type,
        actual: Type,
    },
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: Type, actual: Type },
    #[error("origin is not visible from the target region")]
    RegionLocalityViolation,
}

/// The graph: owner of every region, node, and port.
///
/// All storage is arena-allocated with stable ids; removal tombstones the
/// slot, so ids are never reused within one graph. All cross references
/// (origins, user sets, subregion lists) are ids resolved on demand.
#[derive(Debug)]
pub struct Graph {
    regions: PrimaryMap<Region, Option<RegionData>>,
    nodes: PrimaryMap<Node, Option<NodeData>>,
    inputs: PrimaryMap<Input, Option<InputData>>,
    outputs: PrimaryMap<Output, Option<OutputData>>,
    root: Region,
    normal_forms: NormalFormRegistry,
    sinks: Vec<Weak<RefCell<VecDeque<GraphEvent>>>>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        let mut regions = PrimaryMap::new();
        let root = regions.push(Some(RegionData {
            owner: None,
            index: 0,
            nodes: Vec::new(),
            arguments: Vec::new(),
            results: Vec::new(),
        }));
        Self {
            regions,
            nodes: PrimaryMap::new(),
            inputs: PrimaryMap::new(),
            outputs: PrimaryMap::new(),
            root,
            normal_forms: NormalFormRegistry::default(),
            sinks: Vec::new(),
        }
    }

    #[inline]
    pub fn root(&self) -> Region {
        self.root
    }

    #[inline]
    pub fn normal_forms(&self) -> &NormalFormRegistry {
        &self.normal_forms
    }

    #[inline]
    pub fn normal_forms_mut(&mut self) -> &mut NormalFormRegistry {
        &mut self.normal_forms
    }

    // --- entity access -----------------------------------------------------

    pub(crate) fn region_data(&self, region: Region) -> &RegionData {
        self.regions[region].as_ref().expect("region was removed")
    }

    pub(crate) fn region_data_mut(&mut self, region: Region) -> &mut RegionData {
        self.regions[region].as_mut().expect("region was removed")
    }

    pub(crate) fn node_data(&self, node: Node) -> &NodeData {
        self.nodes[node].as_ref().expect("node was removed")
    }

    pub(crate) fn node_data_mut(&mut self, node: Node) -> &mut NodeData {
        self.nodes[node].as_mut().expect("node was removed")
    }

    pub(crate) fn input_data(&self, input: Input) -> &InputData {
        self.inputs[input].as_ref().expect("input was removed")
    }

    pub(crate) fn input_data_mut(&mut self, input: Input) -> &mut InputData {
        self.inputs[input].as_mut().expect("input was removed")
    }

    pub(crate) fn output_data(&self, output: Output) -> &OutputData {
        self.outputs[output].as_ref().expect("output was removed")
    }

    pub(crate) fn output_data_mut(&mut self, output: Output) -> &mut OutputData {
        self.outputs[output].as_mut().expect("output was removed")
    }

    #[inline]
    pub fn is_node_alive(&self, node: Node) -> bool {
        self.nodes.get(node).is_some_and(|slot| slot.is_some())
    }

    // --- node and port queries ---------------------------------------------

    pub fn node_kind(&self, node: Node) -> &NodeKind {
        &self.node_data(node).kind
    }

    /// The operation of a simple node; panics for structural nodes
    pub fn node_operation(&self, node: Node) -> &Operation {
        match &self.node_data(node).kind {
            NodeKind::Simple(op) => op,
            NodeKind::Structural(_) => panic!("structural node has no operation"),
        }
    }

    pub fn is_simple_node(&self, node: Node) -> bool {
        matches!(self.node_data(node).kind, NodeKind::Simple(_))
    }

    pub fn node_region(&self, node: Node) -> Region {
        self.node_data(node).region
    }

    pub fn node_depth(&self, node: Node) -> usize {
        self.node_data(node).depth
    }

    pub fn node_inputs(&self, node: Node) -> &[Input] {
        &self.node_data(node).inputs
    }

    pub fn node_outputs(&self, node: Node) -> &[Output] {
        &self.node_data(node).outputs
    }

    pub fn node_input(&self, node: Node, index: usize) -> Input {
        self.node_data(node).inputs[index]
    }

    pub fn node_output(&self, node: Node, index: usize) -> Output {
        self.node_data(node).outputs[index]
    }

    pub fn node_subregions(&self, node: Node) -> &[Region] {
        &self.node_data(node).subregions
    }

    pub fn node_subregion(&self, node: Node, index: usize) -> Region {
        self.node_data(node).subregions[index]
    }

    pub fn input_origin(&self, input: Input) -> Output {
        self.input_data(input).origin
    }

    pub fn input_type(&self, input: Input) -> &Type {
        &self.input_data(input).ty
    }

    pub fn input_owner(&self, input: Input) -> InputOwner {
        self.input_data(input).owner
    }

    pub fn output_type(&self, output: Output) -> &Type {
        &self.output_data(output).ty
    }

    pub fn output_owner(&self, output: Output) -> OutputOwner {
        self.output_data(output).owner
    }

    pub fn output_users(&self, output: Output) -> &[Input] {
        &self.output_data(output).users
    }

    pub fn output_name(&self, output: Output) -> Option<&str> {
        self.output_data(output).name.as_deref()
    }

    /// The node producing `output`, if it is a node output
    pub fn producer(&self, output: Output) -> Option<Node> {
        match self.output_data(output).owner {
            OutputOwner::Node { node, .. } => Some(node),
            OutputOwner::RegionArgument { .. } => None,
        }
    }

    /// The region an output lives in: its owning node's region, or the
    /// region it is an argument of.
    pub fn output_region(&self, output: Output) -> Region {
        match self.output_data(output).owner {
            OutputOwner::Node { node, .. } => self.node_region(node),
            OutputOwner::RegionArgument { region, .. } => region,
        }
    }

    /// The region an input lives in
    pub fn input_region(&self, input: Input) -> Region {
        match self.input_data(input).owner {
            InputOwner::Node { node, .. } => self.node_region(node),
            InputOwner::RegionResult { region, .. } => region,
        }
    }

    pub fn region_nodes(&self, region: Region) -> impl Iterator<Item = Node> + '_ {
        self.region_data(region).nodes.iter().copied()
    }

    pub fn region_num_nodes(&self, region: Region) -> usize {
        self.region_data(region).nodes.len()
    }

    pub fn region_arguments(&self, region: Region) -> &[Output] {
        &self.region_data(region).arguments
    }

    pub fn region_argument(&self, region: Region, index: usize) -> Output {
        self.region_data(region).arguments[index]
    }

    pub fn region_results(&self, region: Region) -> &[Input] {
        &self.region_data(region).results
    }

    pub fn region_result(&self, region: Region, index: usize) -> Input {
        self.region_data(region).results[index]
    }

    /// The structural node owning `region`, or None for the root region
    pub fn region_owner(&self, region: Region) -> Option<Node> {
        self.region_data(region).owner
    }

    /// The position of `region` in its owner's subregion list
    pub fn region_index(&self, region: Region) -> usize {
        self.region_data(region).index
    }

    pub fn input_name(&self, input: Input) -> Option<&str> {
        self.input_data(input).name.as_deref()
    }

    /// True if `ancestor` is `region` or transitively encloses it
    pub fn region_contains(&self, ancestor: Region, region: Region) -> bool {
        let mut current = Some(region);
        while let Some(r) = current {
            if r == ancestor {
                return true;
            }
            current = self.region_owner(r).map(|owner| self.node_region(owner));
        }
        false
    }

    // --- events ------------------------------------------------------------

    /// Registers an observer queue; events are delivered to every live queue.
    ///
    /// The subscription lasts as long as the returned queue handle; dropped
    /// observers are pruned on the next broadcast.
    pub(crate) fn subscribe(&mut self) -> EventQueue {
        let queue: EventQueue = Rc::new(RefCell::new(VecDeque::new()));
        self.sinks.push(Rc::downgrade(&queue));
        queue
    }

    pub(crate) fn notify(&mut self, event: GraphEvent) {
        self.sinks.retain(|sink| {
            if let Some(queue) = sink.upgrade() {
                queue.borrow_mut().push_back(event);
                true
            } else {
                false
            }
        });
    }

    // --- construction ------------------------------------------------------

    /// Exposes an external value of the given type to the root region
    pub fn import(&mut self, ty: Type, name: impl Into<String>) -> Output {
        let root = self.root;
        let output = self.new_region_argument(root, ty);
        self.output_data_mut(output).name = Some(name.into());
        output
    }

    /// Exports `origin` from the root region under the given name
    pub fn export(&mut self, origin: Output, name: impl Into<String>) -> Input {
        let root = self.root;
        let input = self.new_region_result(root, origin);
        self.input_data_mut(input).name = Some(name.into());
        input
    }

    pub(crate) fn new_region(&mut self, owner: Node, index: usize) -> Region {
        self.regions.push(Some(RegionData {
            owner: Some(owner),
            index,
            nodes: Vec::new(),
            arguments: Vec::new(),
            results: Vec::new(),
        }))
    }

    pub(crate) fn new_region_argument(&mut self, region: Region, ty: Type) -> Output {
        let index = self.region_data(region).arguments.len();
        let output = self.outputs.push(Some(OutputData {
            ty,
            owner: OutputOwner::RegionArgument { region, index },
            users: Vec::new(),
            name: None,
        }));
        self.region_data_mut(region).arguments.push(output);
        output
    }

    pub(crate) fn new_region_result(&mut self, region: Region, origin: Output) -> Input {
        let ty = self.output_type(origin).clone();
        debug_assert!(
            self.region_contains(self.output_region(origin), region),
            "result origin must be in the region or an enclosing one"
        );
        let index = self.region_data(region).results.len();
        let input = self.inputs.push(Some(InputData {
            ty,
            origin,
            owner: InputOwner::RegionResult { region, index },
            name: None,
        }));
        self.output_data_mut(origin).users.push(input);
        self.region_data_mut(region).results.push(input);
        input
    }

    pub(crate) fn new_node_input(&mut self, node: Node, origin: Output, ty: Type) -> Input {
        let index = self.node_data(node).inputs.len();
        let input = self.inputs.push(Some(InputData {
            ty,
            origin,
            owner: InputOwner::Node { node, index },
            name: None,
        }));
        self.output_data_mut(origin).users.push(input);
        self.node_data_mut(node).inputs.push(input);
        input
    }

    pub(crate) fn new_node_output(&mut self, node: Node, ty: Type) -> Output {
        let index = self.node_data(node).outputs.len();
        let output = self.outputs.push(Some(OutputData {
            ty,
            owner: OutputOwner::Node { node, index },
            users: Vec::new(),
            name: None,
        }));
        self.node_data_mut(node).outputs.push(output);
        output
    }

    pub(crate) fn new_node(&mut self, region: Region, kind: NodeKind) -> Node {
        let node = self.nodes.push(Some(NodeData {
            region,
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            subregions: Vec::new(),
            depth: 0,
        }));
        self.region_data_mut(region).nodes.push(node);
        self.notify(GraphEvent::NodeCreate(node));
        node
    }

    /// Builds a simple node for `op` over `operands` in `region`.
    ///
    /// Fails if the operand count or types mismatch the operation signature,
    /// or if any operand is not visible from `region`.
    pub fn add_simple_node(
        &mut self,
        region: Region,
        op: Operation,
        operands: &[Output],
    ) -> Result<Node, GraphError> {
        let argument_types = op.argument_types();
        if argument_types.len() != operands.len() {
            return Err(GraphError::OperandCountMismatch {
                operation: op.debug_name(),
                expected: argument_types.len(),
                actual: operands.len(),
            });
        }
        for (index, (operand, expected)) in operands.iter().zip(argument_types.iter()).enumerate() {
            let actual = self.output_type(*operand);
            if actual != expected {
                return Err(GraphError::OperandTypeMismatch {
                    operation: op.debug_name(),
                    index,
                    expected: expected.clone(),
                    actual: actual.clone(),
                });
            }
            if !self.region_contains(self.output_region(*operand), region) {
                return Err(GraphError::RegionLocalityViolation);
            }
        }

        let result_types = op.result_types();
        let node = self.new_node(region, NodeKind::Simple(op));
        for (operand, ty) in operands.iter().zip(argument_types) {
            self.new_node_input(node, *operand, ty);
        }
        for ty in result_types {
            self.new_node_output(node, ty);
        }
        self.recompute_depth(node);
        Ok(node)
    }

    // --- mutation ----------------------------------------------------------

    /// The single origin-rewiring primitive: detaches `input` from its
    /// current origin, attaches it to `new_origin`, and maintains both user
    /// sets and the depth of the consuming node.
    pub fn divert_input_origin(&mut self, input: Input, new_origin: Output) {
        let old_origin = self.input_origin(input);
        if old_origin == new_origin {
            return;
        }
        assert_eq!(
            self.input_type(input),
            self.output_type(new_origin),
            "divert changes the type of the edge"
        );
        assert!(
            self.region_contains(self.output_region(new_origin), self.input_region(input)),
            "divert breaks region locality"
        );
        self.output_data_mut(old_origin).users.retain(|user| *user != input);
        self.output_data_mut(new_origin).users.push(input);
        self.input_data_mut(input).origin = new_origin;
        if let InputOwner::Node { node, .. } = self.input_owner(input) {
            self.recompute_depth(node);
        }
    }

    /// Atomically retargets every user of `output` to `new_origin`
    pub fn divert_users(&mut self, output: Output, new_origin: Output) {
        if output == new_origin {
            return;
        }
        let users: SmallVec<[Input; 8]> = self.output_data(output).users.iter().copied().collect();
        for user in users {
            self.divert_input_origin(user, new_origin);
        }
    }

    /// Removes a node; all of its outputs must be user-free.
    ///
    /// Observers receive the destroy notification before storage is
    /// reclaimed.
    pub fn remove_node(&mut self, node: Node) {
        for output in self.node_outputs(node).to_vec() {
            assert!(
                self.output_users(output).is_empty(),
                "cannot remove a node whose outputs still have users"
            );
        }
        self.notify(GraphEvent::NodeDestroy(node));

        let data = self.nodes[node].take().expect("node was removed");
        for input in &data.inputs {
            let origin = self.input_data(*input).origin;
            self.output_data_mut(origin).users.retain(|user| user != input);
            self.inputs[*input] = None;
        }
        for output in &data.outputs {
            self.outputs[*output] = None;
        }
        for subregion in &data.subregions {
            self.remove_region(*subregion);
        }
        self.region_data_mut(data.region).nodes.retain(|n| *n != node);
    }

    /// Drops a region and everything in it, nodes in reverse creation order
    /// so no origin is reclaimed before its users.
    fn remove_region(&mut self, region: Region) {
        let data = self.regions[region].take().expect("region was removed");
        for result in &data.results {
            let origin = self.input_data(*result).origin;
            self.output_data_mut(origin).users.retain(|user| user != result);
            self.inputs[*result] = None;
        }
        for node in data.nodes.iter().rev() {
            // Region results are already gone; remaining users must be
            // inside this region and are reclaimed along with it. Creation
            // order is not topological after diverts, so an input's origin
            // may already be tombstoned here.
            let node_data = self.nodes[*node].take().expect("node was removed");
            self.notify(GraphEvent::NodeDestroy(*node));
            for input in &node_data.inputs {
                let origin = self.input_data(*input).origin;
                if let Some(origin_data) = self.outputs[origin].as_mut() {
                    origin_data.users.retain(|user| user != input);
                }
                self.inputs[*input] = None;
            }
            for output in &node_data.outputs {
                self.outputs[*output] = None;
            }
            for subregion in &node_data.subregions {
                self.remove_region(*subregion);
            }
        }
        for argument in &data.arguments {
            self.outputs[*argument] = None;
        }
    }

    /// Removes the node input at `index`, renumbering the inputs after it.
    /// The caller is responsible for having diverted whatever made the input
    /// necessary.
    pub fn remove_node_input(&mut self, node: Node, index: usize) {
        let input = self.node_data(node).inputs[index];
        let origin = self.input_data(input).origin;
        self.output_data_mut(origin).users.retain(|user| *user != input);
        self.inputs[input] = None;
        let inputs = &mut self.node_data_mut(node).inputs;
        inputs.remove(index);
        let renumber: Vec<Input> = inputs[index..].to_vec();
        for (offset, input) in renumber.into_iter().enumerate() {
            if let InputOwner::Node { index: ref mut i, .. } =
                self.input_data_mut(input).owner
            {
                *i = index + offset;
            }
        }
        self.recompute_depth(node);
    }

    /// Removes the node output at `index`; it must be user-free
    pub fn remove_node_output(&mut self, node: Node, index: usize) {
        let output = self.node_data(node).outputs[index];
        assert!(self.output_users(output).is_empty(), "output still has users");
        self.outputs[output] = None;
        let outputs = &mut self.node_data_mut(node).outputs;
        outputs.remove(index);
        let renumber: Vec<Output> = outputs[index..].to_vec();
        for (offset, output) in renumber.into_iter().enumerate() {
            if let OutputOwner::Node { index: ref mut i, .. } =
                self.output_data_mut(output).owner
            {
                *i = index + offset;
            }
        }
    }

    /// Removes the region argument at `index`; it must be user-free
    pub fn remove_region_argument(&mut self, region: Region, index: usize) {
        let argument = self.region_data(region).arguments[index];
        assert!(self.output_users(argument).is_empty(), "argument still has users");
        self.outputs[argument] = None;
        let arguments = &mut self.region_data_mut(region).arguments;
        arguments.remove(index);
        let renumber: Vec<Output> = arguments[index..].to_vec();
        for (offset, argument) in renumber.into_iter().enumerate() {
            if let OutputOwner::RegionArgument { index: ref mut i, .. } =
                self.output_data_mut(argument).owner
            {
                *i = index + offset;
            }
        }
    }

    /// Removes the region result at `index`, renumbering those after it
    pub fn remove_region_result(&mut self, region: Region, index: usize) {
        let result = self.region_data(region).results[index];
        let origin = self.input_data(result).origin;
        self.output_data_mut(origin).users.retain(|user| *user != result);
        self.inputs[result] = None;
        let results = &mut self.region_data_mut(region).results;
        results.remove(index);
        let renumber: Vec<Input> = results[index..].to_vec();
        for (offset, result) in renumber.into_iter().enumerate() {
            if let InputOwner::RegionResult { index: ref mut i, .. } =
                self.input_data_mut(result).owner
            {
                *i = index + offset;
            }
        }
    }

    // --- depth tracking ----------------------------------------------------

    fn compute_depth(&self, node: Node) -> usize {
        let region = self.node_region(node);
        let mut depth = 0;
        for input in self.node_inputs(node) {
            let origin = self.input_origin(*input);
            if let Some(producer) = self.producer(origin) {
                if self.node_region(producer) == region {
                    depth = depth.max(self.node_depth(producer) + 1);
                }
            }
        }
        depth
    }

    /// Recomputes `node`'s depth and propagates along user chains; observers
    /// are notified for every node whose depth actually changed.
    pub(crate) fn recompute_depth(&mut self, node: Node) {
        let mut worklist = VecDeque::from([node]);
        while let Some(node) = worklist.pop_front() {
            let new_depth = self.compute_depth(node);
            let old_depth = self.node_depth(node);
            if new_depth == old_depth {
                continue;
            }
            self.node_data_mut(node).depth = new_depth;
            self.notify(GraphEvent::NodeDepthChange { node, old_depth });
            let region = self.node_region(node);
            for output in self.node_outputs(node).to_vec() {
                for user in self.output_users(output).to_vec() {
                    if let InputOwner::Node { node: user_node, .. } = self.input_owner(user) {
                        if self.node_region(user_node) == region {
                            worklist.push_back(user_node);
                        }
                    }
                }
            }
        }
    }

    // --- consistency -------------------------------------------------------

    /// Checks every structural invariant; panics with context on violation.
    ///
    /// Intended for tests and debug builds; the cost is linear in the size
    /// of the graph.
    pub fn assert_consistency(&self) {
        self.assert_region_consistency(self.root);
    }

    fn assert_region_consistency(&self, region: Region) {
        let data = self.region_data(region);
        for (index, argument) in data.arguments.iter().enumerate() {
            assert_eq!(
                self.output_owner(*argument),
                OutputOwner::RegionArgument { region, index },
                "argument owner mismatch in {region}"
            );
            self.assert_output_consistency(*argument);
        }
        for (index, result) in data.results.iter().enumerate() {
            assert_eq!(
                self.input_owner(*result),
                InputOwner::RegionResult { region, index },
                "result owner mismatch in {region}"
            );
            self.assert_input_consistency(*result, region);
        }
        for node in &data.nodes {
            let node_data = self.node_data(*node);
            assert_eq!(node_data.region, region, "node {node} region mismatch");
            for (index, input) in node_data.inputs.iter().enumerate() {
                assert_eq!(
                    self.input_owner(*input),
                    InputOwner::Node { node: *node, index },
                    "input owner mismatch on {node}"
                );
                self.assert_input_consistency(*input, region);
            }
            for (index, output) in node_data.outputs.iter().enumerate() {
                assert_eq!(
                    self.output_owner(*output),
                    OutputOwner::Node { node: *node, index },
                    "output owner mismatch on {node}"
                );
                self.assert_output_consistency(*output);
            }
            assert_eq!(
                node_data.depth,
                self.compute_depth(*node),
                "depth invariant violated on {node}"
            );
            for subregion in &node_data.subregions {
                assert_eq!(
                    self.region_owner(*subregion),
                    Some(*node),
                    "subregion owner mismatch on {node}"
                );
                self.assert_region_consistency(*subregion);
            }
        }
    }

    fn assert_input_consistency(&self, input: Input, region: Region) {
        let origin = self.input_origin(input);
        assert!(
            self.output_users(origin).contains(&input),
            "user set of {origin} does not contain {input}"
        );
        assert_eq!(
            self.input_type(input),
            self.output_type(origin),
            "edge type mismatch on {input}"
        );
        assert!(
            self.region_contains(self.output_region(origin), region),
            "origin of {input} is not in the same or an enclosing region"
        );
    }

    fn assert_output_consistency(&self, output: Output) {
        for user in self.output_users(output) {
            assert_eq!(
                self.input_origin(*user),
                output,
                "input {user} is in the user set of {output} but originates elsewhere"
            );
        }
    }
}
