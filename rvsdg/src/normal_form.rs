use bitflags::bitflags;
use smallvec::SmallVec;

use crate::{
    binary::{can_reduce_operand_pair, reduce_operand_pair, try_unary_reduction},
    Graph, GraphError, Node, NodeKind, Operation, Output, Region,
};

bitflags! {
    /// Which normalizing rewrites are enabled for an operation class
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct NormalFormFlags: u8 {
        /// Master switch: when unset, no rewrite of any kind fires
        const MUTABLE = 1 << 0;
        /// Reuse an existing equivalent node instead of creating a new one
        const CSE = 1 << 1;
        /// Apply pairwise and unary reductions
        const REDUCIBLE = 1 << 2;
        /// Sort the operands of commutative operations by output identity
        const REORDER = 1 << 3;
        /// Fold cascades of the same associative operation into one node
        const FLATTEN = 1 << 4;
        const DISTRIBUTE = 1 << 5;
        const FACTORIZE = 1 << 6;
    }
}

/// The operation classes a normal form can be attached to.
///
/// Classes form a hierarchy: `Simple` is the parent of `Binary`, which is
/// the parent of `FlattenedBinary`. Flag changes cascade from a class to
/// its descendants, mirroring how per-class normal forms inherit their
/// parent's configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum OperationClass {
    Simple,
    Binary,
    FlattenedBinary,
}

impl OperationClass {
    fn index(&self) -> usize {
        match self {
            Self::Simple => 0,
            Self::Binary => 1,
            Self::FlattenedBinary => 2,
        }
    }

    fn descendants(&self) -> &'static [OperationClass] {
        match self {
            Self::Simple => &[Self::Simple, Self::Binary, Self::FlattenedBinary],
            Self::Binary => &[Self::Binary, Self::FlattenedBinary],
            Self::FlattenedBinary => &[Self::FlattenedBinary],
        }
    }

    pub fn of(op: &Operation) -> Self {
        match op {
            Operation::BitBinary { .. } | Operation::BitCompare { .. } => Self::Binary,
            Operation::FlattenedBinary { .. } => Self::FlattenedBinary,
            _ => Self::Simple,
        }
    }
}

/// Per-class normal-form configuration for one graph
#[derive(Debug)]
pub struct NormalFormRegistry {
    flags: [NormalFormFlags; 3],
}

impl Default for NormalFormRegistry {
    fn default() -> Self {
        let default = NormalFormFlags::MUTABLE
            | NormalFormFlags::CSE
            | NormalFormFlags::REDUCIBLE
            | NormalFormFlags::REORDER
            | NormalFormFlags::FLATTEN;
        Self {
            flags: [default; 3],
        }
    }
}

impl NormalFormRegistry {
    pub fn flags(&self, class: OperationClass) -> NormalFormFlags {
        self.flags[class.index()]
    }

    /// Sets or clears `flag` on `class` and all of its descendants
    pub fn set(&mut self, class: OperationClass, flag: NormalFormFlags, enable: bool) {
        for descendant in class.descendants() {
            self.flags[descendant.index()].set(flag, enable);
        }
    }

    pub fn set_mutable(&mut self, class: OperationClass, enable: bool) {
        self.set(class, NormalFormFlags::MUTABLE, enable);
    }

    fn enabled(&self, class: OperationClass, flag: NormalFormFlags) -> bool {
        let flags = self.flags(class);
        flags.contains(NormalFormFlags::MUTABLE) && flags.contains(flag)
    }
}

impl Graph {
    /// Builds a simple node like [Graph::add_simple_node], but applies the
    /// enabled normalizing rewrites first; the returned outputs may belong
    /// to an existing node, a reduced replacement, or a flattened node
    /// rather than a node freshly built for `op`.
    pub fn add_simple_node_normalized(
        &mut self,
        region: Region,
        op: Operation,
        operands: &[Output],
    ) -> Result<SmallVec<[Output; 2]>, GraphError> {
        let class = OperationClass::of(&op);
        if !self.normal_forms().flags(class).contains(NormalFormFlags::MUTABLE) {
            let node = self.add_simple_node(region, op, operands)?;
            return Ok(self.node_outputs(node).iter().copied().collect());
        }

        let mut op = op;
        let mut operands: SmallVec<[Output; 4]> = operands.iter().copied().collect();

        // Pairwise reductions over the operand list.
        if self.normal_forms().enabled(class, NormalFormFlags::REDUCIBLE)
            && op.binary_flags().is_some()
        {
            let before = operands.len();
            reduce_operands(self, region, &op, &mut operands);
            if operands.len() == 1 {
                return Ok(SmallVec::from_slice(&operands));
            }
            if operands.len() != before {
                op = nary_operation(&op, operands.len());
            }
        }

        // Fold a cascade of the same associative operation into one node.
        if self.normal_forms().enabled(class, NormalFormFlags::FLATTEN) && op.is_associative() {
            if let Some(flattened) = flatten_cascade(self, region, &op, &operands)? {
                return Ok(flattened);
            }
        }

        if self.normal_forms().enabled(class, NormalFormFlags::REORDER) && op.is_commutative() {
            operands.sort_unstable();
        }

        // Reuse an equivalent node already present in the region.
        if self.normal_forms().enabled(class, NormalFormFlags::CSE) {
            if let Some(existing) = find_congruent_node(self, region, &op, &operands) {
                return Ok(self.node_outputs(existing).iter().copied().collect());
            }
        }

        let node = self.add_simple_node(region, op, &operands)?;
        if self.normal_forms().enabled(class, NormalFormFlags::REDUCIBLE) {
            if let Some(replacement) = try_unary_reduction(self, node) {
                let output = self.node_output(node, 0);
                self.divert_users(output, replacement);
                self.remove_node(node);
                return Ok(SmallVec::from_slice(&[replacement]));
            }
        }
        Ok(self.node_outputs(node).iter().copied().collect())
    }

    /// Re-normalizes an existing node in place: applies the enabled
    /// reductions and flattening, diverting the node's users to the
    /// replacement and removing the node when a rewrite fires.
    ///
    /// Returns true if the graph changed.
    pub fn normalize_node(&mut self, node: Node) -> bool {
        let op = match self.node_kind(node) {
            NodeKind::Simple(op) => op.clone(),
            NodeKind::Structural(_) => return false,
        };
        let class = OperationClass::of(&op);
        if !self.normal_forms().flags(class).contains(NormalFormFlags::MUTABLE) {
            return false;
        }
        let region = self.node_region(node);
        let mut operands: SmallVec<[Output; 4]> = self
            .node_inputs(node)
            .iter()
            .map(|input| self.input_origin(*input))
            .collect();

        if self.normal_forms().enabled(class, NormalFormFlags::REDUCIBLE) {
            if let Some(replacement) = try_unary_reduction(self, node) {
                let output = self.node_output(node, 0);
                self.divert_users(output, replacement);
                self.remove_node(node);
                return true;
            }
            if op.binary_flags().is_some() {
                let before = operands.len();
                reduce_operands(self, region, &op, &mut operands);
                if operands.len() != before {
                    let output = self.node_output(node, 0);
                    let replacement = if operands.len() == 1 {
                        operands[0]
                    } else {
                        let rebuilt = rebuild_nary(self, region, &op, &operands)
                            .expect("reduced operands keep the operation signature");
                        self.node_output(rebuilt, 0)
                    };
                    self.divert_users(output, replacement);
                    self.remove_node(node);
                    return true;
                }
            }
        }

        if self.normal_forms().enabled(class, NormalFormFlags::FLATTEN) && op.is_associative() {
            if let Ok(Some(outputs)) = flatten_cascade(self, region, &op, &operands) {
                let output = self.node_output(node, 0);
                self.divert_users(output, outputs[0]);
                self.remove_node(node);
                return true;
            }
        }

        if self.normal_forms().enabled(class, NormalFormFlags::REORDER) && op.is_commutative() {
            let mut sorted = operands.clone();
            sorted.sort_unstable();
            if sorted != operands {
                let inputs: SmallVec<[crate::Input; 4]> =
                    self.node_inputs(node).iter().copied().collect();
                for (input, origin) in inputs.into_iter().zip(sorted) {
                    self.divert_input_origin(input, origin);
                }
                return true;
            }
        }

        false
    }
}

/// Applies pairwise reductions to the operand list until no pair reduces
fn reduce_operands(
    graph: &mut Graph,
    region: Region,
    op: &Operation,
    operands: &mut SmallVec<[Output; 4]>,
) {
    'outer: loop {
        for i in 0..operands.len() {
            for j in (i + 1)..operands.len() {
                let (a, b) = (operands[i], operands[j]);
                if let Some(path) = can_reduce_operand_pair(graph, op, a, b) {
                    let replacement = reduce_operand_pair(graph, region, op, path, a, b);
                    operands[i] = replacement;
                    operands.remove(j);
                    if operands.len() == 1 {
                        return;
                    }
                    continue 'outer;
                }
            }
        }
        return;
    }
}

/// The binary or flattened operation matching a given operand count
fn nary_operation(op: &Operation, narguments: usize) -> Operation {
    match op {
        Operation::BitBinary { kind, width } | Operation::FlattenedBinary { kind, width, .. } => {
            if narguments == 2 {
                Operation::BitBinary {
                    kind: *kind,
                    width: *width,
                }
            } else {
                Operation::FlattenedBinary {
                    kind: *kind,
                    width: *width,
                    narguments,
                }
            }
        }
        other => other.clone(),
    }
}

/// Rebuilds a binary or flattened node over a reduced operand list
fn rebuild_nary(
    graph: &mut Graph,
    region: Region,
    op: &Operation,
    operands: &[Output],
) -> Result<Node, GraphError> {
    graph.add_simple_node(region, nary_operation(op, operands.len()), operands)
}

/// If any operand is produced by a node of the same associative operation in
/// the same region, emits a single flattened node over the transitively
/// gathered leaf operands.
fn flatten_cascade(
    graph: &mut Graph,
    region: Region,
    op: &Operation,
    operands: &[Output],
) -> Result<Option<SmallVec<[Output; 2]>>, GraphError> {
    let (kind, width) = match op {
        Operation::BitBinary { kind, width } | Operation::FlattenedBinary { kind, width, .. } => {
            (*kind, *width)
        }
        _ => return Ok(None),
    };
    let same_op = |graph: &Graph, output: Output| -> Option<Node> {
        let producer = graph.producer(output)?;
        if graph.node_region(producer) != region {
            return None;
        }
        match graph.node_kind(producer) {
            NodeKind::Simple(Operation::BitBinary { kind: k, width: w })
            | NodeKind::Simple(Operation::FlattenedBinary { kind: k, width: w, .. })
                if *k == kind && *w == width =>
            {
                Some(producer)
            }
            _ => None,
        }
    };

    if !operands.iter().any(|operand| same_op(graph, *operand).is_some()) {
        return Ok(None);
    }

    let mut leaves: SmallVec<[Output; 8]> = SmallVec::new();
    let mut stack: Vec<Output> = operands.iter().rev().copied().collect();
    while let Some(operand) = stack.pop() {
        if let Some(producer) = same_op(graph, operand) {
            for input in graph.node_inputs(producer).iter().rev() {
                stack.push(graph.input_origin(*input));
            }
        } else {
            leaves.push(operand);
        }
    }

    let flattened = graph.add_simple_node(
        region,
        Operation::FlattenedBinary {
            kind,
            width,
            narguments: leaves.len(),
        },
        &leaves,
    )?;
    Ok(Some(SmallVec::from_slice(&[graph.node_output(flattened, 0)])))
}

/// Looks for an existing simple node in `region` with the same operation and
/// operand origins.
fn find_congruent_node(
    graph: &Graph,
    region: Region,
    op: &Operation,
    operands: &[Output],
) -> Option<Node> {
    graph.region_nodes(region).find(|node| {
        if !graph.is_simple_node(*node) || graph.node_operation(*node) != op {
            return false;
        }
        let inputs = graph.node_inputs(*node);
        inputs.len() == operands.len()
            && inputs
                .iter()
                .zip(operands)
                .all(|(input, operand)| graph.input_origin(*input) == *operand)
    })
}

#[cfg(test)]
mod tests {
    use loomc_rvsdg_type::Type;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::operation::{BitBinaryKind, BitValue};

    fn add(width: usize) -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Add,
            width,
        }
    }

    fn constant(graph: &mut Graph, width: usize, value: u64) -> Output {
        let root = graph.root();
        let node = graph
            .add_simple_node(root, Operation::BitConstant(BitValue::new(width, value)), &[])
            .unwrap();
        graph.node_output(node, 0)
    }

    #[test]
    fn constant_folding_shrinks_the_graph() {
        let mut graph = Graph::new();
        let three = constant(&mut graph, 32, 3);
        let four = constant(&mut graph, 32, 4);
        let nodes_before = graph.region_num_nodes(graph.root());

        let root = graph.root();
        let outputs = graph.add_simple_node_normalized(root, add(32), &[three, four]).unwrap();
        assert_eq!(outputs.len(), 1);
        let producer = graph.producer(outputs[0]).unwrap();
        assert_eq!(
            graph.node_operation(producer),
            &Operation::BitConstant(BitValue::new(32, 7))
        );
        // One constant was added; no add node materialized.
        assert_eq!(graph.region_num_nodes(graph.root()), nodes_before + 1);
        graph.assert_consistency();
    }

    #[test]
    fn cse_reuses_existing_nodes() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let first = graph.add_simple_node_normalized(root, add(32), &[x, y]).unwrap();
        let second = graph.add_simple_node_normalized(root, add(32), &[x, y]).unwrap();
        assert_eq!(first, second);
        assert_eq!(graph.region_num_nodes(root), 1);
    }

    #[test]
    fn commutative_operands_reorder() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        // Same pair in both orders normalizes to one node.
        let first = graph.add_simple_node_normalized(root, add(32), &[y, x]).unwrap();
        let second = graph.add_simple_node_normalized(root, add(32), &[x, y]).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn cascade_flattens() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let z = graph.import(Type::Bits(32), "z");
        let root = graph.root();

        graph.normal_forms_mut().set(OperationClass::Binary, NormalFormFlags::CSE, false);
        graph.normal_forms_mut().set(OperationClass::Binary, NormalFormFlags::REORDER, false);

        let inner = graph.add_simple_node(root, add(32), &[x, y]).unwrap();
        let inner_out = graph.node_output(inner, 0);
        let outputs = graph.add_simple_node_normalized(root, add(32), &[inner_out, z]).unwrap();

        let producer = graph.producer(outputs[0]).unwrap();
        assert_eq!(
            graph.node_operation(producer),
            &Operation::FlattenedBinary {
                kind: BitBinaryKind::Add,
                width: 32,
                narguments: 3,
            }
        );
        let origins: Vec<Output> = graph
            .node_inputs(producer)
            .iter()
            .map(|input| graph.input_origin(*input))
            .collect();
        assert_eq!(origins, vec![x, y, z]);
    }

    #[test]
    fn immutable_forms_disable_everything() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let three = constant(&mut graph, 32, 3);
        let four = constant(&mut graph, 32, 4);
        let root = graph.root();
        let outputs = graph.add_simple_node_normalized(root, add(32), &[three, four]).unwrap();
        let producer = graph.producer(outputs[0]).unwrap();
        assert_eq!(graph.node_operation(producer), &add(32));
    }

    #[test]
    fn flag_cascade_from_parent() {
        let mut registry = NormalFormRegistry::default();
        registry.set(OperationClass::Simple, NormalFormFlags::CSE, false);
        assert!(!registry.flags(OperationClass::Binary).contains(NormalFormFlags::CSE));
        assert!(!registry
            .flags(OperationClass::FlattenedBinary)
            .contains(NormalFormFlags::CSE));

        registry.set(OperationClass::Binary, NormalFormFlags::CSE, true);
        assert!(!registry.flags(OperationClass::Simple).contains(NormalFormFlags::CSE));
        assert!(registry.flags(OperationClass::Binary).contains(NormalFormFlags::CSE));
    }

    #[test]
    fn normalize_existing_node() {
        let mut graph = Graph::new();
        graph.normal_forms_mut().set_mutable(OperationClass::Simple, false);
        let three = constant(&mut graph, 32, 3);
        let four = constant(&mut graph, 32, 4);
        let root = graph.root();
        let node = graph.add_simple_node(root, add(32), &[three, four]).unwrap();
        let out = graph.node_output(node, 0);
        graph.export(out, "sum");

        // With forms immutable nothing happens.
        assert!(!graph.normalize_node(node));

        graph.normal_forms_mut().set_mutable(OperationClass::Simple, true);
        assert!(graph.normalize_node(node));
        let export = graph.region_result(root, 0);
        let producer = graph.producer(graph.input_origin(export)).unwrap();
        assert_eq!(
            graph.node_operation(producer),
            &Operation::BitConstant(BitValue::new(32, 7))
        );
        graph.assert_consistency();
    }
}
