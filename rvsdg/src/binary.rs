use bitflags::bitflags;

use crate::{Graph, Node, NodeKind, Operation, Output, Region};
use crate::operation::{BitBinaryKind, BitCompareKind, BitValue};

bitflags! {
    /// Algebraic properties of a binary operation
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct BinaryFlags: u8 {
        const ASSOCIATIVE = 1;
        const COMMUTATIVE = 2;
    }
}

/// The reduction opportunity detected for an operand pair.
///
/// `reduce_operand_pair` consumes the path returned by
/// `can_reduce_operand_pair` and produces the replacement output.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReductionPath {
    /// Both operands are constants and the operation folds
    Constants,
    /// The pair collapses through an algebraic identity (x - x, x & x, ...)
    Merge,
    /// Part of the left operand folds into the right
    LFold,
    /// Part of the right operand folds into the left
    RFold,
    /// The left operand is the neutral element
    LNeutral,
    /// The right operand is the neutral element
    RNeutral,
    /// Both operands share a common factor over the operation
    Factor,
}

impl BitBinaryKind {
    pub fn flags(&self) -> BinaryFlags {
        match self {
            Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor => {
                BinaryFlags::ASSOCIATIVE | BinaryFlags::COMMUTATIVE
            }
            Self::Sub
            | Self::SDiv
            | Self::UDiv
            | Self::SRem
            | Self::URem
            | Self::Shl
            | Self::LShr
            | Self::AShr => BinaryFlags::empty(),
        }
    }

    /// The neutral element of this operation on the given side, if any
    fn neutral_element(&self, width: usize, left: bool) -> Option<BitValue> {
        match self {
            Self::Add | Self::Or | Self::Xor => Some(BitValue::new(width, 0)),
            Self::Mul => Some(BitValue::new(width, 1)),
            Self::And => Some(BitValue::new(width, u64::MAX)),
            Self::Sub | Self::Shl | Self::LShr | Self::AShr if !left => {
                Some(BitValue::new(width, 0))
            }
            _ => None,
        }
    }

    /// Constant-folds the operation, or None when the fold is undefined
    /// (division or remainder by zero).
    pub fn fold(&self, width: usize, a: BitValue, b: BitValue) -> Option<BitValue> {
        let value = match self {
            Self::Add => a.to_u64().wrapping_add(b.to_u64()),
            Self::Sub => a.to_u64().wrapping_sub(b.to_u64()),
            Self::Mul => a.to_u64().wrapping_mul(b.to_u64()),
            Self::SDiv => {
                if b.is_zero() {
                    return None;
                }
                a.to_i64().wrapping_div(b.to_i64()) as u64
            }
            Self::UDiv => {
                if b.is_zero() {
                    return None;
                }
                a.to_u64() / b.to_u64()
            }
            Self::SRem => {
                if b.is_zero() {
                    return None;
                }
                a.to_i64().wrapping_rem(b.to_i64()) as u64
            }
            Self::URem => {
                if b.is_zero() {
                    return None;
                }
                a.to_u64() % b.to_u64()
            }
            Self::Shl => {
                if b.to_u64() >= width as u64 {
                    0
                } else {
                    a.to_u64() << b.to_u64()
                }
            }
            Self::LShr => {
                if b.to_u64() >= width as u64 {
                    0
                } else {
                    a.to_u64() >> b.to_u64()
                }
            }
            Self::AShr => {
                if b.to_u64() >= width as u64 {
                    if a.to_i64() < 0 {
                        u64::MAX
                    } else {
                        0
                    }
                } else {
                    (a.to_i64() >> b.to_u64()) as u64
                }
            }
            Self::And => a.to_u64() & b.to_u64(),
            Self::Or => a.to_u64() | b.to_u64(),
            Self::Xor => a.to_u64() ^ b.to_u64(),
        };
        Some(BitValue::new(width, value))
    }
}

impl BitCompareKind {
    pub fn fold(&self, a: BitValue, b: BitValue) -> bool {
        match self {
            Self::Eq => a.to_u64() == b.to_u64(),
            Self::Ne => a.to_u64() != b.to_u64(),
            Self::Slt => a.to_i64() < b.to_i64(),
            Self::Sle => a.to_i64() <= b.to_i64(),
            Self::Sgt => a.to_i64() > b.to_i64(),
            Self::Sge => a.to_i64() >= b.to_i64(),
            Self::Ult => a.to_u64() < b.to_u64(),
            Self::Ule => a.to_u64() <= b.to_u64(),
            Self::Ugt => a.to_u64() > b.to_u64(),
            Self::Uge => a.to_u64() >= b.to_u64(),
        }
    }
}

impl Operation {
    /// The algebraic flags of this operation, if it is a binary operation
    pub fn binary_flags(&self) -> Option<BinaryFlags> {
        match self {
            Self::BitBinary { kind, .. } | Self::FlattenedBinary { kind, .. } => {
                Some(kind.flags())
            }
            Self::BitCompare { .. } => Some(BinaryFlags::empty()),
            _ => None,
        }
    }

    pub fn is_associative(&self) -> bool {
        self.binary_flags()
            .is_some_and(|flags| flags.contains(BinaryFlags::ASSOCIATIVE))
    }

    pub fn is_commutative(&self) -> bool {
        self.binary_flags()
            .is_some_and(|flags| flags.contains(BinaryFlags::COMMUTATIVE))
    }
}

fn constant_value(graph: &Graph, output: Output) -> Option<BitValue> {
    let producer = graph.producer(output)?;
    match graph.node_kind(producer) {
        NodeKind::Simple(Operation::BitConstant(value)) => Some(*value),
        _ => None,
    }
}

/// Asks a binary operation for the reduction opportunity on the pair
/// `(a, b)`; None means the pair is irreducible.
pub fn can_reduce_operand_pair(
    graph: &Graph,
    op: &Operation,
    a: Output,
    b: Output,
) -> Option<ReductionPath> {
    match op {
        Operation::BitBinary { kind, width } | Operation::FlattenedBinary { kind, width, .. } => {
            let ca = constant_value(graph, a);
            let cb = constant_value(graph, b);
            if let (Some(va), Some(vb)) = (ca, cb) {
                if kind.fold(*width, va, vb).is_some() {
                    return Some(ReductionPath::Constants);
                }
            }
            if a == b {
                match kind {
                    BitBinaryKind::Sub | BitBinaryKind::Xor => return Some(ReductionPath::Merge),
                    BitBinaryKind::And | BitBinaryKind::Or => return Some(ReductionPath::Merge),
                    _ => {}
                }
            }
            if let Some(va) = ca {
                if kind.neutral_element(*width, true) == Some(va) {
                    return Some(ReductionPath::LNeutral);
                }
            }
            if let Some(vb) = cb {
                if kind.neutral_element(*width, false) == Some(vb) {
                    return Some(ReductionPath::RNeutral);
                }
            }
            None
        }
        Operation::BitCompare { kind, .. } => {
            let (va, vb) = (constant_value(graph, a)?, constant_value(graph, b)?);
            let _ = kind.fold(va, vb);
            Some(ReductionPath::Constants)
        }
        _ => None,
    }
}

/// Applies the reduction selected by `path`, creating the replacement output
/// in `region` where a fresh constant is needed.
pub fn reduce_operand_pair(
    graph: &mut Graph,
    region: Region,
    op: &Operation,
    path: ReductionPath,
    a: Output,
    b: Output,
) -> Output {
    match (op, path) {
        (Operation::BitBinary { kind, width }, ReductionPath::Constants)
        | (Operation::FlattenedBinary { kind, width, .. }, ReductionPath::Constants) => {
            let va = constant_value(graph, a).expect("constants path requires constant operands");
            let vb = constant_value(graph, b).expect("constants path requires constant operands");
            let value = kind.fold(*width, va, vb).expect("fold was checked to be defined");
            let node = graph
                .add_simple_node(region, Operation::BitConstant(value), &[])
                .expect("constant construction cannot fail");
            graph.node_output(node, 0)
        }
        (Operation::BitBinary { kind, width }, ReductionPath::Merge)
        | (Operation::FlattenedBinary { kind, width, .. }, ReductionPath::Merge) => {
            debug_assert_eq!(a, b);
            match kind {
                BitBinaryKind::And | BitBinaryKind::Or => a,
                BitBinaryKind::Sub | BitBinaryKind::Xor => {
                    let node = graph
                        .add_simple_node(
                            region,
                            Operation::BitConstant(BitValue::new(*width, 0)),
                            &[],
                        )
                        .expect("constant construction cannot fail");
                    graph.node_output(node, 0)
                }
                _ => unreachable!("merge path not defined for {kind:?}"),
            }
        }
        (_, ReductionPath::LNeutral) => b,
        (_, ReductionPath::RNeutral) => a,
        (Operation::BitCompare { kind, width }, ReductionPath::Constants) => {
            let va = constant_value(graph, a).expect("constants path requires constant operands");
            let vb = constant_value(graph, b).expect("constants path requires constant operands");
            let _ = width;
            let value = BitValue::new(1, kind.fold(va, vb) as u64);
            let node = graph
                .add_simple_node(region, Operation::BitConstant(value), &[])
                .expect("constant construction cannot fail");
            graph.node_output(node, 0)
        }
        (op, path) => unreachable!("no reduction {path:?} for {}", op.debug_name()),
    }
}

/// Folds a simple node whose result is computable from constant operands,
/// or collapses it onto a specific producer; the unary analogue of the
/// pairwise reduction protocol.
pub fn try_unary_reduction(graph: &mut Graph, node: Node) -> Option<Output> {
    let region = graph.node_region(node);
    let op = graph.node_operation(node).clone();
    match op {
        Operation::Cast { kind, from, to } => {
            use crate::operation::CastKind;
            let operand = graph.input_origin(graph.node_input(node, 0));
            let value = constant_value(graph, operand)?;
            let (from_width, to_width) = (from.bits_width()?, to.bits_width()?);
            let folded = match kind {
                CastKind::ZExt => BitValue::new(to_width, value.to_u64()),
                CastKind::SExt => BitValue::new(to_width, value.to_i64() as u64),
                CastKind::Trunc => BitValue::new(to_width, value.to_u64()),
                CastKind::BitCast if from_width == to_width => value,
                _ => return None,
            };
            let constant = graph
                .add_simple_node(region, Operation::BitConstant(folded), &[])
                .expect("constant construction cannot fail");
            Some(graph.node_output(constant, 0))
        }
        Operation::Match {
            ref mapping,
            default_alternative,
            nalternatives,
            ..
        } => {
            let operand = graph.input_origin(graph.node_input(node, 0));
            let value = constant_value(graph, operand)?;
            let alternative =
                Operation::match_alternative(mapping, default_alternative, value.to_u64());
            let constant = graph
                .add_simple_node(
                    region,
                    Operation::CtlConstant {
                        value: alternative,
                        nalternatives,
                    },
                    &[],
                )
                .expect("constant construction cannot fail");
            Some(graph.node_output(constant, 0))
        }
        Operation::Select(_) => {
            let predicate = graph.input_origin(graph.node_input(node, 0));
            let value = constant_value(graph, predicate)?;
            let chosen = if value.is_zero() { 2 } else { 1 };
            Some(graph.input_origin(graph.node_input(node, chosen)))
        }
        _ => None,
    }
}

/// The expansion strategy for a flattened binary node
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FlattenedReduction {
    /// Left-associated chain
    Linear,
    /// Balanced tree
    Parallel,
}

/// Expands a flattened binary node back into a cascade of binary nodes,
/// diverting its users to the cascade's final output and removing it.
pub fn reduce_flattened(graph: &mut Graph, node: Node, reduction: FlattenedReduction) -> Output {
    let (kind, width) = match graph.node_operation(node) {
        Operation::FlattenedBinary { kind, width, .. } => (*kind, *width),
        op => panic!("expected flattened binary node, got {}", op.debug_name()),
    };
    let region = graph.node_region(node);
    let op = Operation::BitBinary { kind, width };
    let mut operands: Vec<Output> = graph
        .node_inputs(node)
        .iter()
        .map(|input| graph.input_origin(*input))
        .collect();

    let result = match reduction {
        FlattenedReduction::Linear => {
            let mut acc = operands[0];
            for operand in &operands[1..] {
                let bin = graph
                    .add_simple_node(region, op.clone(), &[acc, *operand])
                    .expect("operand types were validated by the flattened node");
                acc = graph.node_output(bin, 0);
            }
            acc
        }
        FlattenedReduction::Parallel => {
            while operands.len() > 1 {
                let mut next = Vec::with_capacity(operands.len().div_ceil(2));
                for pair in operands.chunks(2) {
                    match pair {
                        [a, b] => {
                            let bin = graph
                                .add_simple_node(region, op.clone(), &[*a, *b])
                                .expect("operand types were validated by the flattened node");
                            next.push(graph.node_output(bin, 0));
                        }
                        [a] => next.push(*a),
                        _ => unreachable!(),
                    }
                }
                operands = next;
            }
            operands[0]
        }
    };

    let output = graph.node_output(node, 0);
    graph.divert_users(output, result);
    graph.remove_node(node);
    result
}

/// Expands every flattened binary node in `region` and its subregions
pub fn reduce_flattened_in_region(
    graph: &mut Graph,
    region: Region,
    reduction: FlattenedReduction,
) {
    let nodes: Vec<Node> = graph.region_nodes(region).collect();
    for node in nodes {
        if !graph.is_node_alive(node) {
            continue;
        }
        match graph.node_kind(node) {
            NodeKind::Simple(Operation::FlattenedBinary { .. }) => {
                reduce_flattened(graph, node, reduction);
            }
            NodeKind::Structural(_) => {
                for subregion in graph.node_subregions(node).to_vec() {
                    reduce_flattened_in_region(graph, subregion, reduction);
                }
            }
            NodeKind::Simple(_) => {}
        }
    }
}
