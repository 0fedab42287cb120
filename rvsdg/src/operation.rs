use std::{fmt, sync::Arc};

use loomc_rvsdg_type::{FloatSize, FunctionType, Type};
use smallvec::{smallvec, SmallVec};

/// A bit-string constant of fixed width.
///
/// Values wider than 64 bits are not representable as constants; the
/// frontend rejects them before they reach the graph.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct BitValue {
    width: usize,
    bits: u64,
}

impl BitValue {
    pub fn new(width: usize, value: u64) -> Self {
        assert!(width >= 1 && width <= 64, "unsupported bit width {width}");
        Self {
            width,
            bits: Self::truncate(width, value),
        }
    }

    fn truncate(width: usize, value: u64) -> u64 {
        if width >= 64 {
            value
        } else {
            value & ((1u64 << width) - 1)
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// The value, zero-extended to 64 bits
    #[inline]
    pub fn to_u64(&self) -> u64 {
        self.bits
    }

    /// The value, sign-extended to 64 bits
    pub fn to_i64(&self) -> i64 {
        if self.width >= 64 {
            return self.bits as i64;
        }
        let sign = 1u64 << (self.width - 1);
        if self.bits & sign != 0 {
            (self.bits | !((1u64 << self.width) - 1)) as i64
        } else {
            self.bits as i64
        }
    }

    pub fn is_zero(&self) -> bool {
        self.bits == 0
    }

    pub fn is_one(&self) -> bool {
        self.bits == 1
    }

    /// True if every bit within the width is set
    pub fn is_all_ones(&self) -> bool {
        self.bits == Self::truncate(self.width, u64::MAX)
    }
}

impl fmt::Display for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:i{}", self.bits, self.width)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitBinaryKind {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    Shl,
    LShr,
    AShr,
    And,
    Or,
    Xor,
}

impl BitBinaryKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::SDiv => "sdiv",
            Self::UDiv => "udiv",
            Self::SRem => "srem",
            Self::URem => "urem",
            Self::Shl => "shl",
            Self::LShr => "lshr",
            Self::AShr => "ashr",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BitCompareKind {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl BitCompareKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Slt => "slt",
            Self::Sle => "sle",
            Self::Sgt => "sgt",
            Self::Sge => "sge",
            Self::Ult => "ult",
            Self::Ule => "ule",
            Self::Ugt => "ugt",
            Self::Uge => "uge",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FpBinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FpCompareKind {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
    Ueq,
    Une,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum PtrCompareKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CastKind {
    ZExt,
    SExt,
    Trunc,
    BitCast,
    FpToSi,
    FpToUi,
    SiToFp,
    UiToFp,
    FpTrunc,
    FpExt,
    PtrToInt,
    IntToPtr,
}

impl CastKind {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::ZExt => "zext",
            Self::SExt => "sext",
            Self::Trunc => "trunc",
            Self::BitCast => "bitcast",
            Self::FpToSi => "fptosi",
            Self::FpToUi => "fptoui",
            Self::SiToFp => "sitofp",
            Self::UiToFp => "uitofp",
            Self::FpTrunc => "fptrunc",
            Self::FpExt => "fpext",
            Self::PtrToInt => "ptrtoint",
            Self::IntToPtr => "inttoptr",
        }
    }
}

/// The operation carried by a simple node.
///
/// Operations are immutable, value-comparable descriptors: two operations
/// are equal iff they have the same kind and the same configuration. The
/// argument and result signature of a node is fully determined by its
/// operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    BitConstant(BitValue),
    /// A constant control selector, e.g. the initial predicate of a theta
    CtlConstant {
        value: u64,
        nalternatives: usize,
    },
    BitBinary {
        kind: BitBinaryKind,
        width: usize,
    },
    BitCompare {
        kind: BitCompareKind,
        width: usize,
    },
    FpBinary {
        kind: FpBinaryKind,
        size: FloatSize,
    },
    FpCompare {
        kind: FpCompareKind,
        size: FloatSize,
    },
    FpNeg(FloatSize),
    PtrCompare(PtrCompareKind),
    Cast {
        kind: CastKind,
        from: Type,
        to: Type,
    },
    Select(Type),
    /// An SSA phi at the TAC level; collapses through gamma/theta selection
    /// during construction and never survives into the RVSDG.
    PhiMerge {
        ty: Type,
        narguments: usize,
    },
    /// A TAC-level copy; construction binds the right-hand output directly
    Assignment(Type),
    Alloca {
        ty: Type,
        alignment: usize,
    },
    Load {
        ty: Type,
        alignment: usize,
        volatile: bool,
    },
    Store {
        ty: Type,
        alignment: usize,
        volatile: bool,
    },
    Memcpy {
        volatile: bool,
    },
    Malloc,
    Free,
    /// A call through a function-typed callee; the callee of a direct call
    /// traces back to a lambda, an indirect one to a pointer conversion.
    Call(Arc<FunctionType>),
    FunctionToPointer(Arc<FunctionType>),
    PointerToFunction(Arc<FunctionType>),
    GetElementPtr {
        pointee: Type,
        noffsets: usize,
    },
    MemStateSplit(usize),
    MemStateMerge(usize),
    IoBarrier(Type),
    Valist(SmallVec<[Type; 4]>),
    ConstantArray {
        element: Type,
        len: usize,
    },
    ConstantStruct(Type),
    ConstantVector {
        element: Type,
        len: usize,
    },
    ConstantAggregateZero(Type),
    ExtractValue {
        aggregate: Type,
        field: Type,
        indices: SmallVec<[usize; 2]>,
    },
    InsertValue {
        aggregate: Type,
        field: Type,
        indices: SmallVec<[usize; 2]>,
    },
    ExtractElement {
        vector: Type,
        element: Type,
    },
    InsertElement {
        vector: Type,
        element: Type,
    },
    ShuffleVector {
        vector: Type,
        mask: SmallVec<[usize; 8]>,
    },
    /// Maps bit values to control alternatives; unmapped values select the
    /// default alternative.
    Match {
        nbits: usize,
        mapping: Vec<(u64, u64)>,
        default_alternative: u64,
        nalternatives: usize,
    },
    /// A basic-block terminator selecting a successor; TAC level only
    Branch {
        nalternatives: usize,
    },
    Undef(Type),
    Poison(Type),
    NullPtr,
    /// A cascade of the same associative binary operation, folded into one
    /// node of `narguments` operands.
    FlattenedBinary {
        kind: BitBinaryKind,
        width: usize,
        narguments: usize,
    },
}

impl Operation {
    /// Builds a `match` whose mapping is the identity on `0..n-1` with `n`
    /// as the default alternative; the usual shape for dispatcher blocks.
    pub fn identity_match(nbits: usize, n: u64) -> Self {
        Self::Match {
            nbits,
            mapping: (0..n).map(|v| (v, v)).collect(),
            default_alternative: n,
            nalternatives: n as usize + 1,
        }
    }

    /// The types of the operands this operation expects, in order
    pub fn argument_types(&self) -> SmallVec<[Type; 4]> {
        match self {
            Self::BitConstant(_)
            | Self::CtlConstant { .. }
            | Self::Undef(_)
            | Self::Poison(_)
            | Self::NullPtr => smallvec![],
            Self::BitBinary { width, .. } => smallvec![Type::Bits(*width), Type::Bits(*width)],
            Self::BitCompare { width, .. } => smallvec![Type::Bits(*width), Type::Bits(*width)],
            Self::FpBinary { size, .. } => smallvec![Type::Float(*size), Type::Float(*size)],
            Self::FpCompare { size, .. } => smallvec![Type::Float(*size), Type::Float(*size)],
            Self::FpNeg(size) => smallvec![Type::Float(*size)],
            Self::PtrCompare(_) => smallvec![Type::Ptr, Type::Ptr],
            Self::Cast { from, .. } => smallvec![from.clone()],
            Self::Select(ty) => smallvec![Type::Bits(1), ty.clone(), ty.clone()],
            Self::PhiMerge { ty, narguments } => smallvec![ty.clone(); *narguments],
            Self::Assignment(ty) => smallvec![ty.clone()],
            Self::Alloca { .. } => smallvec![Type::MemState],
            Self::Load { volatile, .. } => {
                if *volatile {
                    smallvec![Type::Ptr, Type::IoState, Type::MemState]
                } else {
                    smallvec![Type::Ptr, Type::MemState]
                }
            }
            Self::Store { ty, volatile, .. } => {
                if *volatile {
                    smallvec![Type::Ptr, ty.clone(), Type::IoState, Type::MemState]
                } else {
                    smallvec![Type::Ptr, ty.clone(), Type::MemState]
                }
            }
            Self::Memcpy { volatile } => {
                if *volatile {
                    smallvec![Type::Ptr, Type::Ptr, Type::Bits(64), Type::IoState, Type::MemState]
                } else {
                    smallvec![Type::Ptr, Type::Ptr, Type::Bits(64), Type::MemState]
                }
            }
            Self::Malloc => smallvec![Type::Bits(64), Type::MemState],
            Self::Free => smallvec![Type::Ptr, Type::MemState, Type::IoState],
            Self::Call(fnty) => {
                let mut args = smallvec![Type::Function(fnty.clone())];
                args.extend(fnty.arguments().iter().cloned());
                args
            }
            Self::FunctionToPointer(fnty) => smallvec![Type::Function(fnty.clone())],
            Self::PointerToFunction(_) => smallvec![Type::Ptr],
            Self::GetElementPtr { noffsets, .. } => {
                let mut args = smallvec![Type::Ptr];
                args.extend(std::iter::repeat(Type::Bits(64)).take(*noffsets));
                args
            }
            Self::MemStateSplit(_) => smallvec![Type::MemState],
            Self::MemStateMerge(n) => smallvec![Type::MemState; *n],
            Self::IoBarrier(ty) => smallvec![ty.clone(), Type::IoState],
            Self::Valist(types) => types.iter().cloned().collect(),
            Self::ConstantArray { element, len } => smallvec![element.clone(); *len],
            Self::ConstantStruct(ty) => match ty {
                Type::Struct(struct_ty) => {
                    struct_ty.declaration().elements().iter().cloned().collect()
                }
                other => panic!("constant struct of non-struct type {other}"),
            },
            Self::ConstantVector { element, len } => smallvec![element.clone(); *len],
            Self::ConstantAggregateZero(_) => smallvec![],
            Self::ExtractValue { aggregate, .. } => smallvec![aggregate.clone()],
            Self::InsertValue { aggregate, field, .. } => {
                smallvec![aggregate.clone(), field.clone()]
            }
            Self::ExtractElement { vector, .. } => smallvec![vector.clone(), Type::Bits(64)],
            Self::InsertElement { vector, element } => {
                smallvec![vector.clone(), element.clone(), Type::Bits(64)]
            }
            Self::ShuffleVector { vector, .. } => smallvec![vector.clone(), vector.clone()],
            Self::Match { nbits, .. } => smallvec![Type::Bits(*nbits)],
            Self::Branch { nalternatives } => smallvec![Type::Ctl(*nalternatives)],
            Self::FlattenedBinary { width, narguments, .. } => {
                smallvec![Type::Bits(*width); *narguments]
            }
        }
    }

    /// The types of the results this operation produces, in order
    pub fn result_types(&self) -> SmallVec<[Type; 2]> {
        match self {
            Self::BitConstant(value) => smallvec![Type::Bits(value.width())],
            Self::CtlConstant { nalternatives, .. } => smallvec![Type::Ctl(*nalternatives)],
            Self::BitBinary { width, .. } => smallvec![Type::Bits(*width)],
            Self::BitCompare { .. } => smallvec![Type::Bits(1)],
            Self::FpBinary { size, .. } => smallvec![Type::Float(*size)],
            Self::FpCompare { .. } => smallvec![Type::Bits(1)],
            Self::FpNeg(size) => smallvec![Type::Float(*size)],
            Self::PtrCompare(_) => smallvec![Type::Bits(1)],
            Self::Cast { to, .. } => smallvec![to.clone()],
            Self::Select(ty) => smallvec![ty.clone()],
            Self::PhiMerge { ty, .. } => smallvec![ty.clone()],
            Self::Assignment(ty) => smallvec![ty.clone()],
            Self::Alloca { .. } => smallvec![Type::Ptr, Type::MemState],
            Self::Load { ty, volatile, .. } => {
                if *volatile {
                    smallvec![ty.clone(), Type::IoState, Type::MemState]
                } else {
                    smallvec![ty.clone(), Type::MemState]
                }
            }
            Self::Store { volatile, .. } => {
                if *volatile {
                    smallvec![Type::IoState, Type::MemState]
                } else {
                    smallvec![Type::MemState]
                }
            }
            Self::Memcpy { volatile } => {
                if *volatile {
                    smallvec![Type::IoState, Type::MemState]
                } else {
                    smallvec![Type::MemState]
                }
            }
            Self::Malloc => smallvec![Type::Ptr, Type::MemState],
            Self::Free => smallvec![Type::MemState, Type::IoState],
            Self::Call(fnty) => fnty.results().iter().cloned().collect(),
            Self::FunctionToPointer(_) => smallvec![Type::Ptr],
            Self::PointerToFunction(fnty) => smallvec![Type::Function(fnty.clone())],
            Self::GetElementPtr { .. } => smallvec![Type::Ptr],
            Self::MemStateSplit(n) => smallvec![Type::MemState; *n],
            Self::MemStateMerge(_) => smallvec![Type::MemState],
            Self::IoBarrier(ty) => smallvec![ty.clone(), Type::IoState],
            Self::Valist(_) => smallvec![Type::Varargs],
            Self::ConstantArray { element, len } => {
                smallvec![Type::from(loomc_rvsdg_type::ArrayType::new(element.clone(), *len))]
            }
            Self::ConstantStruct(ty) => smallvec![ty.clone()],
            Self::ConstantVector { element, len } => {
                smallvec![Type::from(loomc_rvsdg_type::VectorType::new(element.clone(), *len))]
            }
            Self::ConstantAggregateZero(ty) => smallvec![ty.clone()],
            Self::ExtractValue { field, .. } => smallvec![field.clone()],
            Self::InsertValue { aggregate, .. } => smallvec![aggregate.clone()],
            Self::ExtractElement { element, .. } => smallvec![element.clone()],
            Self::InsertElement { vector, .. } => smallvec![vector.clone()],
            Self::ShuffleVector { vector, .. } => smallvec![vector.clone()],
            Self::Match { nalternatives, .. } => smallvec![Type::Ctl(*nalternatives)],
            Self::Branch { .. } => smallvec![],
            Self::Undef(ty) | Self::Poison(ty) => smallvec![ty.clone()],
            Self::NullPtr => smallvec![Type::Ptr],
            Self::FlattenedBinary { width, .. } => smallvec![Type::Bits(*width)],
        }
    }

    #[inline]
    pub fn num_arguments(&self) -> usize {
        self.argument_types().len()
    }

    #[inline]
    pub fn num_results(&self) -> usize {
        self.result_types().len()
    }

    /// The display name used when rendering nodes
    pub fn debug_name(&self) -> String {
        match self {
            Self::BitConstant(value) => format!("bitconstant({value})"),
            Self::CtlConstant { value, nalternatives } => {
                format!("ctlconstant({value} of {nalternatives})")
            }
            Self::BitBinary { kind, width } => format!("bit{}{width}", kind.mnemonic()),
            Self::BitCompare { kind, width } => format!("bit{}{width}", kind.mnemonic()),
            Self::FpBinary { kind, .. } => format!("fp{:?}", kind).to_lowercase(),
            Self::FpCompare { kind, .. } => format!("fpcmp-{:?}", kind).to_lowercase(),
            Self::FpNeg(_) => "fpneg".to_string(),
            Self::PtrCompare(kind) => format!("ptrcmp-{:?}", kind).to_lowercase(),
            Self::Cast { kind, .. } => kind.mnemonic().to_string(),
            Self::Select(_) => "select".to_string(),
            Self::PhiMerge { .. } => "phi".to_string(),
            Self::Assignment(_) => "assign".to_string(),
            Self::Alloca { .. } => "alloca".to_string(),
            Self::Load { volatile: true, .. } => "load-volatile".to_string(),
            Self::Load { .. } => "load".to_string(),
            Self::Store { volatile: true, .. } => "store-volatile".to_string(),
            Self::Store { .. } => "store".to_string(),
            Self::Memcpy { .. } => "memcpy".to_string(),
            Self::Malloc => "malloc".to_string(),
            Self::Free => "free".to_string(),
            Self::Call(_) => "call".to_string(),
            Self::FunctionToPointer(_) => "fn2ptr".to_string(),
            Self::PointerToFunction(_) => "ptr2fn".to_string(),
            Self::GetElementPtr { .. } => "getelementptr".to_string(),
            Self::MemStateSplit(n) => format!("memstate-split{n}"),
            Self::MemStateMerge(n) => format!("memstate-merge{n}"),
            Self::IoBarrier(_) => "iobarrier".to_string(),
            Self::Valist(_) => "valist".to_string(),
            Self::ConstantArray { .. } => "constant-array".to_string(),
            Self::ConstantStruct(_) => "constant-struct".to_string(),
            Self::ConstantVector { .. } => "constant-vector".to_string(),
            Self::ConstantAggregateZero(_) => "constant-zero".to_string(),
            Self::ExtractValue { .. } => "extractvalue".to_string(),
            Self::InsertValue { .. } => "insertvalue".to_string(),
            Self::ExtractElement { .. } => "extractelement".to_string(),
            Self::InsertElement { .. } => "insertelement".to_string(),
            Self::ShuffleVector { .. } => "shufflevector".to_string(),
            Self::Match { .. } => "match".to_string(),
            Self::Branch { .. } => "branch".to_string(),
            Self::Undef(_) => "undef".to_string(),
            Self::Poison(_) => "poison".to_string(),
            Self::NullPtr => "nullptr".to_string(),
            Self::FlattenedBinary { kind, narguments, .. } => {
                format!("flattened-bit{}({narguments})", kind.mnemonic())
            }
        }
    }

    /// Evaluates a `match` mapping against a constant selector value
    pub fn match_alternative(mapping: &[(u64, u64)], default_alternative: u64, value: u64) -> u64 {
        mapping
            .iter()
            .find(|(from, _)| *from == value)
            .map(|(_, to)| *to)
            .unwrap_or(default_alternative)
    }
}
