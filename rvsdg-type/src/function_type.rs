use std::fmt;

use smallvec::SmallVec;

use crate::Type;

/// The signature of a function: ordered argument and result type vectors.
///
/// Functions converted from the input IR always carry the io-state and
/// memory-state edges as their final two arguments and final two results.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionType {
    arguments: SmallVec<[Type; 4]>,
    results: SmallVec<[Type; 2]>,
}

impl FunctionType {
    pub fn new(
        arguments: impl IntoIterator<Item = Type>,
        results: impl IntoIterator<Item = Type>,
    ) -> Self {
        Self {
            arguments: SmallVec::from_iter(arguments),
            results: SmallVec::from_iter(results),
        }
    }

    #[inline]
    pub fn arguments(&self) -> &[Type] {
        &self.arguments
    }

    #[inline]
    pub fn results(&self) -> &[Type] {
        &self.results
    }

    #[inline]
    pub fn num_arguments(&self) -> usize {
        self.arguments.len()
    }

    #[inline]
    pub fn num_results(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the final two arguments and results are the io-state
    /// and memory-state edges, in that order.
    pub fn is_state_threaded(&self) -> bool {
        let args_ok = matches!(self.arguments.as_slice(), [.., Type::IoState, Type::MemState]);
        let results_ok = matches!(self.results.as_slice(), [.., Type::IoState, Type::MemState]);
        args_ok && results_ok
    }
}

impl fmt::Display for FunctionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("fn(")?;
        for (i, ty) in self.arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(") -> (")?;
        for (i, ty) in self.results.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{ty}")?;
        }
        f.write_str(")")
    }
}
