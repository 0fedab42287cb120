//! The pre-RVSDG side of the compiler: a TAC-based control-flow IR as
//! emitted by an LLVM-style frontend, the restructuring and aggregation
//! passes that discipline its control flow, and the construction pass that
//! lowers the result into the RVSDG.

pub mod aggregation;
pub mod annotation;
pub mod cfg;
mod construct;
mod error;
mod module;
pub mod restructure;

pub use self::{
    construct::{
        convert_function, convert_module, PredicateStack, SymbolMap, ThetaEnv, ThetaStack,
        VariableMap,
    },
    error::FrontendError,
    module::{Function, GlobalVariable, Module, RvsdgModule},
};
