use std::sync::Arc;

use loomc_rvsdg::Linkage;
pub use loomc_rvsdg::RvsdgModule;
use loomc_rvsdg_type::{FunctionType, Type};

use crate::cfg::{Cfg, Tac, Variable, VariableTable};

/// A function of the input module: a signature plus, for definitions, a
/// TAC-level control-flow graph. Declarations have no body and import their
/// value from outside the translation unit.
#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub ty: Arc<FunctionType>,
    pub linkage: Linkage,
    pub cfg: Option<Cfg>,
}

/// A global variable: its value type plus, for definitions, a straight-line
/// initializer computing the initial value.
#[derive(Debug)]
pub struct GlobalVariable {
    pub name: String,
    pub value_type: Type,
    pub linkage: Linkage,
    pub constant: bool,
    pub variables: VariableTable,
    pub initializer: Vec<Tac>,
    /// The initializer's result variable; None for external declarations
    pub result: Option<Variable>,
}

/// An input module as handed over by a frontend: the unit of compilation
/// for every pass in the pipeline.
#[derive(Debug, Default)]
pub struct Module {
    pub source_filename: String,
    pub target_triple: String,
    pub data_layout: String,
    pub globals: Vec<GlobalVariable>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new(source_filename: impl Into<String>) -> Self {
        Self {
            source_filename: source_filename.into(),
            ..Self::default()
        }
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|function| function.name == name)
    }
}

