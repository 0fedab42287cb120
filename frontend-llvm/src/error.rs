use loomc_rvsdg::GraphError;

/// Everything that can go wrong between a frontend module and a finished
/// RVSDG.
///
/// Invariant violations inside the graph itself are compiler bugs and
/// panic; these errors cover malformed or unsupported *input*.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    #[error("unsupported construct{}: {construct}", in_function(.function))]
    Unsupported {
        construct: String,
        function: Option<String>,
    },
    #[error("malformed control-flow graph: {reason}")]
    MalformedCfg { reason: String },
    #[error("control-flow graph is not structured")]
    NotStructured,
    #[error("reference to undefined symbol `{name}`")]
    UndefinedSymbol { name: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

fn in_function(function: &Option<String>) -> String {
    match function {
        Some(name) => format!(" in function `{name}`"),
        None => String::new(),
    }
}
