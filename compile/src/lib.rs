//! The compilation pipeline: a linear chain of stages, each consuming and
//! producing a whole module. Parsing is delegated to whichever registered
//! frontend claims the input; construction and optimization are fixed
//! stages over the frontend's output.

mod stage;

use std::path::Path;

use loomc_frontend_llvm::{FrontendError, Module, RvsdgModule};
use loomc_session::{Session, StatisticsCollector, StatisticsError};

pub use self::stage::{ConstructStage, OptimizeStage, Stage};

/// Parses one input format into the frontend module representation.
///
/// The LLVM bitcode reader lives outside this workspace; hosts register
/// their frontends with [compile], and an input no frontend accepts is a
/// typed error rather than a crash.
pub trait Frontend {
    fn name(&self) -> &'static str;

    /// Whether this frontend wants to handle the given input path
    fn accepts(&self, input: &Path) -> bool;

    fn parse(&self, session: &Session) -> Result<Module, CompileError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("no registered frontend accepts `{input}`")]
    UnsupportedInput { input: String },
    #[error("frontend failed to parse `{input}`: {reason}")]
    Parse { input: String, reason: String },
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error(transparent)]
    Statistics(#[from] StatisticsError),
}

/// Runs the whole pipeline for `session`: parse, construct, optimize.
///
/// Statistics are collected when the session demands them and appended to
/// the configured file before returning.
pub fn compile(
    session: &Session,
    frontends: &[&dyn Frontend],
) -> Result<RvsdgModule, CompileError> {
    let frontend = frontends
        .iter()
        .find(|frontend| frontend.accepts(&session.input))
        .ok_or_else(|| CompileError::UnsupportedInput {
            input: session.source_name(),
        })?;
    log::info!(
        target: "compile",
        "compiling `{}` with the {} frontend",
        session.source_name(),
        frontend.name()
    );

    let module = frontend.parse(session)?;
    compile_module(module, session)
}

/// The pipeline after parsing; useful to hosts that build the frontend
/// module in process.
pub fn compile_module(module: Module, session: &Session) -> Result<RvsdgModule, CompileError> {
    let mut collector = if session.statistics_path.is_some() {
        StatisticsCollector::demanded()
    } else {
        StatisticsCollector::disabled()
    };

    let rvsdg = ConstructStage.run(module, session, &mut collector)?;
    let rvsdg = OptimizeStage.run(rvsdg, session, &mut collector)?;

    if let Some(path) = &session.statistics_path {
        collector.write_to_file(path)?;
    }
    Ok(rvsdg)
}
