use loomc_frontend_llvm::{convert_module, Module, RvsdgModule};
use loomc_session::{Session, StatisticsCollector};
use loomc_transform::{
    CommonNodeElimination, DeadNodeElimination, FunctionInlining, GammaPullIn, NodeReduction,
    Transform,
};

use crate::CompileError;

/// One link of the pipeline: consumes its input representation whole and
/// produces the next one.
pub trait Stage {
    type Input;
    type Output;

    fn name(&self) -> &'static str;

    fn run(
        &self,
        input: Self::Input,
        session: &Session,
        collector: &mut StatisticsCollector,
    ) -> Result<Self::Output, CompileError>;
}

/// Restructures, aggregates, and converts every function of the module,
/// producing the RVSDG.
pub struct ConstructStage;

impl Stage for ConstructStage {
    type Input = Module;
    type Output = RvsdgModule;

    fn name(&self) -> &'static str {
        "construct"
    }

    fn run(
        &self,
        input: Module,
        session: &Session,
        _collector: &mut StatisticsCollector,
    ) -> Result<RvsdgModule, CompileError> {
        let rvsdg = convert_module(input, session.skip_unsupported_functions)?;
        if cfg!(debug_assertions) {
            rvsdg.graph.assert_consistency();
        }
        Ok(rvsdg)
    }
}

/// Runs the optimization schedule selected by the session's level and
/// per-pass toggles. Dead-node elimination is interleaved after every pass
/// that leaves garbage behind.
pub struct OptimizeStage;

impl OptimizeStage {
    fn schedule(session: &Session) -> Vec<Box<dyn Transform>> {
        let mut passes: Vec<Box<dyn Transform>> = Vec::new();
        let dne = |passes: &mut Vec<Box<dyn Transform>>| {
            if session.dne_enabled() {
                passes.push(Box::new(DeadNodeElimination));
            }
        };

        dne(&mut passes);
        if session.cne_enabled() {
            passes.push(Box::new(CommonNodeElimination));
            dne(&mut passes);
        }
        if session.inlining_enabled() {
            passes.push(Box::new(FunctionInlining));
            dne(&mut passes);
        }
        if session.flatten_enabled() {
            passes.push(Box::new(NodeReduction::default()));
            dne(&mut passes);
        }
        if session.pull_enabled() {
            passes.push(Box::new(GammaPullIn));
            dne(&mut passes);
        }
        passes
    }
}

impl Stage for OptimizeStage {
    type Input = RvsdgModule;
    type Output = RvsdgModule;

    fn name(&self) -> &'static str {
        "optimize"
    }

    fn run(
        &self,
        mut input: RvsdgModule,
        session: &Session,
        collector: &mut StatisticsCollector,
    ) -> Result<RvsdgModule, CompileError> {
        for pass in Self::schedule(session) {
            log::debug!(target: "compile:optimize", "running pass `{}`", pass.name());
            pass.run(&mut input, collector);
            if cfg!(debug_assertions) {
                input.graph.assert_consistency();
            }
        }
        Ok(input)
    }
}
