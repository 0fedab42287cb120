//! RVSDG construction: walks the aggregation tree of each function and
//! builds nested structural nodes, threading data flow through a
//! variable-to-output environment. Branches become gammas fed by the
//! predicate of the split's terminating match; loops become thetas whose
//! loop variables carry everything the body touches; functions become
//! lambdas, mutually-recursive groups phis, and globals deltas.

use indexmap::{IndexMap, IndexSet};
use loomc_rvsdg::{Graph, Linkage, LoopVar, Node, Operation, Output, Region};
use loomc_rvsdg_type::Type;
use petgraph::graphmap::DiGraphMap;
use smallvec::SmallVec;

use crate::{
    aggregation::{aggregate, AggNode, Structure},
    annotation::{annotate, Demand},
    cfg::{Cfg, Tac, Variable, VariableKind, VariableTable},
    module::{Function, Module, RvsdgModule},
    restructure::restructure,
    FrontendError,
};

/// The region-local environment: which output currently holds each
/// variable's value.
#[derive(Debug, Default, Clone)]
pub struct VariableMap {
    map: IndexMap<Variable, Output>,
}

impl VariableMap {
    pub fn insert(&mut self, variable: Variable, output: Output) {
        self.map.insert(variable, output);
    }

    pub fn lookup(&self, variable: Variable) -> Option<Output> {
        self.map.get(&variable).copied()
    }

    pub fn merge(&mut self, other: &VariableMap) {
        for (variable, output) in &other.map {
            self.map.insert(*variable, *output);
        }
    }
}

/// One frame per enclosing gamma: the predicate output and the alternative
/// index under construction. The frame below the arms is pushed by the
/// split's terminating branch and consumed when the gamma (or theta) is
/// built.
#[derive(Debug, Default)]
pub struct PredicateStack {
    stack: Vec<(Output, usize)>,
}

impl PredicateStack {
    pub fn push(&mut self, predicate: Output, index: usize) {
        self.stack.push((predicate, index));
    }

    pub fn pop(&mut self) -> Option<(Output, usize)> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<(Output, usize)> {
        self.stack.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// The construction environment of one theta: created when a loop
/// aggregation node is entered, alive exactly for the duration of body
/// construction, and popped when the loop variables' post-results are
/// wired.
#[derive(Debug)]
pub struct ThetaEnv {
    theta: Node,
    loopvars: IndexMap<Variable, LoopVar>,
}

impl ThetaEnv {
    fn new(theta: Node) -> Self {
        Self {
            theta,
            loopvars: IndexMap::new(),
        }
    }

    pub fn theta(&self) -> Node {
        self.theta
    }

    pub fn loopvar(&self, variable: Variable) -> Option<&LoopVar> {
        self.loopvars.get(&variable)
    }
}

#[derive(Debug, Default)]
pub struct ThetaStack {
    stack: Vec<ThetaEnv>,
}

impl ThetaStack {
    pub fn push(&mut self, env: ThetaEnv) {
        self.stack.push(env);
    }

    pub fn pop(&mut self) -> Option<ThetaEnv> {
        self.stack.pop()
    }

    pub fn top(&self) -> Option<&ThetaEnv> {
        self.stack.last()
    }
}

/// Builds the body of one lambda from its aggregation tree
struct FunctionBuilder<'a> {
    graph: &'a mut Graph,
    cfg: &'a Cfg,
    demands: &'a [Demand],
    function_name: &'a str,
    entry_arguments: Vec<Output>,
    predicate_stack: PredicateStack,
    theta_stack: ThetaStack,
    results: Vec<Output>,
}

impl FunctionBuilder<'_> {
    fn unsupported(&self, construct: impl Into<String>) -> FrontendError {
        FrontendError::Unsupported {
            construct: construct.into(),
            function: Some(self.function_name.to_string()),
        }
    }

    fn lookup_or_undef(
        &mut self,
        region: Region,
        vmap: &mut VariableMap,
        variable: Variable,
    ) -> Output {
        if let Some(output) = vmap.lookup(variable) {
            return output;
        }
        let ty = self.cfg.variables.ty(variable).clone();
        let node = self
            .graph
            .add_simple_node(region, Operation::Undef(ty), &[])
            .expect("undef construction cannot fail");
        let output = self.graph.node_output(node, 0);
        vmap.insert(variable, output);
        output
    }

    fn construct(
        &mut self,
        node: &AggNode,
        region: Region,
        vmap: &mut VariableMap,
        live_out: &IndexSet<Variable>,
    ) -> Result<(), FrontendError> {
        match &node.structure {
            Structure::Entry => {
                if self.cfg.arguments.len() != self.entry_arguments.len() {
                    return Err(FrontendError::MalformedCfg {
                        reason: format!(
                            "function `{}` binds {} argument variables for {} signature arguments",
                            self.function_name,
                            self.cfg.arguments.len(),
                            self.entry_arguments.len()
                        ),
                    });
                }
                for (variable, output) in
                    self.cfg.arguments.iter().zip(self.entry_arguments.clone())
                {
                    vmap.insert(*variable, output);
                }
                Ok(())
            }
            Structure::Exit => {
                let mut results = Vec::with_capacity(self.cfg.results.len());
                for variable in &self.cfg.results {
                    let output = vmap.lookup(*variable).ok_or_else(|| {
                        FrontendError::MalformedCfg {
                            reason: format!(
                                "result variable `{}` has no definition on exit",
                                self.cfg.variables.name(*variable)
                            ),
                        }
                    })?;
                    results.push(output);
                }
                self.results = results;
                Ok(())
            }
            Structure::Block(None) => Ok(()),
            Structure::Block(Some(block)) => {
                for tac in &self.cfg.block(*block).tacs {
                    self.convert_tac(tac, region, vmap)?;
                }
                Ok(())
            }
            Structure::Linear => {
                let first = node.child(0);
                let second = node.child(1);
                let mut live_mid = self.demands[second.id].reads.clone();
                for variable in live_out {
                    if !self.demands[second.id].writes.contains(variable) {
                        live_mid.insert(*variable);
                    }
                }
                self.construct(first, region, vmap, &live_mid)?;
                self.construct(second, region, vmap, live_out)
            }
            Structure::Branch => self.construct_branch(node, region, vmap, live_out),
            Structure::Loop => self.construct_loop(node, region, vmap, live_out),
        }
    }

    fn convert_tac(
        &mut self,
        tac: &Tac,
        region: Region,
        vmap: &mut VariableMap,
    ) -> Result<(), FrontendError> {
        match &tac.operation {
            Operation::Assignment(_) => {
                let origin = self.operand(tac.operands[0], vmap)?;
                vmap.insert(tac.results[0], origin);
                Ok(())
            }
            Operation::PhiMerge { narguments, .. } => {
                // Multi-predecessor phis become selection through the gamma
                // and theta structure; one that survives to this point must
                // be the collapsed single-operand form.
                if *narguments != 1 {
                    return Err(self.unsupported("unresolved multi-predecessor phi"));
                }
                let origin = self.operand(tac.operands[0], vmap)?;
                vmap.insert(tac.results[0], origin);
                Ok(())
            }
            Operation::Branch { .. } => {
                let predicate = self.operand(tac.operands[0], vmap)?;
                self.predicate_stack.push(predicate, 0);
                Ok(())
            }
            operation => {
                let operands = tac
                    .operands
                    .iter()
                    .map(|operand| self.operand(*operand, vmap))
                    .collect::<Result<SmallVec<[Output; 4]>, _>>()?;
                let outputs =
                    self.graph
                        .add_simple_node_normalized(region, operation.clone(), &operands)?;
                if outputs.len() != tac.results.len() {
                    return Err(FrontendError::MalformedCfg {
                        reason: format!(
                            "`{}` produces {} results but the code binds {}",
                            operation.debug_name(),
                            outputs.len(),
                            tac.results.len()
                        ),
                    });
                }
                for (variable, output) in tac.results.iter().zip(outputs) {
                    vmap.insert(*variable, output);
                }
                Ok(())
            }
        }
    }

    fn operand(&self, variable: Variable, vmap: &VariableMap) -> Result<Output, FrontendError> {
        vmap.lookup(variable).ok_or_else(|| FrontendError::MalformedCfg {
            reason: format!(
                "operand variable `{}` used before definition",
                self.cfg.variables.name(variable)
            ),
        })
    }

    fn construct_branch(
        &mut self,
        node: &AggNode,
        region: Region,
        vmap: &mut VariableMap,
        live_out: &IndexSet<Variable>,
    ) -> Result<(), FrontendError> {
        let split = node.child(0);
        let arms = &node.children[1..];

        // Everything the arms read, plus what flows out, is live at the end
        // of the split.
        let mut live_split: IndexSet<Variable> = live_out.clone();
        for arm in arms {
            live_split.extend(self.demands[arm.id].reads.iter().copied());
        }
        self.construct(split, region, vmap, &live_split)?;

        let (predicate, _) = self.predicate_stack.pop().ok_or_else(|| {
            FrontendError::MalformedCfg {
                reason: "branch region has no terminating branch".to_string(),
            }
        })?;

        // Exit variables: whatever is live afterwards and possibly written
        // by an arm. Entry variables: whatever any arm reads, plus exit
        // variables some path does not write (those pass the entry value
        // through).
        let mut exit_vars: IndexSet<Variable> = IndexSet::new();
        for variable in live_out {
            if arms.iter().any(|arm| self.demands[arm.id].may_writes.contains(variable)) {
                exit_vars.insert(*variable);
            }
        }
        let mut entry_vars: IndexSet<Variable> = IndexSet::new();
        for arm in arms {
            entry_vars.extend(self.demands[arm.id].reads.iter().copied());
        }
        for variable in &exit_vars {
            if !arms.iter().all(|arm| self.demands[arm.id].writes.contains(variable)) {
                entry_vars.insert(*variable);
            }
        }

        let gamma = self.graph.create_gamma(region, predicate, arms.len())?;
        let mut arm_vmaps: Vec<VariableMap> = vec![VariableMap::default(); arms.len()];
        for variable in &entry_vars {
            let origin = self.lookup_or_undef(region, vmap, *variable);
            let ev = self.graph.gamma_add_entryvar(gamma, origin);
            for (arm_vmap, argument) in arm_vmaps.iter_mut().zip(&ev.arguments) {
                arm_vmap.insert(*variable, *argument);
            }
        }

        for (index, arm) in arms.iter().enumerate() {
            let subregion = self.graph.node_subregion(gamma, index);
            self.predicate_stack.push(predicate, index);
            let mut arm_vmap = arm_vmaps[index].clone();
            self.construct(arm, subregion, &mut arm_vmap, &exit_vars)?;
            arm_vmaps[index] = arm_vmap;
            self.predicate_stack.pop();
        }

        for variable in &exit_vars {
            let origins: SmallVec<[Output; 2]> = arm_vmaps
                .iter()
                .map(|arm_vmap| {
                    arm_vmap.lookup(*variable).expect(
                        "entry variables cover every exit variable an arm does not define",
                    )
                })
                .collect();
            let xv = self.graph.gamma_add_exitvar(gamma, &origins);
            vmap.insert(*variable, xv.output);
        }
        Ok(())
    }

    fn construct_loop(
        &mut self,
        node: &AggNode,
        region: Region,
        vmap: &mut VariableMap,
        live_out: &IndexSet<Variable>,
    ) -> Result<(), FrontendError> {
        let body = node.child(0);

        // Loop variables carry everything the body reads, plus everything
        // it may write that is still needed afterwards.
        let mut loop_vars: IndexSet<Variable> = self.demands[body.id].reads.clone();
        for variable in &self.demands[body.id].may_writes {
            if live_out.contains(variable) {
                loop_vars.insert(*variable);
            }
        }

        let theta = self.graph.create_theta(region);
        let mut env = ThetaEnv::new(theta);
        let mut body_vmap = VariableMap::default();
        for variable in &loop_vars {
            let origin = self.lookup_or_undef(region, vmap, *variable);
            let lv = self.graph.theta_add_loopvar(theta, origin);
            body_vmap.insert(*variable, lv.argument);
            env.loopvars.insert(*variable, lv);
        }
        self.theta_stack.push(env);

        let subregion = self.graph.theta_subregion(theta);
        self.construct(body, subregion, &mut body_vmap, &loop_vars)?;

        let env = self.theta_stack.pop().expect("theta stack is balanced");
        for (variable, lv) in &env.loopvars {
            if let Some(origin) = body_vmap.lookup(*variable) {
                self.graph.divert_input_origin(lv.result, origin);
            }
        }
        let (predicate, _) = self.predicate_stack.pop().ok_or_else(|| {
            FrontendError::MalformedCfg {
                reason: "loop body has no terminating branch".to_string(),
            }
        })?;
        self.graph.theta_set_predicate(theta, predicate);

        for (variable, lv) in &env.loopvars {
            vmap.insert(*variable, lv.output);
        }
        Ok(())
    }
}

/// Module-level symbol bindings: function and global names resolved to the
/// outputs (lambda, phi, delta, or import) visible in the surrounding
/// region.
#[derive(Debug, Default, Clone)]
pub struct SymbolMap {
    map: IndexMap<String, Output>,
}

impl SymbolMap {
    pub fn insert(&mut self, name: impl Into<String>, output: Output) {
        self.map.insert(name.into(), output);
    }

    pub fn lookup(&self, name: &str) -> Option<Output> {
        self.map.get(name).copied()
    }
}

/// Converts one function definition into a lambda in `target_region`.
///
/// The CFG is restructured in place, aggregated, annotated, and then walked
/// by a [FunctionBuilder]; io-state and memory-state arrive and leave as
/// the final two arguments and results.
pub fn convert_function(
    graph: &mut Graph,
    target_region: Region,
    function: &mut Function,
    symbols: &SymbolMap,
) -> Result<Output, FrontendError> {
    let name = function.name.clone();
    let cfg = function.cfg.as_mut().ok_or_else(|| FrontendError::MalformedCfg {
        reason: format!("function `{name}` has no body to convert"),
    })?;

    log::debug!(target: "construct", "converting function `{name}`");
    restructure(cfg)?;
    let tree = aggregate(cfg)?;
    let demands = annotate(cfg, &tree);

    let lambda = graph.create_lambda(target_region, name.clone(), function.ty.clone(), function.linkage);
    let mut vmap = VariableMap::default();
    for (variable, data) in cfg.variables.iter() {
        if data.kind == VariableKind::Symbol {
            let origin = symbols.lookup(&data.name).ok_or_else(|| {
                FrontendError::UndefinedSymbol {
                    name: data.name.clone(),
                }
            })?;
            let argument = graph.lambda_add_ctxvar(lambda, origin);
            vmap.insert(variable, argument);
        }
    }
    let entry_arguments = graph.lambda_add_function_arguments(lambda);

    let mut builder = FunctionBuilder {
        graph: &mut *graph,
        cfg,
        demands: &demands,
        function_name: &name,
        entry_arguments,
        predicate_stack: PredicateStack::default(),
        theta_stack: ThetaStack::default(),
        results: Vec::new(),
    };
    let body_region = builder.graph.lambda_subregion(lambda);
    builder.construct(&tree, body_region, &mut vmap, &IndexSet::new())?;
    debug_assert!(builder.predicate_stack.is_empty(), "unbalanced predicate stack");

    let results = std::mem::take(&mut builder.results);
    if results.len() != function.ty.num_results() {
        return Err(FrontendError::MalformedCfg {
            reason: format!(
                "function `{name}` produced {} results for {} signature results",
                results.len(),
                function.ty.num_results()
            ),
        });
    }
    Ok(graph.lambda_finalize(lambda, &results))
}

/// Converts a straight-line TAC sequence (a global initializer)
fn convert_initializer(
    graph: &mut Graph,
    region: Region,
    variables: &VariableTable,
    tacs: &[Tac],
    vmap: &mut VariableMap,
) -> Result<(), FrontendError> {
    for tac in tacs {
        match &tac.operation {
            Operation::Assignment(_) => {
                let origin = vmap.lookup(tac.operands[0]).ok_or_else(|| {
                    FrontendError::MalformedCfg {
                        reason: "initializer operand used before definition".to_string(),
                    }
                })?;
                vmap.insert(tac.results[0], origin);
            }
            operation => {
                let operands = tac
                    .operands
                    .iter()
                    .map(|operand| {
                        vmap.lookup(*operand).ok_or_else(|| FrontendError::MalformedCfg {
                            reason: format!(
                                "initializer operand `{}` used before definition",
                                variables.name(*operand)
                            ),
                        })
                    })
                    .collect::<Result<SmallVec<[Output; 4]>, _>>()?;
                let outputs =
                    graph.add_simple_node_normalized(region, operation.clone(), &operands)?;
                for (variable, output) in tac.results.iter().zip(outputs) {
                    vmap.insert(*variable, output);
                }
            }
        }
    }
    Ok(())
}

/// Converts a whole module: globals become deltas, functions lambdas, and
/// mutually-recursive function groups phis, with call-graph SCCs processed
/// callees-first.
pub fn convert_module(
    mut module: Module,
    skip_unsupported_functions: bool,
) -> Result<RvsdgModule, FrontendError> {
    let mut rvsdg = RvsdgModule::new(module.source_filename.clone());
    rvsdg.target_triple = module.target_triple.clone();
    rvsdg.data_layout = module.data_layout.clone();
    let graph = &mut rvsdg.graph;
    let root = graph.root();

    let mut symbols = SymbolMap::default();

    for global in &module.globals {
        let output = match global.result {
            Some(result) => {
                let delta = graph.create_delta(
                    root,
                    global.name.clone(),
                    global.value_type.clone(),
                    global.linkage,
                    global.constant,
                );
                let mut vmap = VariableMap::default();
                for (variable, data) in global.variables.iter() {
                    if data.kind == VariableKind::Symbol {
                        let origin = symbols.lookup(&data.name).ok_or_else(|| {
                            FrontendError::UndefinedSymbol {
                                name: data.name.clone(),
                            }
                        })?;
                        let argument = graph.delta_add_ctxvar(delta, origin);
                        vmap.insert(variable, argument);
                    }
                }
                let subregion = graph.delta_subregion(delta);
                convert_initializer(
                    graph,
                    subregion,
                    &global.variables,
                    &global.initializer,
                    &mut vmap,
                )?;
                let origin = vmap.lookup(result).ok_or_else(|| FrontendError::MalformedCfg {
                    reason: format!("global `{}` initializer defines no result", global.name),
                })?;
                graph.delta_finalize(delta, origin)
            }
            None => graph.import(Type::Ptr, global.name.clone()),
        };
        symbols.insert(global.name.clone(), output);
    }

    // Declarations are imports; definitions are converted callees-first by
    // call-graph component.
    let mut defined: Vec<usize> = Vec::new();
    for (index, function) in module.functions.iter().enumerate() {
        if function.cfg.is_some() {
            defined.push(index);
        } else {
            let output =
                graph.import(Type::Function(function.ty.clone()), function.name.clone());
            symbols.insert(function.name.clone(), output);
        }
    }

    let mut callgraph: DiGraphMap<u32, ()> = DiGraphMap::new();
    for index in &defined {
        callgraph.add_node(*index as u32);
    }
    for index in &defined {
        let function = &module.functions[*index];
        let cfg = function.cfg.as_ref().unwrap();
        for (_, data) in cfg.variables.iter() {
            if data.kind != VariableKind::Symbol {
                continue;
            }
            if let Some(callee) = module
                .functions
                .iter()
                .position(|candidate| candidate.name == data.name && candidate.cfg.is_some())
            {
                callgraph.add_edge(*index as u32, callee as u32, ());
            }
        }
    }

    // Tarjan yields components in reverse topological order: every callee
    // component comes before its callers.
    let mut skipped: IndexSet<String> = IndexSet::new();
    let components = petgraph::algo::tarjan_scc(&callgraph);
    for component in components {
        let is_recursive = component.len() > 1
            || callgraph.contains_edge(component[0], component[0]);
        if !is_recursive {
            let index = component[0] as usize;
            let name = module.functions[index].name.clone();
            match convert_function(graph, root, &mut module.functions[index], &symbols) {
                Ok(output) => symbols.insert(name, output),
                Err(error @ FrontendError::Unsupported { .. }) if skip_unsupported_functions => {
                    log::warn!(target: "construct", "skipping function `{name}`: {error}");
                    let ty = module.functions[index].ty.clone();
                    let output = graph.import(Type::Function(ty), name.clone());
                    skipped.insert(name.clone());
                    symbols.insert(name, output);
                }
                Err(error) => return Err(error),
            }
            continue;
        }

        // A mutually-recursive group: bind every member through a phi
        // recursion variable, import everything else the group references
        // as phi context variables, and tie the knot at the end.
        let mut members: Vec<usize> = component.iter().map(|index| *index as usize).collect();
        members.sort();
        let member_names: IndexSet<String> =
            members.iter().map(|index| module.functions[*index].name.clone()).collect();

        let phi = graph.create_phi(root);
        let mut inner_symbols = SymbolMap::default();
        for index in &members {
            let function = &module.functions[*index];
            let argument = graph.phi_add_recvar(phi, Type::Function(function.ty.clone()));
            inner_symbols.insert(function.name.clone(), argument);
        }
        let mut externals: IndexSet<String> = IndexSet::new();
        for index in &members {
            let cfg = module.functions[*index].cfg.as_ref().unwrap();
            for (_, data) in cfg.variables.iter() {
                if data.kind == VariableKind::Symbol && !member_names.contains(&data.name) {
                    externals.insert(data.name.clone());
                }
            }
        }
        for name in &externals {
            let origin = symbols.lookup(name).ok_or_else(|| FrontendError::UndefinedSymbol {
                name: name.clone(),
            })?;
            let argument = graph.phi_add_ctxvar(phi, origin);
            inner_symbols.insert(name.clone(), argument);
        }

        let subregion = graph.phi_subregion(phi);
        let mut definitions = Vec::with_capacity(members.len());
        for index in &members {
            let output =
                convert_function(graph, subregion, &mut module.functions[*index], &inner_symbols)?;
            definitions.push(output);
        }
        let outputs = graph.phi_finalize(phi, &definitions);
        for (index, output) in members.iter().zip(outputs) {
            symbols.insert(module.functions[*index].name.clone(), output);
        }
    }

    // Externally visible definitions are the graph's exports.
    for global in &module.globals {
        if global.linkage == Linkage::External && global.result.is_some() {
            let output = symbols.lookup(&global.name).unwrap();
            graph.export(output, global.name.clone());
        }
    }
    for function in &module.functions {
        if function.linkage == Linkage::External
            && function.cfg.is_some()
            && !skipped.contains(&function.name)
        {
            if let Some(output) = symbols.lookup(&function.name) {
                graph.export(output, function.name.clone());
            }
        }
    }

    Ok(rvsdg)
}
