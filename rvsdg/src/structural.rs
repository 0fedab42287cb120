use std::sync::Arc;

use loomc_rvsdg_type::{FunctionType, Type};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{Graph, GraphError, Input, Node, NodeKind, Operation, Output, Region};

/// How a function or global participates in linking
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
}

#[derive(Debug, Clone)]
pub struct LambdaData {
    pub name: String,
    pub ty: Arc<FunctionType>,
    pub linkage: Linkage,
    /// Number of leading context-variable inputs/arguments; function
    /// arguments follow them in the subregion argument list.
    pub nctxvars: usize,
    /// Set once the function arguments have been materialized; context
    /// variables may no longer be added afterwards.
    pub arguments_built: bool,
}

#[derive(Debug, Clone)]
pub struct DeltaData {
    pub name: String,
    pub ty: Type,
    pub linkage: Linkage,
    pub constant: bool,
}

/// The variant of a structural node.
///
/// Structural nodes own their subregions; their inputs and outputs come in
/// bundles that pair node ports with subregion arguments/results, and all
/// bundle bookkeeping goes through the helpers below so the pairing is
/// consistent in every subregion.
#[derive(Debug)]
pub enum StructuralKind {
    /// Selection: N subregions, one chosen per evaluation by the predicate
    Gamma,
    /// Tail-controlled iteration: one subregion, repeated while the
    /// predicate result selects alternative 1.
    Theta,
    /// Function abstraction
    Lambda(LambdaData),
    /// Mutually-recursive bindings
    Phi { nrecvars: usize, finalized: bool },
    /// A global whose subregion computes the initial value
    Delta(DeltaData),
}

/// An entry variable of a gamma: one node input fanning into one argument
/// per subregion.
#[derive(Debug, Clone)]
pub struct EntryVar {
    pub input: Input,
    pub arguments: SmallVec<[Output; 2]>,
}

/// An exit variable of a gamma: one result per subregion selecting the
/// value exposed by the node output.
#[derive(Debug, Clone)]
pub struct ExitVar {
    pub results: SmallVec<[Input; 2]>,
    pub output: Output,
}

/// A loop variable of a theta: the pre-argument is the value on loop entry
/// and the target of the previous iteration's post-result.
#[derive(Debug, Copy, Clone)]
pub struct LoopVar {
    pub input: Input,
    pub argument: Output,
    pub result: Input,
    pub output: Output,
}

impl Graph {
    // --- gamma -------------------------------------------------------------

    /// Creates a gamma node with `nsubregions` empty subregions, selected by
    /// `predicate`, which must be of type `ctl(nsubregions)`.
    pub fn create_gamma(
        &mut self,
        region: Region,
        predicate: Output,
        nsubregions: usize,
    ) -> Result<Node, GraphError> {
        assert!(nsubregions >= 2, "gamma requires at least two subregions");
        let expected = Type::Ctl(nsubregions);
        let actual = self.output_type(predicate).clone();
        if actual != expected {
            return Err(GraphError::TypeMismatch { expected, actual });
        }
        let node = self.new_node(region, NodeKind::Structural(StructuralKind::Gamma));
        self.new_node_input(node, predicate, expected);
        for index in 0..nsubregions {
            let subregion = self.new_region(node, index);
            self.node_data_mut(node).subregions.push(subregion);
        }
        self.recompute_depth(node);
        Ok(node)
    }

    pub fn is_gamma(&self, node: Node) -> bool {
        matches!(
            self.node_kind(node),
            NodeKind::Structural(StructuralKind::Gamma)
        )
    }

    /// The predicate input of a gamma or the predicate result of a theta
    /// subregion does not move; for gammas it is always input 0.
    pub fn gamma_predicate(&self, gamma: Node) -> Input {
        debug_assert!(self.is_gamma(gamma));
        self.node_input(gamma, 0)
    }

    pub fn gamma_num_entryvars(&self, gamma: Node) -> usize {
        debug_assert!(self.is_gamma(gamma));
        self.node_inputs(gamma).len() - 1
    }

    pub fn gamma_num_exitvars(&self, gamma: Node) -> usize {
        debug_assert!(self.is_gamma(gamma));
        self.node_outputs(gamma).len()
    }

    /// Routes `origin` into every subregion of the gamma, creating one new
    /// argument per subregion. The entry variable's input at node index `i`
    /// corresponds to argument index `i - 1` in each subregion.
    pub fn gamma_add_entryvar(&mut self, gamma: Node, origin: Output) -> EntryVar {
        debug_assert!(self.is_gamma(gamma));
        let ty = self.output_type(origin).clone();
        let input = self.new_node_input(gamma, origin, ty.clone());
        let subregions: SmallVec<[Region; 2]> =
            self.node_subregions(gamma).iter().copied().collect();
        let arguments = subregions
            .into_iter()
            .map(|subregion| self.new_region_argument(subregion, ty.clone()))
            .collect();
        self.recompute_depth(gamma);
        EntryVar { input, arguments }
    }

    /// The entry variable whose input sits at node-input index `index`
    pub fn gamma_entryvar(&self, gamma: Node, index: usize) -> EntryVar {
        debug_assert!(self.is_gamma(gamma));
        assert!(index >= 1, "input 0 is the gamma predicate");
        let input = self.node_input(gamma, index);
        let arguments = self
            .node_subregions(gamma)
            .iter()
            .map(|subregion| self.region_argument(*subregion, index - 1))
            .collect();
        EntryVar { input, arguments }
    }

    /// Selects one value per subregion and exposes it as a fresh output.
    /// The output at node index `o` corresponds to result index `o` in each
    /// subregion.
    pub fn gamma_add_exitvar(&mut self, gamma: Node, origins: &[Output]) -> ExitVar {
        debug_assert!(self.is_gamma(gamma));
        let subregions: SmallVec<[Region; 2]> =
            self.node_subregions(gamma).iter().copied().collect();
        assert_eq!(
            origins.len(),
            subregions.len(),
            "one exit value per subregion required"
        );
        let ty = self.output_type(origins[0]).clone();
        let results = subregions
            .iter()
            .zip(origins)
            .map(|(subregion, origin)| {
                assert_eq!(self.output_type(*origin), &ty, "exit variable type mismatch");
                self.new_region_result(*subregion, *origin)
            })
            .collect();
        let output = self.new_node_output(gamma, ty);
        ExitVar { results, output }
    }

    pub fn gamma_exitvar(&self, gamma: Node, index: usize) -> ExitVar {
        debug_assert!(self.is_gamma(gamma));
        let output = self.node_output(gamma, index);
        let results = self
            .node_subregions(gamma)
            .iter()
            .map(|subregion| self.region_result(*subregion, index))
            .collect();
        ExitVar { results, output }
    }

    /// Removes the entry variable at node-input `index` along with its
    /// subregion arguments, which must all be user-free.
    pub fn gamma_remove_entryvar(&mut self, gamma: Node, index: usize) {
        debug_assert!(self.is_gamma(gamma));
        assert!(index >= 1, "input 0 is the gamma predicate");
        for subregion in self.node_subregions(gamma).to_vec() {
            self.remove_region_argument(subregion, index - 1);
        }
        self.remove_node_input(gamma, index);
    }

    /// Removes the exit variable at output `index`; the output must be
    /// user-free.
    pub fn gamma_remove_exitvar(&mut self, gamma: Node, index: usize) {
        debug_assert!(self.is_gamma(gamma));
        for subregion in self.node_subregions(gamma).to_vec() {
            self.remove_region_result(subregion, index);
        }
        self.remove_node_output(gamma, index);
    }

    // --- theta -------------------------------------------------------------

    /// Creates a theta node with an empty body.
    ///
    /// The body's first result is the continuation predicate; it is seeded
    /// with a constant `ctl 0` (terminate) until [Graph::theta_set_predicate]
    /// wires the real one.
    pub fn create_theta(&mut self, region: Region) -> Node {
        let node = self.new_node(region, NodeKind::Structural(StructuralKind::Theta));
        let subregion = self.new_region(node, 0);
        self.node_data_mut(node).subregions.push(subregion);
        let seed = self
            .add_simple_node(
                subregion,
                Operation::CtlConstant {
                    value: 0,
                    nalternatives: 2,
                },
                &[],
            )
            .expect("constant construction cannot fail");
        let origin = self.node_output(seed, 0);
        self.new_region_result(subregion, origin);
        node
    }

    pub fn is_theta(&self, node: Node) -> bool {
        matches!(
            self.node_kind(node),
            NodeKind::Structural(StructuralKind::Theta)
        )
    }

    pub fn theta_subregion(&self, theta: Node) -> Region {
        debug_assert!(self.is_theta(theta));
        self.node_subregion(theta, 0)
    }

    /// The predicate result: the body repeats while it selects alternative 1
    pub fn theta_predicate(&self, theta: Node) -> Input {
        self.region_result(self.theta_subregion(theta), 0)
    }

    /// Wires the continuation predicate, dropping the seed constant if it
    /// has become dead.
    pub fn theta_set_predicate(&mut self, theta: Node, origin: Output) {
        let result = self.theta_predicate(theta);
        let old_origin = self.input_origin(result);
        self.divert_input_origin(result, origin);
        if let Some(producer) = self.producer(old_origin) {
            let is_seed = matches!(
                self.node_kind(producer),
                NodeKind::Simple(Operation::CtlConstant { .. })
            );
            if is_seed && self.node_outputs(producer).iter().all(|o| self.output_users(*o).is_empty())
            {
                self.remove_node(producer);
            }
        }
    }

    pub fn theta_num_loopvars(&self, theta: Node) -> usize {
        debug_assert!(self.is_theta(theta));
        self.node_inputs(theta).len()
    }

    /// Adds a loop variable: input `k` pairs with argument `k`, result
    /// `k + 1` (result 0 is the predicate) and output `k`. The post-result
    /// initially loops the value through unchanged.
    pub fn theta_add_loopvar(&mut self, theta: Node, origin: Output) -> LoopVar {
        debug_assert!(self.is_theta(theta));
        let subregion = self.theta_subregion(theta);
        let ty = self.output_type(origin).clone();
        let input = self.new_node_input(theta, origin, ty.clone());
        let argument = self.new_region_argument(subregion, ty.clone());
        let result = self.new_region_result(subregion, argument);
        let output = self.new_node_output(theta, ty);
        self.recompute_depth(theta);
        LoopVar {
            input,
            argument,
            result,
            output,
        }
    }

    /// The loop variable at index `k`
    pub fn theta_loopvar(&self, theta: Node, index: usize) -> LoopVar {
        debug_assert!(self.is_theta(theta));
        let subregion = self.theta_subregion(theta);
        LoopVar {
            input: self.node_input(theta, index),
            argument: self.region_argument(subregion, index),
            result: self.region_result(subregion, index + 1),
            output: self.node_output(theta, index),
        }
    }

    /// Removes the loop variable at `index`; its argument and output must be
    /// user-free.
    pub fn theta_remove_loopvar(&mut self, theta: Node, index: usize) {
        debug_assert!(self.is_theta(theta));
        let subregion = self.theta_subregion(theta);
        self.remove_region_result(subregion, index + 1);
        self.remove_region_argument(subregion, index);
        self.remove_node_output(theta, index);
        self.remove_node_input(theta, index);
    }

    // --- lambda ------------------------------------------------------------

    pub fn create_lambda(
        &mut self,
        region: Region,
        name: impl Into<String>,
        ty: Arc<FunctionType>,
        linkage: Linkage,
    ) -> Node {
        let node = self.new_node(
            region,
            NodeKind::Structural(StructuralKind::Lambda(LambdaData {
                name: name.into(),
                ty,
                linkage,
                nctxvars: 0,
                arguments_built: false,
            })),
        );
        let subregion = self.new_region(node, 0);
        self.node_data_mut(node).subregions.push(subregion);
        node
    }

    pub fn is_lambda(&self, node: Node) -> bool {
        matches!(
            self.node_kind(node),
            NodeKind::Structural(StructuralKind::Lambda(_))
        )
    }

    pub fn lambda_data(&self, lambda: Node) -> &LambdaData {
        match self.node_kind(lambda) {
            NodeKind::Structural(StructuralKind::Lambda(data)) => data,
            _ => panic!("node is not a lambda"),
        }
    }

    fn lambda_data_mut(&mut self, lambda: Node) -> &mut LambdaData {
        match &mut self.node_data_mut(lambda).kind {
            NodeKind::Structural(StructuralKind::Lambda(data)) => data,
            _ => panic!("node is not a lambda"),
        }
    }

    pub fn lambda_subregion(&self, lambda: Node) -> Region {
        debug_assert!(self.is_lambda(lambda));
        self.node_subregion(lambda, 0)
    }

    /// Imports an outer value into the function body. Context variables must
    /// all be added before the function arguments are materialized, so that
    /// function arguments always follow them in the argument list.
    pub fn lambda_add_ctxvar(&mut self, lambda: Node, origin: Output) -> Output {
        assert!(
            !self.lambda_data(lambda).arguments_built,
            "context variables must precede function arguments"
        );
        let subregion = self.lambda_subregion(lambda);
        let ty = self.output_type(origin).clone();
        self.new_node_input(lambda, origin, ty.clone());
        let argument = self.new_region_argument(subregion, ty);
        self.lambda_data_mut(lambda).nctxvars += 1;
        self.recompute_depth(lambda);
        argument
    }

    /// Materializes the function arguments (including the trailing io-state
    /// and memory-state edges) as subregion arguments after the context
    /// variables; returns them in signature order.
    pub fn lambda_add_function_arguments(&mut self, lambda: Node) -> Vec<Output> {
        assert!(
            !self.lambda_data(lambda).arguments_built,
            "function arguments already built"
        );
        let subregion = self.lambda_subregion(lambda);
        let tys: Vec<Type> = self.lambda_data(lambda).ty.arguments().to_vec();
        let arguments = tys
            .into_iter()
            .map(|ty| self.new_region_argument(subregion, ty))
            .collect();
        self.lambda_data_mut(lambda).arguments_built = true;
        arguments
    }

    /// The function argument at `index`, skipping context variables
    pub fn lambda_function_argument(&self, lambda: Node, index: usize) -> Output {
        let data = self.lambda_data(lambda);
        assert!(data.arguments_built, "function arguments not yet built");
        self.region_argument(self.lambda_subregion(lambda), data.nctxvars + index)
    }

    /// Removes the context variable at `index`; its argument must be
    /// user-free.
    pub fn lambda_remove_ctxvar(&mut self, lambda: Node, index: usize) {
        assert!(index < self.lambda_data(lambda).nctxvars, "not a context variable");
        let subregion = self.lambda_subregion(lambda);
        self.remove_region_argument(subregion, index);
        self.remove_node_input(lambda, index);
        self.lambda_data_mut(lambda).nctxvars -= 1;
    }

    /// Sets the function results and creates the lambda's single output, of
    /// the lambda's function type.
    pub fn lambda_finalize(&mut self, lambda: Node, results: &[Output]) -> Output {
        let data = self.lambda_data(lambda);
        let ty = data.ty.clone();
        assert_eq!(
            results.len(),
            ty.num_results(),
            "result count mismatch in lambda finalization"
        );
        let subregion = self.lambda_subregion(lambda);
        for (origin, expected) in results.iter().zip(ty.results()) {
            assert_eq!(self.output_type(*origin), expected, "lambda result type mismatch");
            self.new_region_result(subregion, *origin);
        }
        self.new_node_output(lambda, Type::Function(ty))
    }

    /// The single output of a finalized lambda
    pub fn lambda_output(&self, lambda: Node) -> Output {
        debug_assert!(self.is_lambda(lambda));
        self.node_output(lambda, 0)
    }

    // --- phi ---------------------------------------------------------------

    /// Creates a phi node for a group of mutually-recursive bindings
    pub fn create_phi(&mut self, region: Region) -> Node {
        let node = self.new_node(
            region,
            NodeKind::Structural(StructuralKind::Phi {
                nrecvars: 0,
                finalized: false,
            }),
        );
        let subregion = self.new_region(node, 0);
        self.node_data_mut(node).subregions.push(subregion);
        node
    }

    pub fn is_phi(&self, node: Node) -> bool {
        matches!(
            self.node_kind(node),
            NodeKind::Structural(StructuralKind::Phi { .. })
        )
    }

    pub fn phi_subregion(&self, phi: Node) -> Region {
        debug_assert!(self.is_phi(phi));
        self.node_subregion(phi, 0)
    }

    pub fn phi_num_recvars(&self, phi: Node) -> usize {
        match self.node_kind(phi) {
            NodeKind::Structural(StructuralKind::Phi { nrecvars, .. }) => *nrecvars,
            _ => panic!("node is not a phi"),
        }
    }

    /// Declares a recursion variable of the given type; its argument stands
    /// for the binding inside the subregion until finalization ties the
    /// knot. Recursion variables must be declared before context variables.
    pub fn phi_add_recvar(&mut self, phi: Node, ty: Type) -> Output {
        let finalized = match self.node_kind(phi) {
            NodeKind::Structural(StructuralKind::Phi { finalized, .. }) => *finalized,
            _ => panic!("node is not a phi"),
        };
        assert!(!finalized, "phi already finalized");
        assert_eq!(
            self.node_inputs(phi).len(),
            0,
            "recursion variables must precede context variables"
        );
        let subregion = self.phi_subregion(phi);
        let argument = self.new_region_argument(subregion, ty);
        match &mut self.node_data_mut(phi).kind {
            NodeKind::Structural(StructuralKind::Phi { nrecvars, .. }) => *nrecvars += 1,
            _ => unreachable!(),
        }
        argument
    }

    /// Imports an outer value into the phi subregion
    pub fn phi_add_ctxvar(&mut self, phi: Node, origin: Output) -> Output {
        debug_assert!(self.is_phi(phi));
        let subregion = self.phi_subregion(phi);
        let ty = self.output_type(origin).clone();
        self.new_node_input(phi, origin, ty.clone());
        let argument = self.new_region_argument(subregion, ty);
        self.recompute_depth(phi);
        argument
    }

    /// Ties the recursive knot: `origins[k]` becomes the definition of
    /// recursion variable `k`, and one node output per recursion variable is
    /// created in declaration order.
    pub fn phi_finalize(&mut self, phi: Node, origins: &[Output]) -> Vec<Output> {
        let nrecvars = self.phi_num_recvars(phi);
        assert_eq!(origins.len(), nrecvars, "one definition per recursion variable");
        let subregion = self.phi_subregion(phi);
        let mut outputs = Vec::with_capacity(nrecvars);
        for (index, origin) in origins.iter().enumerate() {
            let expected = self.output_type(self.region_argument(subregion, index)).clone();
            let actual = self.output_type(*origin).clone();
            assert_eq!(actual, expected, "recursion variable type mismatch");
            self.new_region_result(subregion, *origin);
            outputs.push(self.new_node_output(phi, expected));
        }
        match &mut self.node_data_mut(phi).kind {
            NodeKind::Structural(StructuralKind::Phi { finalized, .. }) => *finalized = true,
            _ => unreachable!(),
        }
        outputs
    }

    // --- delta -------------------------------------------------------------

    pub fn create_delta(
        &mut self,
        region: Region,
        name: impl Into<String>,
        ty: Type,
        linkage: Linkage,
        constant: bool,
    ) -> Node {
        let node = self.new_node(
            region,
            NodeKind::Structural(StructuralKind::Delta(DeltaData {
                name: name.into(),
                ty,
                linkage,
                constant,
            })),
        );
        let subregion = self.new_region(node, 0);
        self.node_data_mut(node).subregions.push(subregion);
        node
    }

    pub fn is_delta(&self, node: Node) -> bool {
        matches!(
            self.node_kind(node),
            NodeKind::Structural(StructuralKind::Delta(_))
        )
    }

    pub fn delta_subregion(&self, delta: Node) -> Region {
        debug_assert!(self.is_delta(delta));
        self.node_subregion(delta, 0)
    }

    pub fn delta_add_ctxvar(&mut self, delta: Node, origin: Output) -> Output {
        debug_assert!(self.is_delta(delta));
        let subregion = self.delta_subregion(delta);
        let ty = self.output_type(origin).clone();
        self.new_node_input(delta, origin, ty.clone());
        let argument = self.new_region_argument(subregion, ty);
        self.recompute_depth(delta);
        argument
    }

    /// Sets the initializer result; the delta's output is the address of the
    /// global, of pointer type.
    pub fn delta_finalize(&mut self, delta: Node, origin: Output) -> Output {
        let subregion = self.delta_subregion(delta);
        self.new_region_result(subregion, origin);
        self.new_node_output(delta, Type::Ptr)
    }
}

/// Maps outputs of an original subgraph to outputs of its copy.
///
/// Lookups fall through to the queried output itself, which makes origins
/// in enclosing regions (still valid at the copy's location) transparent.
#[derive(Debug, Default)]
pub struct SubstitutionMap {
    outputs: FxHashMap<Output, Output>,
}

impl SubstitutionMap {
    pub fn insert(&mut self, original: Output, replacement: Output) {
        self.outputs.insert(original, replacement);
    }

    pub fn lookup(&self, original: Output) -> Output {
        self.outputs.get(&original).copied().unwrap_or(original)
    }
}

impl Graph {
    /// Copies a simple node into `target_region` with explicit operands,
    /// which must match the operation signature.
    pub fn copy_simple_node(
        &mut self,
        node: Node,
        target_region: Region,
        operands: &[Output],
    ) -> Result<Node, GraphError> {
        let op = self.node_operation(node).clone();
        self.add_simple_node(target_region, op, operands)
    }

    /// Copies any node into `target_region`, resolving operands through
    /// `subst` and recording the copied outputs in it.
    pub fn copy_node(
        &mut self,
        node: Node,
        target_region: Region,
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let operands: SmallVec<[Output; 4]> = self
            .node_inputs(node)
            .iter()
            .map(|input| subst.lookup(self.input_origin(*input)))
            .collect();
        let copy = match self.node_kind(node) {
            NodeKind::Simple(op) => {
                let op = op.clone();
                self.add_simple_node(target_region, op, &operands)?
            }
            NodeKind::Structural(StructuralKind::Gamma) => {
                self.copy_gamma(node, target_region, &operands, subst)?
            }
            NodeKind::Structural(StructuralKind::Theta) => {
                self.copy_theta(node, target_region, &operands, subst)?
            }
            NodeKind::Structural(StructuralKind::Lambda(data)) => {
                let data = data.clone();
                self.copy_lambda(node, target_region, &data, &operands, subst)?
            }
            NodeKind::Structural(StructuralKind::Phi { .. }) => {
                self.copy_phi(node, target_region, &operands, subst)?
            }
            NodeKind::Structural(StructuralKind::Delta(data)) => {
                let data = data.clone();
                self.copy_delta(node, target_region, &data, &operands, subst)?
            }
        };
        for (original, copied) in
            self.node_outputs(node).to_vec().iter().zip(self.node_outputs(copy).to_vec())
        {
            subst.insert(*original, copied);
        }
        Ok(copy)
    }

    /// Copies every node of `src` into `dst` in producer-before-consumer
    /// order; `subst` must already map `src`'s arguments.
    pub fn copy_region_contents(
        &mut self,
        src: Region,
        dst: Region,
        subst: &mut SubstitutionMap,
    ) -> Result<(), GraphError> {
        let order = crate::traverser::topdown_order(self, src);
        for node in order {
            self.copy_node(node, dst, subst)?;
        }
        Ok(())
    }

    fn copy_gamma(
        &mut self,
        node: Node,
        target_region: Region,
        operands: &[Output],
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let nsubregions = self.node_subregions(node).len();
        let copy = self.create_gamma(target_region, operands[0], nsubregions)?;
        for (index, operand) in operands.iter().enumerate().skip(1) {
            let ev = self.gamma_add_entryvar(copy, *operand);
            let original = self.gamma_entryvar(node, index);
            for (orig_arg, new_arg) in original.arguments.iter().zip(ev.arguments.iter()) {
                subst.insert(*orig_arg, *new_arg);
            }
        }
        for index in 0..nsubregions {
            let src = self.node_subregion(node, index);
            let dst = self.node_subregion(copy, index);
            self.copy_region_contents(src, dst, subst)?;
        }
        for index in 0..self.gamma_num_exitvars(node) {
            let original = self.gamma_exitvar(node, index);
            let origins: SmallVec<[Output; 2]> = original
                .results
                .iter()
                .map(|result| subst.lookup(self.input_origin(*result)))
                .collect();
            self.gamma_add_exitvar(copy, &origins);
        }
        Ok(copy)
    }

    fn copy_theta(
        &mut self,
        node: Node,
        target_region: Region,
        operands: &[Output],
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let copy = self.create_theta(target_region);
        for (index, operand) in operands.iter().enumerate() {
            let lv = self.theta_add_loopvar(copy, *operand);
            let original = self.theta_loopvar(node, index);
            subst.insert(original.argument, lv.argument);
        }
        let src = self.theta_subregion(node);
        let dst = self.theta_subregion(copy);
        self.copy_region_contents(src, dst, subst)?;
        for index in 0..self.theta_num_loopvars(node) {
            let original = self.theta_loopvar(node, index);
            let origin = subst.lookup(self.input_origin(original.result));
            let lv = self.theta_loopvar(copy, index);
            self.divert_input_origin(lv.result, origin);
        }
        let predicate = subst.lookup(self.input_origin(self.theta_predicate(node)));
        self.theta_set_predicate(copy, predicate);
        Ok(copy)
    }

    fn copy_lambda(
        &mut self,
        node: Node,
        target_region: Region,
        data: &LambdaData,
        operands: &[Output],
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let copy = self.create_lambda(target_region, data.name.clone(), data.ty.clone(), data.linkage);
        let src_subregion = self.lambda_subregion(node);
        for (index, operand) in operands.iter().enumerate() {
            let argument = self.lambda_add_ctxvar(copy, *operand);
            let original = self.region_argument(src_subregion, index);
            subst.insert(original, argument);
        }
        let arguments = self.lambda_add_function_arguments(copy);
        for (index, argument) in arguments.iter().enumerate() {
            let original = self.region_argument(src_subregion, data.nctxvars + index);
            subst.insert(original, *argument);
        }
        let dst_subregion = self.lambda_subregion(copy);
        self.copy_region_contents(src_subregion, dst_subregion, subst)?;
        let results: SmallVec<[Output; 4]> = self
            .region_results(src_subregion)
            .to_vec()
            .iter()
            .map(|result| subst.lookup(self.input_origin(*result)))
            .collect();
        self.lambda_finalize(copy, &results);
        Ok(copy)
    }

    fn copy_phi(
        &mut self,
        node: Node,
        target_region: Region,
        operands: &[Output],
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let copy = self.create_phi(target_region);
        let src_subregion = self.phi_subregion(node);
        let nrecvars = self.phi_num_recvars(node);
        for index in 0..nrecvars {
            let original = self.region_argument(src_subregion, index);
            let ty = self.output_type(original).clone();
            let argument = self.phi_add_recvar(copy, ty);
            subst.insert(original, argument);
        }
        for (index, operand) in operands.iter().enumerate() {
            let original = self.region_argument(src_subregion, nrecvars + index);
            let argument = self.phi_add_ctxvar(copy, *operand);
            subst.insert(original, argument);
        }
        let dst_subregion = self.phi_subregion(copy);
        self.copy_region_contents(src_subregion, dst_subregion, subst)?;
        let origins: SmallVec<[Output; 4]> = self
            .region_results(src_subregion)
            .to_vec()
            .iter()
            .map(|result| subst.lookup(self.input_origin(*result)))
            .collect();
        self.phi_finalize(copy, &origins);
        Ok(copy)
    }

    fn copy_delta(
        &mut self,
        node: Node,
        target_region: Region,
        data: &DeltaData,
        operands: &[Output],
        subst: &mut SubstitutionMap,
    ) -> Result<Node, GraphError> {
        let copy = self.create_delta(
            target_region,
            data.name.clone(),
            data.ty.clone(),
            data.linkage,
            data.constant,
        );
        let src_subregion = self.delta_subregion(node);
        for (index, operand) in operands.iter().enumerate() {
            let original = self.region_argument(src_subregion, index);
            let argument = self.delta_add_ctxvar(copy, *operand);
            subst.insert(original, argument);
        }
        let dst_subregion = self.delta_subregion(copy);
        self.copy_region_contents(src_subregion, dst_subregion, subst)?;
        let origin = subst.lookup(self.input_origin(self.region_result(src_subregion, 0)));
        self.delta_finalize(copy, origin);
        Ok(copy)
    }
}
