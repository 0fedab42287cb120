//! The Regionalized Value-State Dependence Graph: a hierarchical data-flow
//! IR in which all control constructs are structural nodes owning nested
//! regions, and side effects are sequentialized through explicit state
//! edges.

pub mod binary;
mod graph;
mod module;
mod normal_form;
mod operation;
mod structural;
pub mod traverser;
mod tracker;
mod view;

pub use loomc_rvsdg_type as types;

pub use self::{
    binary::{BinaryFlags, FlattenedReduction, ReductionPath},
    graph::{
        Graph, GraphError, GraphEvent, Input, InputOwner, Node, NodeKind, Output, OutputOwner,
        Region,
    },
    module::RvsdgModule,
    normal_form::{NormalFormFlags, NormalFormRegistry, OperationClass},
    operation::{
        BitBinaryKind, BitCompareKind, BitValue, CastKind, FpBinaryKind, FpCompareKind, Operation,
        PtrCompareKind,
    },
    structural::{
        DeltaData, EntryVar, ExitVar, LambdaData, Linkage, LoopVar, StructuralKind,
        SubstitutionMap,
    },
    tracker::Tracker,
    traverser::TopDownTraverser,
    view::view,
};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use loomc_rvsdg_type::{FunctionType, Type};
    use pretty_assertions::assert_eq;

    use super::*;

    fn add_op() -> Operation {
        Operation::BitBinary {
            kind: BitBinaryKind::Add,
            width: 32,
        }
    }

    #[test]
    fn user_sets_follow_diverts() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let a = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let b = graph.add_simple_node(root, add_op(), &[x, y]).unwrap();
        let a_out = graph.node_output(a, 0);
        let b_out = graph.node_output(b, 0);
        let c = graph.add_simple_node(root, add_op(), &[a_out, a_out]).unwrap();
        graph.export(graph.node_output(c, 0), "c");

        assert_eq!(graph.output_users(a_out).len(), 2);
        graph.divert_users(a_out, b_out);
        assert_eq!(graph.output_users(a_out).len(), 0);
        assert_eq!(graph.output_users(b_out).len(), 2);
        graph.assert_consistency();

        graph.remove_node(a);
        graph.assert_consistency();
    }

    #[test]
    fn depth_is_maintained() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let a = graph.add_simple_node(root, add_op(), &[x, x]).unwrap();
        let a_out = graph.node_output(a, 0);
        let b = graph.add_simple_node(root, add_op(), &[a_out, x]).unwrap();
        let b_out = graph.node_output(b, 0);
        let c = graph.add_simple_node(root, add_op(), &[b_out, b_out]).unwrap();

        assert_eq!(graph.node_depth(a), 0);
        assert_eq!(graph.node_depth(b), 1);
        assert_eq!(graph.node_depth(c), 2);

        // Rewiring c's inputs to x collapses its depth.
        for input in graph.node_inputs(c).to_vec() {
            graph.divert_input_origin(input, x);
        }
        assert_eq!(graph.node_depth(c), 0);
        graph.assert_consistency();
    }

    #[test]
    fn operand_type_mismatch_is_rejected() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(16), "x");
        let root = graph.root();
        let err = graph.add_simple_node(root, add_op(), &[x, x]).unwrap_err();
        assert!(matches!(err, GraphError::OperandTypeMismatch { index: 0, .. }));
    }

    #[test]
    fn gamma_port_bundles() {
        let mut graph = Graph::new();
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let y = graph.import(Type::Bits(32), "y");
        let root = graph.root();

        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev_x = graph.gamma_add_entryvar(gamma, x);
        let ev_y = graph.gamma_add_entryvar(gamma, y);
        let xv = graph.gamma_add_exitvar(gamma, &[ev_x.arguments[0], ev_y.arguments[1]]);
        graph.export(xv.output, "out");

        assert_eq!(graph.gamma_num_entryvars(gamma), 2);
        assert_eq!(graph.gamma_num_exitvars(gamma), 1);
        // Input index i pairs with argument index i - 1 in every subregion.
        let ev = graph.gamma_entryvar(gamma, 1);
        assert_eq!(ev.input, ev_x.input);
        assert_eq!(ev.arguments, ev_x.arguments);
        graph.assert_consistency();
    }

    #[test]
    fn theta_loop_variables() {
        let mut graph = Graph::new();
        let x = graph.import(Type::Bits(32), "x");
        let c = graph.import(Type::Ctl(2), "c");
        let root = graph.root();

        let theta = graph.create_theta(root);
        let lv_c = graph.theta_add_loopvar(theta, c);
        let lv_x = graph.theta_add_loopvar(theta, x);
        let body = graph.theta_subregion(theta);

        let next = graph.add_simple_node(body, add_op(), &[lv_x.argument, lv_x.argument]).unwrap();
        graph.divert_input_origin(lv_x.result, graph.node_output(next, 0));
        graph.theta_set_predicate(theta, lv_c.argument);
        graph.export(lv_x.output, "x");

        // The predicate seed constant was removed once rewired.
        assert_eq!(graph.region_num_nodes(body), 1);
        let lv = graph.theta_loopvar(theta, 1);
        assert_eq!(lv.output, lv_x.output);
        graph.assert_consistency();
    }

    #[test]
    fn lambda_shape() {
        let mut graph = Graph::new();
        let root = graph.root();
        let ty = Arc::new(FunctionType::new(
            [Type::Bits(32), Type::IoState, Type::MemState],
            [Type::Bits(32), Type::IoState, Type::MemState],
        ));
        let outer = graph.import(Type::Bits(32), "g");

        let lambda = graph.create_lambda(root, "f", ty, Linkage::External);
        let ctx = graph.lambda_add_ctxvar(lambda, outer);
        let arguments = graph.lambda_add_function_arguments(lambda);
        let body = graph.lambda_subregion(lambda);
        let sum = graph.add_simple_node(body, add_op(), &[ctx, arguments[0]]).unwrap();
        let f = graph.lambda_finalize(
            lambda,
            &[graph.node_output(sum, 0), arguments[1], arguments[2]],
        );
        graph.export(f, "f");

        assert_eq!(graph.lambda_function_argument(lambda, 0), arguments[0]);
        assert!(graph.output_type(f).is_function());
        graph.assert_consistency();
    }

    #[test]
    fn copy_preserves_structure() {
        let mut graph = Graph::new();
        let c = graph.import(Type::Ctl(2), "c");
        let x = graph.import(Type::Bits(32), "x");
        let root = graph.root();

        let gamma = graph.create_gamma(root, c, 2).unwrap();
        let ev = graph.gamma_add_entryvar(gamma, x);
        let double =
            graph.add_simple_node(
                graph.node_subregion(gamma, 0),
                add_op(),
                &[ev.arguments[0], ev.arguments[0]],
            )
            .unwrap();
        let xv = graph
            .gamma_add_exitvar(gamma, &[graph.node_output(double, 0), ev.arguments[1]]);
        graph.export(xv.output, "out");

        let mut subst = SubstitutionMap::default();
        let copy = graph.copy_node(gamma, root, &mut subst).unwrap();
        graph.export(graph.node_output(copy, 0), "copy");

        assert!(graph.is_gamma(copy));
        assert_eq!(graph.gamma_num_entryvars(copy), 1);
        assert_eq!(graph.gamma_num_exitvars(copy), 1);
        assert_eq!(graph.region_num_nodes(graph.node_subregion(copy, 0)), 1);
        graph.assert_consistency();
    }

    #[test]
    fn phi_ties_the_recursive_knot() {
        let mut graph = Graph::new();
        let root = graph.root();
        let ty = Arc::new(FunctionType::new(
            [Type::Bits(32), Type::IoState, Type::MemState],
            [Type::Bits(32), Type::IoState, Type::MemState],
        ));

        let phi = graph.create_phi(root);
        let rec = graph.phi_add_recvar(phi, Type::Function(ty.clone()));
        let subregion = graph.phi_subregion(phi);

        let lambda = graph.create_lambda(subregion, "fac", ty.clone(), Linkage::External);
        // The recursive reference is a context variable reading the
        // recursion variable's argument.
        let self_ref = graph.lambda_add_ctxvar(lambda, rec);
        let arguments = graph.lambda_add_function_arguments(lambda);
        let _ = self_ref;
        let f = graph.lambda_finalize(lambda, &[arguments[0], arguments[1], arguments[2]]);

        let outputs = graph.phi_finalize(phi, &[f]);
        graph.export(outputs[0], "fac");
        graph.assert_consistency();
    }
}
