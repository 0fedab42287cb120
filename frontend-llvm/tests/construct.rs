use std::sync::Arc;

use loomc_frontend_llvm::{cfg::Cfg, convert_module, Function, GlobalVariable, Module};
use loomc_rvsdg::{
    BitBinaryKind, BitCompareKind, BitValue, Graph, Linkage, Node, NodeKind, Operation, Region,
    StructuralKind,
};
use loomc_rvsdg::types::{FunctionType, Type};

fn i32_fnty() -> Arc<FunctionType> {
    Arc::new(FunctionType::new(
        [Type::Bits(32), Type::IoState, Type::MemState],
        [Type::Bits(32), Type::IoState, Type::MemState],
    ))
}

/// Adds the standard argument/result variables (value, io, mem) to `cfg`
fn state_threaded_signature(cfg: &mut Cfg) -> loomc_frontend_llvm::cfg::Variable {
    let x = cfg.variables.create(Type::Bits(32), "x");
    let io = cfg.variables.create(Type::IoState, "io");
    let mem = cfg.variables.create(Type::MemState, "mem");
    cfg.arguments.extend([x, io, mem]);
    x
}

fn find_structural(graph: &Graph, region: Region, pred: impl Fn(&StructuralKind) -> bool + Copy) -> Option<Node> {
    for node in graph.region_nodes(region) {
        if let NodeKind::Structural(kind) = graph.node_kind(node) {
            if pred(kind) {
                return Some(node);
            }
            for subregion in graph.node_subregions(node) {
                if let Some(found) = find_structural(graph, *subregion, pred) {
                    return Some(found);
                }
            }
        }
    }
    None
}

#[test]
fn if_then_else_becomes_a_gamma() {
    let mut cfg = Cfg::new();
    let x = state_threaded_signature(&mut cfg);
    let io = cfg.arguments[1];
    let mem = cfg.arguments[2];
    let r = cfg.variables.create(Type::Bits(32), "r");
    let p = cfg.variables.create(Type::Bits(1), "p");
    let ctl = cfg.variables.create(Type::Ctl(2), "ctl");
    let zero = cfg.variables.create(Type::Bits(32), "zero");
    cfg.results.extend([r, io, mem]);

    let split = cfg.create_basic_block();
    cfg.append(split, Operation::BitConstant(BitValue::new(32, 0)), vec![], vec![zero]);
    cfg.append(
        split,
        Operation::BitCompare {
            kind: BitCompareKind::Slt,
            width: 32,
        },
        vec![x, zero],
        vec![p],
    );
    cfg.append(
        split,
        Operation::Match {
            nbits: 1,
            mapping: vec![(0, 0)],
            default_alternative: 1,
            nalternatives: 2,
        },
        vec![p],
        vec![ctl],
    );
    cfg.append(split, Operation::Branch { nalternatives: 2 }, vec![ctl], vec![]);

    let then = cfg.create_basic_block();
    cfg.append(then, Operation::BitConstant(BitValue::new(32, 1)), vec![], vec![r]);
    let els = cfg.create_basic_block();
    cfg.append(els, Operation::BitConstant(BitValue::new(32, 2)), vec![], vec![r]);
    let join = cfg.create_basic_block();

    cfg.add_edge(cfg.entry(), split, 0);
    cfg.add_edge(split, then, 0);
    cfg.add_edge(split, els, 1);
    cfg.add_edge(then, join, 0);
    cfg.add_edge(els, join, 0);
    cfg.add_edge(join, cfg.exit(), 0);

    let module = {
        let mut module = Module::new("ifelse.ll");
        module.functions.push(Function {
            name: "select_constant".to_string(),
            ty: i32_fnty(),
            linkage: Linkage::External,
            cfg: Some(cfg),
        });
        module
    };

    let rvsdg = convert_module(module, false).unwrap();
    let graph = &rvsdg.graph;
    graph.assert_consistency();

    let lambda = find_structural(graph, graph.root(), |kind| {
        matches!(kind, StructuralKind::Lambda(_))
    })
    .expect("module must contain a lambda");
    let body = graph.lambda_subregion(lambda);

    let gamma = find_structural(graph, body, |kind| matches!(kind, StructuralKind::Gamma))
        .expect("branch must lower to a gamma");
    assert_eq!(graph.node_subregions(gamma).len(), 2);
    assert_eq!(graph.gamma_num_exitvars(gamma), 1);

    // The first lambda result reads the gamma's exit variable.
    let result = graph.region_result(body, 0);
    assert_eq!(graph.producer(graph.input_origin(result)), Some(gamma));
}

#[test]
fn tail_controlled_loop_becomes_a_theta() {
    let mut cfg = Cfg::new();
    let i = state_threaded_signature(&mut cfg);
    let io = cfg.arguments[1];
    let mem = cfg.arguments[2];
    let one = cfg.variables.create(Type::Bits(32), "one");
    let zero = cfg.variables.create(Type::Bits(32), "zero");
    let next = cfg.variables.create(Type::Bits(32), "next");
    let again = cfg.variables.create(Type::Bits(1), "again");
    let ctl = cfg.variables.create(Type::Ctl(2), "ctl");
    cfg.results.extend([i, io, mem]);

    let body = cfg.create_basic_block();
    cfg.append(body, Operation::BitConstant(BitValue::new(32, 1)), vec![], vec![one]);
    cfg.append(
        body,
        Operation::BitBinary {
            kind: BitBinaryKind::Sub,
            width: 32,
        },
        vec![i, one],
        vec![next],
    );
    cfg.append(body, Operation::Assignment(Type::Bits(32)), vec![next], vec![i]);
    cfg.append(body, Operation::BitConstant(BitValue::new(32, 0)), vec![], vec![zero]);
    cfg.append(
        body,
        Operation::BitCompare {
            kind: BitCompareKind::Ne,
            width: 32,
        },
        vec![i, zero],
        vec![again],
    );
    cfg.append(
        body,
        Operation::Match {
            nbits: 1,
            mapping: vec![(0, 0)],
            default_alternative: 1,
            nalternatives: 2,
        },
        vec![again],
        vec![ctl],
    );
    cfg.append(body, Operation::Branch { nalternatives: 2 }, vec![ctl], vec![]);

    cfg.add_edge(cfg.entry(), body, 0);
    cfg.add_edge(body, cfg.exit(), 0);
    cfg.add_edge(body, body, 1);

    let mut module = Module::new("loop.ll");
    module.functions.push(Function {
        name: "count_down".to_string(),
        ty: i32_fnty(),
        linkage: Linkage::External,
        cfg: Some(cfg),
    });

    let rvsdg = convert_module(module, false).unwrap();
    let graph = &rvsdg.graph;
    graph.assert_consistency();

    let theta = find_structural(graph, graph.root(), |kind| matches!(kind, StructuralKind::Theta))
        .expect("loop must lower to a theta");

    // `i` is loop-carried; its post-result differs from its pre-argument.
    assert!(graph.theta_num_loopvars(theta) >= 1);
    let carried = (0..graph.theta_num_loopvars(theta)).any(|index| {
        let lv = graph.theta_loopvar(theta, index);
        graph.input_origin(lv.result) != lv.argument
    });
    assert!(carried, "at least one loop variable must be rewritten by the body");

    // The predicate is wired to the comparison's match.
    let predicate = graph.theta_predicate(theta);
    let producer = graph.producer(graph.input_origin(predicate)).expect("predicate has a producer");
    assert!(matches!(graph.node_operation(producer), Operation::Match { .. }));
}

#[test]
fn self_recursion_becomes_a_phi() {
    let fnty = i32_fnty();
    let mut cfg = Cfg::new();
    let x = state_threaded_signature(&mut cfg);
    let io = cfg.arguments[1];
    let mem = cfg.arguments[2];
    let callee = cfg.variables.create_symbol_ref(Type::Function(fnty.clone()), "rec");
    let r = cfg.variables.create(Type::Bits(32), "r");
    let io2 = cfg.variables.create(Type::IoState, "io2");
    let mem2 = cfg.variables.create(Type::MemState, "mem2");
    cfg.results.extend([r, io2, mem2]);

    let bb = cfg.create_basic_block();
    cfg.append(
        bb,
        Operation::Call(fnty.clone()),
        vec![callee, x, io, mem],
        vec![r, io2, mem2],
    );
    cfg.add_edge(cfg.entry(), bb, 0);
    cfg.add_edge(bb, cfg.exit(), 0);

    let mut module = Module::new("rec.ll");
    module.functions.push(Function {
        name: "rec".to_string(),
        ty: fnty,
        linkage: Linkage::External,
        cfg: Some(cfg),
    });

    let rvsdg = convert_module(module, false).unwrap();
    let graph = &rvsdg.graph;
    graph.assert_consistency();

    let phi = find_structural(graph, graph.root(), |kind| matches!(kind, StructuralKind::Phi { .. }))
        .expect("self recursion must lower to a phi");
    assert_eq!(graph.phi_num_recvars(phi), 1);

    let lambda = find_structural(graph, graph.phi_subregion(phi), |kind| {
        matches!(kind, StructuralKind::Lambda(_))
    })
    .expect("the recursive definition lives inside the phi");
    let body = graph.lambda_subregion(lambda);
    let call = graph
        .region_nodes(body)
        .find(|node| {
            graph.is_simple_node(*node)
                && matches!(graph.node_operation(*node), Operation::Call(_))
        })
        .expect("the body calls through the recursion variable");
    let _ = call;
}

#[test]
fn global_initializer_becomes_a_delta() {
    let mut module = Module::new("global.ll");
    let mut variables = loomc_frontend_llvm::cfg::VariableTable::new();
    let value = variables.create(Type::Bits(32), "value");
    module.globals.push(GlobalVariable {
        name: "answer".to_string(),
        value_type: Type::Bits(32),
        linkage: Linkage::External,
        constant: true,
        initializer: vec![loomc_frontend_llvm::cfg::Tac::new(
            Operation::BitConstant(BitValue::new(32, 42)),
            vec![],
            vec![value],
        )],
        result: Some(value),
        variables,
    });

    let rvsdg = convert_module(module, false).unwrap();
    let graph = &rvsdg.graph;
    graph.assert_consistency();

    let delta = find_structural(graph, graph.root(), |kind| matches!(kind, StructuralKind::Delta(_)))
        .expect("global must lower to a delta");
    assert_eq!(graph.region_num_nodes(graph.delta_subregion(delta)), 1);
    // The delta's address is exported under the global's name.
    let exported = graph
        .region_results(graph.root())
        .iter()
        .any(|result| graph.producer(graph.input_origin(*result)) == Some(delta));
    assert!(exported);
}

#[test]
fn state_edges_are_the_final_results() {
    let mut cfg = Cfg::new();
    let x = state_threaded_signature(&mut cfg);
    let io = cfg.arguments[1];
    let mem = cfg.arguments[2];
    cfg.results.extend([x, io, mem]);

    let bb = cfg.create_basic_block();
    cfg.add_edge(cfg.entry(), bb, 0);
    cfg.add_edge(bb, cfg.exit(), 0);

    let mut module = Module::new("id.ll");
    module.functions.push(Function {
        name: "identity".to_string(),
        ty: i32_fnty(),
        linkage: Linkage::External,
        cfg: Some(cfg),
    });

    let rvsdg = convert_module(module, false).unwrap();
    let graph = &rvsdg.graph;
    let lambda = find_structural(graph, graph.root(), |kind| {
        matches!(kind, StructuralKind::Lambda(_))
    })
    .unwrap();
    let body = graph.lambda_subregion(lambda);
    let results = graph.region_results(body);
    assert_eq!(results.len(), 3);
    assert_eq!(graph.input_type(results[1]), &Type::IoState);
    assert_eq!(graph.input_type(results[2]), &Type::MemState);
}
