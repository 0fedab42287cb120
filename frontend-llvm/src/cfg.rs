use cranelift_entity::{entity_impl, PrimaryMap};
use loomc_rvsdg::Operation;
use loomc_rvsdg_type::Type;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::FxHashSet;

/// A named, typed variable of the pre-RVSDG IR
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(u32);
entity_impl!(Variable, "v");

/// A vertex of the control-flow graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgNode(u32);
entity_impl!(CfgNode, "bb");

/// A directed, index-carrying edge of the control-flow graph
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CfgEdge(u32);
entity_impl!(CfgEdge, "e");

/// How a variable binds at construction time
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// An ordinary local value
    Local,
    /// A reference to a module-level symbol (function or global) that the
    /// builder resolves through context variables.
    Symbol,
}

#[derive(Debug, Clone)]
pub struct VariableData {
    pub ty: Type,
    pub name: String,
    pub kind: VariableKind,
}

/// Variable storage shared by CFGs and global initializers
#[derive(Debug, Default, Clone)]
pub struct VariableTable {
    variables: PrimaryMap<Variable, VariableData>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, ty: Type, name: impl Into<String>) -> Variable {
        self.variables.push(VariableData {
            ty,
            name: name.into(),
            kind: VariableKind::Local,
        })
    }

    /// Registers a variable standing for the module-level symbol `name`
    pub fn create_symbol_ref(&mut self, ty: Type, name: impl Into<String>) -> Variable {
        self.variables.push(VariableData {
            ty,
            name: name.into(),
            kind: VariableKind::Symbol,
        })
    }

    pub fn ty(&self, variable: Variable) -> &Type {
        &self.variables[variable].ty
    }

    pub fn name(&self, variable: Variable) -> &str {
        &self.variables[variable].name
    }

    pub fn kind(&self, variable: Variable) -> VariableKind {
        self.variables[variable].kind
    }

    pub fn iter(&self) -> impl Iterator<Item = (Variable, &VariableData)> {
        self.variables.iter()
    }
}

/// A three-address code: one operation applied to operand variables,
/// binding result variables.
#[derive(Debug, Clone)]
pub struct Tac {
    pub operation: Operation,
    pub operands: Vec<Variable>,
    pub results: Vec<Variable>,
}

impl Tac {
    pub fn new(operation: Operation, operands: Vec<Variable>, results: Vec<Variable>) -> Self {
        Self {
            operation,
            operands,
            results,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct BasicBlock {
    pub tacs: Vec<Tac>,
}

#[derive(Debug)]
pub enum CfgNodeKind {
    Entry,
    Exit,
    Block(BasicBlock),
}

#[derive(Debug)]
struct CfgNodeData {
    kind: CfgNodeKind,
    out_edges: Vec<CfgEdge>,
    in_edges: Vec<CfgEdge>,
}

#[derive(Debug, Copy, Clone)]
pub struct CfgEdgeData {
    pub source: CfgNode,
    pub sink: CfgNode,
    /// The branch alternative this edge realizes; fall-through is 0
    pub index: usize,
}

/// A control-flow graph of basic blocks between distinguished entry and
/// exit nodes. Edges are entities so they can be diverted in place while
/// auxiliary data keyed by edge survives restructuring.
#[derive(Debug)]
pub struct Cfg {
    pub variables: VariableTable,
    nodes: PrimaryMap<CfgNode, CfgNodeData>,
    edges: PrimaryMap<CfgEdge, Option<CfgEdgeData>>,
    entry: CfgNode,
    exit: CfgNode,
    /// Function argument variables, bound at the entry node; the io-state
    /// and memory-state variables are the final two.
    pub arguments: Vec<Variable>,
    /// Function result variables, read at the exit node
    pub results: Vec<Variable>,
}

impl Default for Cfg {
    fn default() -> Self {
        Self::new()
    }
}

impl Cfg {
    pub fn new() -> Self {
        let mut nodes = PrimaryMap::new();
        let entry = nodes.push(CfgNodeData {
            kind: CfgNodeKind::Entry,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        });
        let exit = nodes.push(CfgNodeData {
            kind: CfgNodeKind::Exit,
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        });
        Self {
            variables: VariableTable::new(),
            nodes,
            edges: PrimaryMap::new(),
            entry,
            exit,
            arguments: Vec::new(),
            results: Vec::new(),
        }
    }

    #[inline]
    pub fn entry(&self) -> CfgNode {
        self.entry
    }

    #[inline]
    pub fn exit(&self) -> CfgNode {
        self.exit
    }

    pub fn create_basic_block(&mut self) -> CfgNode {
        self.nodes.push(CfgNodeData {
            kind: CfgNodeKind::Block(BasicBlock::default()),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
        })
    }

    pub fn node_kind(&self, node: CfgNode) -> &CfgNodeKind {
        &self.nodes[node].kind
    }

    pub fn is_block(&self, node: CfgNode) -> bool {
        matches!(self.nodes[node].kind, CfgNodeKind::Block(_))
    }

    pub fn block(&self, node: CfgNode) -> &BasicBlock {
        match &self.nodes[node].kind {
            CfgNodeKind::Block(block) => block,
            _ => panic!("{node} is not a basic block"),
        }
    }

    pub fn block_mut(&mut self, node: CfgNode) -> &mut BasicBlock {
        match &mut self.nodes[node].kind {
            CfgNodeKind::Block(block) => block,
            _ => panic!("{node} is not a basic block"),
        }
    }

    /// Appends a TAC to the block `node`
    pub fn append(
        &mut self,
        node: CfgNode,
        operation: Operation,
        operands: Vec<Variable>,
        results: Vec<Variable>,
    ) {
        self.block_mut(node).tacs.push(Tac::new(operation, operands, results));
    }

    pub fn iter_nodes(&self) -> impl Iterator<Item = CfgNode> + '_ {
        self.nodes.keys()
    }

    pub fn num_blocks(&self) -> usize {
        self.nodes.keys().filter(|node| self.is_block(*node)).count()
    }

    // --- edges -------------------------------------------------------------

    pub fn add_edge(&mut self, source: CfgNode, sink: CfgNode, index: usize) -> CfgEdge {
        let edge = self.edges.push(Some(CfgEdgeData {
            source,
            sink,
            index,
        }));
        self.nodes[source].out_edges.push(edge);
        self.nodes[sink].in_edges.push(edge);
        edge
    }

    pub fn edge(&self, edge: CfgEdge) -> CfgEdgeData {
        self.edges[edge].expect("edge was removed")
    }

    /// Retargets `edge` to a new sink, keeping its source and index
    pub fn divert_edge(&mut self, edge: CfgEdge, new_sink: CfgNode) {
        let data = self.edges[edge].as_mut().expect("edge was removed");
        let old_sink = data.sink;
        if old_sink == new_sink {
            return;
        }
        data.sink = new_sink;
        self.nodes[old_sink].in_edges.retain(|e| *e != edge);
        self.nodes[new_sink].in_edges.push(edge);
    }

    pub fn remove_edge(&mut self, edge: CfgEdge) {
        let data = self.edges[edge].take().expect("edge was removed");
        self.nodes[data.source].out_edges.retain(|e| *e != edge);
        self.nodes[data.sink].in_edges.retain(|e| *e != edge);
    }

    /// Out-edges of `node`, ordered by edge index
    pub fn out_edges(&self, node: CfgNode) -> Vec<CfgEdge> {
        let mut edges = self.nodes[node].out_edges.clone();
        edges.sort_by_key(|edge| self.edge(*edge).index);
        edges
    }

    pub fn in_edges(&self, node: CfgNode) -> Vec<CfgEdge> {
        self.nodes[node].in_edges.clone()
    }

    pub fn num_out_edges(&self, node: CfgNode) -> usize {
        self.nodes[node].out_edges.len()
    }

    pub fn num_in_edges(&self, node: CfgNode) -> usize {
        self.nodes[node].in_edges.len()
    }

    /// Retargets every in-edge of `node` to `new_sink`
    pub fn divert_in_edges(&mut self, node: CfgNode, new_sink: CfgNode) {
        for edge in self.in_edges(node) {
            self.divert_edge(edge, new_sink);
        }
    }

    // --- probes ------------------------------------------------------------

    /// True if entry and exit are properly terminal and every block has at
    /// least one in-edge and one out-edge.
    pub fn is_closed(&self) -> bool {
        self.nodes.keys().all(|node| {
            if node == self.entry {
                self.num_in_edges(node) == 0 && self.num_out_edges(node) >= 1
            } else if node == self.exit {
                self.num_out_edges(node) == 0 && self.num_in_edges(node) >= 1
            } else {
                self.num_in_edges(node) >= 1 && self.num_out_edges(node) >= 1
            }
        })
    }

    /// True if the graph has no cycle
    pub fn is_acyclic(&self) -> bool {
        self.cyclic_sccs().is_empty()
    }

    /// The node sets of all strongly-connected components containing a
    /// cycle: components with more than one node, or with a self edge.
    pub fn cyclic_sccs(&self) -> Vec<FxHashSet<CfgNode>> {
        let mut graph: DiGraphMap<u32, ()> = DiGraphMap::new();
        for node in self.nodes.keys() {
            graph.add_node(node.as_u32());
        }
        for slot in self.edges.values() {
            if let Some(edge) = slot {
                graph.add_edge(edge.source.as_u32(), edge.sink.as_u32(), ());
            }
        }
        petgraph::algo::tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || graph.contains_edge(scc[0], scc[0])
            })
            .map(|scc| scc.into_iter().map(CfgNode::from_u32).collect())
            .collect()
    }
}
