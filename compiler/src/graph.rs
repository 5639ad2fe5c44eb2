// graph.rs — Hierarchical compute-graph IR: nodes, ports, and mutation primitives
//
// All graphs and nodes of a model live in one arena (`ModelGraph`). Parent
// relations are plain handles, so a subgraph never owns its parent and the
// root graph transitively owns the whole tree through the arena.
//
// Preconditions: none (constructed empty or by load.rs).
// Postconditions: every mutation keeps the port tables consistent in both
//                 directions (an input has at most one producer; an output's
//                 consumer list mirrors the inputs pointing at it).
// Failure modes: stale handles, out-of-range ports, double-connected inputs,
//                cross-graph edges → `GraphError`.
// Side effects: none.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Well-known operator type names.
pub mod op_types {
    pub const DATA: &str = "Data";
    pub const CONST: &str = "Const";
    pub const CONSTANT: &str = "Constant";
    pub const NET_OUTPUT: &str = "NetOutput";
    pub const STREAM_SWITCH_N: &str = "StreamSwitchN";
    pub const STREAM_MERGE: &str = "StreamMerge";
    pub const IF: &str = "If";
    pub const WHILE: &str = "While";
    pub const CASE: &str = "Case";
    pub const PARTITIONED_CALL: &str = "PartitionedCall";
    pub const MEMCPY_ADDR_ASYNC: &str = "MemcpyAddrAsync";
}

/// Well-known attribute keys.
pub mod attr_names {
    /// Input position on the hosting container node (formal-input nodes).
    pub const PARENT_NODE_INDEX: &str = "_parent_node_index";
    /// `false` on a partitioned call whose subgraph shapes are static.
    pub const IS_UNKNOWN_SHAPE: &str = "_is_unknown_shape";
    /// Marks the node adjacent to a graph input for downstream scheduling.
    pub const NODE_CONNECT_INPUT: &str = "_node_connect_input";
    /// Present on formal inputs backed by a persistent variable.
    pub const REF_VAR_SRC_VAR_NAME: &str = "ref_var_src_var_name";
    /// Per-input flag list: producer is a constant.
    pub const IS_INPUT_CONST: &str = "is_input_const";
}

/// Stream id of a node that has not been through stream assignment.
pub const UNASSIGNED_STREAM: i64 = -1;

// ── Handles ─────────────────────────────────────────────────────────────────

/// Handle of a compute graph in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphId(pub u32);

/// Handle of a node in the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An output port: the producing side of a data edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPort {
    pub node: NodeId,
    pub index: u32,
}

/// An input port: the consuming side of a data edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InPort {
    pub node: NodeId,
    pub index: u32,
}

impl OutPort {
    pub fn new(node: NodeId, index: u32) -> Self {
        OutPort { node, index }
    }
}

impl InPort {
    pub fn new(node: NodeId, index: u32) -> Self {
        InPort { node, index }
    }
}

/// Upstream compile stages whose results the passes here consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    StreamAssign,
    MemOffsetAssign,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::StreamAssign => write!(f, "stream assignment"),
            Stage::MemOffsetAssign => write!(f, "memory offset assignment"),
        }
    }
}

// ── Descriptors ─────────────────────────────────────────────────────────────

/// An attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Bools(Vec<bool>),
    Ints(Vec<i64>),
}

/// Tensor metadata attached to one port.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TensorDesc {
    #[serde(default)]
    pub shape: Vec<i64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub dtype: String,
    /// Byte offset assigned by memory-offset assignment.
    #[serde(default, rename = "offset")]
    pub data_offset: i64,
}

impl TensorDesc {
    pub fn new(shape: Vec<i64>) -> Self {
        TensorDesc {
            shape,
            ..Default::default()
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.data_offset = offset;
        self
    }

    /// A tensor with any zero-sized dimension holds no data.
    pub fn has_zero_dim(&self) -> bool {
        self.shape.contains(&0)
    }
}

/// Operator descriptor: identity, port metadata, attributes, stream affinity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpDesc {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<TensorDesc>,
    pub outputs: Vec<TensorDesc>,
    pub attrs: BTreeMap<String, AttrValue>,
    pub stream_id: i64,
}

impl OpDesc {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        OpDesc {
            name: name.into(),
            op_type: op_type.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            attrs: BTreeMap::new(),
            stream_id: UNASSIGNED_STREAM,
        }
    }

    pub fn with_input(mut self, desc: TensorDesc) -> Self {
        self.inputs.push(desc);
        self
    }

    pub fn with_output(mut self, desc: TensorDesc) -> Self {
        self.outputs.push(desc);
        self
    }

    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn with_stream(mut self, stream_id: i64) -> Self {
        self.stream_id = stream_id;
        self
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.attrs.get(key) {
            Some(AttrValue::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn set_attr(&mut self, key: &str, value: AttrValue) {
        self.attrs.insert(key.to_string(), value);
    }
}

// ── Nodes and graphs ────────────────────────────────────────────────────────

/// A node in the arena. Port tables are private so only `ModelGraph`
/// mutations can change connectivity.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub desc: OpDesc,
    pub owner: GraphId,
    in_peers: Vec<Option<OutPort>>,
    out_peers: Vec<Vec<InPort>>,
    subgraphs: Vec<GraphId>,
}

impl Node {
    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub fn op_type(&self) -> &str {
        &self.desc.op_type
    }

    pub fn is_type(&self, op_type: &str) -> bool {
        self.desc.op_type == op_type
    }

    pub fn in_count(&self) -> u32 {
        self.in_peers.len() as u32
    }

    pub fn out_count(&self) -> u32 {
        self.out_peers.len() as u32
    }

    /// Subgraphs owned by this (container) node, in registration order.
    pub fn subgraphs(&self) -> &[GraphId] {
        &self.subgraphs
    }
}

/// One graph of the hierarchy: an ordered node list plus parent handles.
#[derive(Debug, Clone)]
pub struct ComputeGraph {
    pub id: GraphId,
    pub name: String,
    nodes: Vec<NodeId>,
    parent_node: Option<NodeId>,
    parent_graph: Option<GraphId>,
}

impl ComputeGraph {
    /// Direct nodes of this graph in schedule order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn parent_node(&self) -> Option<NodeId> {
        self.parent_node
    }

    pub fn parent_graph(&self) -> Option<GraphId> {
        self.parent_graph
    }
}

// ── Arena ───────────────────────────────────────────────────────────────────

/// Arena of every graph and node of one model. Graph 0 is the root.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    graphs: Vec<ComputeGraph>,
    nodes: Vec<Node>,
    stages: BTreeSet<Stage>,
}

/// Three edge operations that replace one edge; validated as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRewire {
    pub remove: (OutPort, InPort),
    pub add: Vec<(OutPort, InPort)>,
}

impl ModelGraph {
    pub fn new(root_name: impl Into<String>) -> Self {
        ModelGraph {
            graphs: vec![ComputeGraph {
                id: GraphId(0),
                name: root_name.into(),
                nodes: Vec::new(),
                parent_node: None,
                parent_graph: None,
            }],
            nodes: Vec::new(),
            stages: BTreeSet::new(),
        }
    }

    pub fn root(&self) -> GraphId {
        GraphId(0)
    }

    pub fn graph(&self, id: GraphId) -> Result<&ComputeGraph, GraphError> {
        self.graphs
            .get(id.0 as usize)
            .ok_or(GraphError::GraphNotFound(id))
    }

    fn graph_mut(&mut self, id: GraphId) -> Result<&mut ComputeGraph, GraphError> {
        self.graphs
            .get_mut(id.0 as usize)
            .ok_or(GraphError::GraphNotFound(id))
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, GraphError> {
        self.nodes
            .get(id.0 as usize)
            .ok_or(GraphError::NodeNotFound(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GraphError> {
        self.nodes
            .get_mut(id.0 as usize)
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Mutable access to a node's descriptor. Port counts are fixed at
    /// creation; callers must not add or remove port descriptors.
    pub fn desc_mut(&mut self, id: NodeId) -> Result<&mut OpDesc, GraphError> {
        Ok(&mut self.node_mut(id)?.desc)
    }

    pub fn graphs(&self) -> impl Iterator<Item = &ComputeGraph> {
        self.graphs.iter()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn graph_count(&self) -> usize {
        self.graphs.len()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.in_peers.iter().filter(|p| p.is_some()).count())
            .sum()
    }

    pub fn mark_stage(&mut self, stage: Stage) {
        self.stages.insert(stage);
    }

    pub fn has_stage(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.stages.iter().copied()
    }

    // ── Construction ────────────────────────────────────────────────────────

    /// Create a subgraph owned by container node `parent`.
    pub fn add_subgraph(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
    ) -> Result<GraphId, GraphError> {
        let parent_graph = self.node(parent)?.owner;
        let id = GraphId(self.graphs.len() as u32);
        self.graphs.push(ComputeGraph {
            id,
            name: name.into(),
            nodes: Vec::new(),
            parent_node: Some(parent),
            parent_graph: Some(parent_graph),
        });
        self.node_mut(parent)?.subgraphs.push(id);
        Ok(id)
    }

    fn alloc_node(&mut self, graph: GraphId, desc: OpDesc) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let in_peers = vec![None; desc.inputs.len()];
        let out_peers = vec![Vec::new(); desc.outputs.len()];
        self.nodes.push(Node {
            id,
            desc,
            owner: graph,
            in_peers,
            out_peers,
            subgraphs: Vec::new(),
        });
        id
    }

    /// Append a node to the end of `graph`'s node order.
    pub fn add_node(&mut self, graph: GraphId, desc: OpDesc) -> Result<NodeId, GraphError> {
        self.graph(graph)?;
        let id = self.alloc_node(graph, desc);
        self.graph_mut(graph)?.nodes.push(id);
        Ok(id)
    }

    /// Insert a node immediately after `after` in `graph`'s node order.
    /// Fails without side effects if `after` is not a node of `graph`.
    pub fn add_node_after(
        &mut self,
        graph: GraphId,
        desc: OpDesc,
        after: NodeId,
    ) -> Result<NodeId, GraphError> {
        let g = self.graph(graph)?;
        let pos = match g.nodes.iter().position(|&n| n == after) {
            Some(pos) => pos,
            None => {
                let anchor = self
                    .node(after)
                    .map(|n| n.name().to_string())
                    .unwrap_or_else(|_| format!("{:?}", after));
                return Err(GraphError::AnchorNotInGraph {
                    anchor,
                    graph: g.name.clone(),
                });
            }
        };
        let id = self.alloc_node(graph, desc);
        self.graph_mut(graph)?.nodes.insert(pos + 1, id);
        Ok(id)
    }

    // ── Edges ───────────────────────────────────────────────────────────────

    fn out_label(&self, port: OutPort) -> String {
        match self.node(port.node) {
            Ok(n) => format!("{}:{}", n.name(), port.index),
            Err(_) => format!("{:?}:{}", port.node, port.index),
        }
    }

    fn in_label(&self, port: InPort) -> String {
        match self.node(port.node) {
            Ok(n) => format!("{}:{}", n.name(), port.index),
            Err(_) => format!("{:?}:{}", port.node, port.index),
        }
    }

    fn check_out_port(&self, port: OutPort) -> Result<&Node, GraphError> {
        let node = self.node(port.node)?;
        if port.index >= node.out_count() {
            return Err(GraphError::PortOutOfRange {
                node: node.name().to_string(),
                direction: "output",
                index: port.index,
            });
        }
        Ok(node)
    }

    fn check_in_port(&self, port: InPort) -> Result<&Node, GraphError> {
        let node = self.node(port.node)?;
        if port.index >= node.in_count() {
            return Err(GraphError::PortOutOfRange {
                node: node.name().to_string(),
                direction: "input",
                index: port.index,
            });
        }
        Ok(node)
    }

    /// Validate an edge addition without performing it. `freed` names an
    /// input whose current producer is about to be removed.
    fn check_add_edge(
        &self,
        src: OutPort,
        dst: InPort,
        freed: Option<InPort>,
    ) -> Result<(), GraphError> {
        let src_node = self.check_out_port(src)?;
        let dst_node = self.check_in_port(dst)?;
        if src_node.owner != dst_node.owner {
            return Err(GraphError::CrossGraphEdge {
                src: self.out_label(src),
                dst: self.in_label(dst),
            });
        }
        if dst_node.in_peers[dst.index as usize].is_some() && freed != Some(dst) {
            return Err(GraphError::InputAlreadyConnected {
                node: dst_node.name().to_string(),
                index: dst.index,
            });
        }
        Ok(())
    }

    /// Succeeds iff `src` currently feeds `dst`.
    pub fn check_edge(&self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        self.check_out_port(src)?;
        let dst_node = self.check_in_port(dst)?;
        if dst_node.in_peers[dst.index as usize] != Some(src) {
            return Err(GraphError::EdgeNotFound {
                src: self.out_label(src),
                dst: self.in_label(dst),
            });
        }
        Ok(())
    }

    /// Connect `src` to `dst`. The input must be free and both ports must
    /// belong to the same graph.
    pub fn add_edge(&mut self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        self.check_add_edge(src, dst, None)?;
        self.node_mut(dst.node)?.in_peers[dst.index as usize] = Some(src);
        self.node_mut(src.node)?.out_peers[src.index as usize].push(dst);
        Ok(())
    }

    /// Disconnect `src` from `dst`, leaving both ports valid and free.
    pub fn remove_edge(&mut self, src: OutPort, dst: InPort) -> Result<(), GraphError> {
        self.check_edge(src, dst)?;
        self.node_mut(dst.node)?.in_peers[dst.index as usize] = None;
        self.node_mut(src.node)?.out_peers[src.index as usize].retain(|p| *p != dst);
        Ok(())
    }

    /// Validate every step of `rewire` against the graph as it will be after
    /// the preceding steps. Nothing is mutated.
    pub fn check_rewire(&self, rewire: &EdgeRewire) -> Result<(), GraphError> {
        let (old_src, old_dst) = rewire.remove;
        self.check_edge(old_src, old_dst)?;
        let mut taken: HashSet<InPort> = HashSet::new();
        for &(src, dst) in &rewire.add {
            self.check_add_edge(src, dst, Some(old_dst))?;
            if !taken.insert(dst) {
                return Err(GraphError::InputAlreadyConnected {
                    node: self.node(dst.node)?.name().to_string(),
                    index: dst.index,
                });
            }
        }
        Ok(())
    }

    /// Apply `rewire` all-or-nothing: if validation fails the graph is untouched.
    pub fn apply_rewire(&mut self, rewire: &EdgeRewire) -> Result<(), GraphError> {
        self.check_rewire(rewire)?;
        let (old_src, old_dst) = rewire.remove;
        self.remove_edge(old_src, old_dst)?;
        for &(src, dst) in &rewire.add {
            self.add_edge(src, dst)?;
        }
        Ok(())
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Producer of an input port, if connected.
    pub fn peer_out(&self, dst: InPort) -> Result<Option<OutPort>, GraphError> {
        let node = self.check_in_port(dst)?;
        Ok(node.in_peers[dst.index as usize])
    }

    /// Consumers of an output port.
    pub fn peer_ins(&self, src: OutPort) -> Result<&[InPort], GraphError> {
        let node = self.check_out_port(src)?;
        Ok(&node.out_peers[src.index as usize])
    }

    /// The node feeding input `index` of `node`, if connected.
    pub fn in_data_node(&self, node: NodeId, index: u32) -> Result<Option<NodeId>, GraphError> {
        Ok(self.peer_out(InPort::new(node, index))?.map(|p| p.node))
    }

    pub fn in_ports(&self, node: NodeId) -> Result<Vec<InPort>, GraphError> {
        let n = self.node(node)?;
        Ok((0..n.in_count()).map(|i| InPort::new(node, i)).collect())
    }

    pub fn output_desc(&self, port: OutPort) -> Result<&TensorDesc, GraphError> {
        let node = self.check_out_port(port)?;
        node.desc
            .outputs
            .get(port.index as usize)
            .ok_or_else(|| GraphError::PortOutOfRange {
                node: node.name().to_string(),
                direction: "output",
                index: port.index,
            })
    }

    pub fn input_desc_mut(&mut self, port: InPort) -> Result<&mut TensorDesc, GraphError> {
        let name = self.check_in_port(port)?.name().to_string();
        let node = self.node_mut(port.node)?;
        node.desc
            .inputs
            .get_mut(port.index as usize)
            .ok_or(GraphError::PortOutOfRange {
                node: name,
                direction: "input",
                index: port.index,
            })
    }

    /// Every node of `graph` and of all graphs nested below it. Each node is
    /// followed by the nodes of the subgraphs it owns.
    pub fn all_nodes(&self, graph: GraphId) -> Result<Vec<NodeId>, GraphError> {
        let mut out = Vec::new();
        self.collect_nodes(graph, &mut out)?;
        Ok(out)
    }

    fn collect_nodes(&self, graph: GraphId, out: &mut Vec<NodeId>) -> Result<(), GraphError> {
        for &id in &self.graph(graph)?.nodes {
            out.push(id);
            for &sub in &self.node(id)?.subgraphs {
                self.collect_nodes(sub, out)?;
            }
        }
        Ok(())
    }

    pub fn find_node(&self, graph: GraphId, name: &str) -> Option<NodeId> {
        let g = self.graph(graph).ok()?;
        g.nodes
            .iter()
            .copied()
            .find(|&id| self.nodes[id.0 as usize].name() == name)
    }

    /// `base`, or `base_<n>` for the first `n` not already used in `graph`.
    pub fn unique_name(&self, graph: GraphId, base: &str) -> Result<String, GraphError> {
        let g = self.graph(graph)?;
        let used: HashSet<&str> = g
            .nodes
            .iter()
            .map(|&id| self.nodes[id.0 as usize].name())
            .collect();
        if !used.contains(base) {
            return Ok(base.to_string());
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if !used.contains(candidate.as_str()) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Re-derive the `is_input_const` flag list of `node` from its producers.
    pub fn update_is_input_const(&mut self, node: NodeId) -> Result<(), GraphError> {
        let mut flags = Vec::new();
        for port in self.in_ports(node)? {
            let is_const = match self.peer_out(port)? {
                Some(src) => {
                    let producer = self.node(src.node)?;
                    producer.is_type(op_types::CONST) || producer.is_type(op_types::CONSTANT)
                }
                None => false,
            };
            flags.push(is_const);
        }
        self.desc_mut(node)?
            .set_attr(attr_names::IS_INPUT_CONST, AttrValue::Bools(flags));
        Ok(())
    }
}

// ── Display ─────────────────────────────────────────────────────────────────

impl fmt::Display for ModelGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "ModelGraph ({} graphs, {} nodes, {} edges)",
            self.graph_count(),
            self.node_count(),
            self.edge_count()
        )?;
        for g in &self.graphs {
            match g.parent_node {
                Some(parent) => writeln!(
                    f,
                    "  graph '{}' (in '{}'): {} nodes",
                    g.name,
                    self.nodes[parent.0 as usize].name(),
                    g.nodes.len()
                )?,
                None => writeln!(f, "  graph '{}': {} nodes", g.name, g.nodes.len())?,
            }
        }
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
