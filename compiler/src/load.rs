// load.rs — JSON graph documents
//
// A graph document names nodes within each graph and refers to ports as
// `node:index`. Subgraphs are nested inside the container node that owns
// them; upstream stage marks live on the root document only.
//
// Preconditions: none.
// Postconditions: `from_json(to_json(m))` rebuilds a model with the same
//                 hierarchy, descriptors, and connectivity.
// Failure modes: malformed JSON, duplicate node names, dangling edge
//                references, edges rejected by the graph primitives → `LoadError`.
// Side effects: none.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::graph::{
    AttrValue, GraphId, InPort, ModelGraph, NodeId, OpDesc, OutPort, Stage, TensorDesc,
    UNASSIGNED_STREAM,
};

// ── Document types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub nodes: Vec<NodeDoc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<EdgeDoc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDoc {
    pub name: String,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default = "unassigned", skip_serializing_if = "is_unassigned")]
    pub stream: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<TensorDesc>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<TensorDesc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subgraphs: Vec<GraphDoc>,
}

/// A data edge, `{"from": "producer:0", "to": "consumer:1"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDoc {
    pub from: String,
    pub to: String,
}

fn unassigned() -> i64 {
    UNASSIGNED_STREAM
}

fn is_unassigned(stream: &i64) -> bool {
    *stream == UNASSIGNED_STREAM
}

// ── Loading ────────────────────────────────────────────────────────────────

/// Parse a JSON graph document into a model.
pub fn from_json(text: &str) -> Result<ModelGraph, LoadError> {
    let doc: GraphDoc = serde_json::from_str(text)?;
    from_doc(&doc)
}

pub fn from_doc(doc: &GraphDoc) -> Result<ModelGraph, LoadError> {
    let mut model = ModelGraph::new(doc.name.clone());
    for &stage in &doc.stages {
        model.mark_stage(stage);
    }
    let root = model.root();
    build_graph(&mut model, root, doc)?;
    Ok(model)
}

fn build_graph(model: &mut ModelGraph, graph: GraphId, doc: &GraphDoc) -> Result<(), LoadError> {
    let mut by_name: HashMap<&str, NodeId> = HashMap::new();
    for node in &doc.nodes {
        let desc = OpDesc {
            name: node.name.clone(),
            op_type: node.op_type.clone(),
            inputs: node.inputs.clone(),
            outputs: node.outputs.clone(),
            attrs: node.attrs.clone(),
            stream_id: node.stream,
        };
        let id = model.add_node(graph, desc)?;
        if by_name.insert(node.name.as_str(), id).is_some() {
            return Err(LoadError::DuplicateNode {
                graph: doc.name.clone(),
                node: node.name.clone(),
            });
        }
        for sub in &node.subgraphs {
            let sub_id = model.add_subgraph(id, sub.name.clone())?;
            build_graph(model, sub_id, sub)?;
        }
    }

    for edge in &doc.edges {
        let (src, src_index) = port_ref(doc, &by_name, &edge.from)?;
        let (dst, dst_index) = port_ref(doc, &by_name, &edge.to)?;
        model.add_edge(OutPort::new(src, src_index), InPort::new(dst, dst_index))?;
    }
    Ok(())
}

fn port_ref(
    doc: &GraphDoc,
    by_name: &HashMap<&str, NodeId>,
    text: &str,
) -> Result<(NodeId, u32), LoadError> {
    let bad = || LoadError::BadPortRef {
        graph: doc.name.clone(),
        port: text.to_string(),
    };
    let (name, index) = text.rsplit_once(':').ok_or_else(bad)?;
    let index: u32 = index.parse().map_err(|_| bad())?;
    let node = by_name
        .get(name)
        .copied()
        .ok_or_else(|| LoadError::UnknownNode {
            graph: doc.name.clone(),
            node: name.to_string(),
        })?;
    Ok((node, index))
}

// ── Writing ────────────────────────────────────────────────────────────────

/// Convert a model back to its document form. Edges are listed per consumer,
/// in node order then input order.
pub fn to_doc(model: &ModelGraph) -> Result<GraphDoc, LoadError> {
    let mut doc = graph_doc(model, model.root())?;
    doc.stages = model.stages().collect();
    Ok(doc)
}

fn graph_doc(model: &ModelGraph, graph: GraphId) -> Result<GraphDoc, LoadError> {
    let g = model.graph(graph)?;
    let mut nodes = Vec::with_capacity(g.nodes().len());
    let mut edges = Vec::new();
    for &id in g.nodes() {
        let node = model.node(id)?;
        let subgraphs = node
            .subgraphs()
            .iter()
            .map(|&sub| graph_doc(model, sub))
            .collect::<Result<Vec<_>, _>>()?;
        nodes.push(NodeDoc {
            name: node.desc.name.clone(),
            op_type: node.desc.op_type.clone(),
            stream: node.desc.stream_id,
            inputs: node.desc.inputs.clone(),
            outputs: node.desc.outputs.clone(),
            attrs: node.desc.attrs.clone(),
            subgraphs,
        });
        for port in model.in_ports(id)? {
            if let Some(src) = model.peer_out(port)? {
                edges.push(EdgeDoc {
                    from: format!("{}:{}", model.node(src.node)?.name(), src.index),
                    to: format!("{}:{}", node.name(), port.index),
                });
            }
        }
    }
    Ok(GraphDoc {
        name: g.name.clone(),
        stages: Vec::new(),
        nodes,
        edges,
    })
}

/// Pretty-printed JSON document for `model`.
pub fn to_json(model: &ModelGraph) -> Result<String, LoadError> {
    let doc = to_doc(model)?;
    let mut text = serde_json::to_string_pretty(&doc)?;
    text.push('\n');
    Ok(text)
}
