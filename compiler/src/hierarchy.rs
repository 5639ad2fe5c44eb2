// hierarchy.rs — Graph-of-graphs queries
//
// Classification of boundary and container nodes, and the mapping from a
// formal-input node to the container input it stands for.
//
// Preconditions: handles come from the same `ModelGraph`.
// Postconditions: none (read-only).
// Failure modes: stale handles → `GraphError`; a formal input without a usable
//                `parent index` → `PassError`.
// Side effects: none.

use crate::error::{GraphError, PassError};
use crate::graph::{attr_names, op_types, GraphId, InPort, ModelGraph, Node, NodeId};

// ── Node classification ─────────────────────────────────────────────────────

/// Placeholder for an externally supplied graph argument.
pub fn is_formal_input(node: &Node) -> bool {
    node.is_type(op_types::DATA)
}

pub fn is_constant(node: &Node) -> bool {
    node.is_type(op_types::CONST) || node.is_type(op_types::CONSTANT)
}

/// Stream-multiplexing join operators.
pub fn is_stream_join(node: &Node) -> bool {
    node.is_type(op_types::STREAM_SWITCH_N) || node.is_type(op_types::STREAM_MERGE)
}

/// Conditional, loop and multi-way switch containers.
pub fn is_control_flow_container(node: &Node) -> bool {
    node.is_type(op_types::IF) || node.is_type(op_types::WHILE) || node.is_type(op_types::CASE)
}

pub fn is_container(node: &Node) -> bool {
    is_control_flow_container(node) || node.is_type(op_types::PARTITIONED_CALL)
}

/// A partitioned call explicitly marked as statically shaped.
pub fn is_known_call(node: &Node) -> bool {
    node.is_type(op_types::PARTITIONED_CALL)
        && node.desc.get_bool(attr_names::IS_UNKNOWN_SHAPE) == Some(false)
}

/// Formal input backed by a persistent variable; its address never moves.
pub fn is_variable_backed(node: &Node) -> bool {
    node.desc.get_str(attr_names::REF_VAR_SRC_VAR_NAME).is_some()
}

/// `parent index` attribute, if present and non-negative.
pub fn parent_index(node: &Node) -> Option<u32> {
    node.desc
        .get_int(attr_names::PARENT_NODE_INDEX)
        .and_then(|v| u32::try_from(v).ok())
}

pub fn require_parent_index(node: &Node) -> Result<u32, PassError> {
    parent_index(node).ok_or_else(|| PassError::MissingParentIndex {
        node: node.name().to_string(),
    })
}

// ── Graph relations ─────────────────────────────────────────────────────────

pub fn owner_graph(model: &ModelGraph, node: NodeId) -> Result<GraphId, GraphError> {
    Ok(model.node(node)?.owner)
}

pub fn is_root_graph(model: &ModelGraph, graph: GraphId) -> Result<bool, GraphError> {
    Ok(model.graph(graph)?.parent_graph().is_none())
}

/// Container node hosting the graph that owns `node`, if any.
pub fn hosting_container(model: &ModelGraph, node: NodeId) -> Result<Option<NodeId>, GraphError> {
    let owner = owner_graph(model, node)?;
    Ok(model.graph(owner)?.parent_node())
}

/// The container input a formal-input node stands for. `None` when the node
/// lives in the root graph.
pub fn parent_input(model: &ModelGraph, formal: NodeId) -> Result<Option<InPort>, PassError> {
    let node = model.node(formal)?;
    let Some(container) = hosting_container(model, formal)? else {
        return Ok(None);
    };
    let index = require_parent_index(node)?;
    let host = model.node(container)?;
    if index >= host.in_count() {
        return Err(PassError::BadParentIndex {
            node: node.name().to_string(),
            container: host.name().to_string(),
            index,
        });
    }
    Ok(Some(InPort::new(container, index)))
}

// ── Tests ───────────────────────────────────────────────────────────────────
