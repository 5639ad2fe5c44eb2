// error.rs — Typed errors for graph mutation, passes, and document loading
//
// Graph primitives return `GraphError`; passes wrap it in `PassError` together
// with their own structural failures. The pipeline converts `PassError` into
// diagnostics (see diag.rs), so nothing here is user-facing formatting beyond
// the `Display` messages.

use thiserror::Error;

use crate::graph::{GraphId, InPort, NodeId, OutPort};

/// Failure of a graph-level primitive (query or mutation).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("graph {0:?} does not exist")]
    GraphNotFound(GraphId),

    #[error("node {0:?} does not exist")]
    NodeNotFound(NodeId),

    #[error("node '{node}' has no {direction} port {index}")]
    PortOutOfRange {
        node: String,
        direction: &'static str,
        index: u32,
    },

    #[error("input {index} of '{node}' already has a producer")]
    InputAlreadyConnected { node: String, index: u32 },

    #[error("edge {src} -> {dst} crosses graph boundary")]
    CrossGraphEdge { src: String, dst: String },

    #[error("no edge {src} -> {dst}")]
    EdgeNotFound { src: String, dst: String },

    #[error("anchor node '{anchor}' is not in graph '{graph}'")]
    AnchorNotInGraph { anchor: String, graph: String },
}

/// Failure of a graph pass. Every variant is fatal for the compile.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PassError {
    #[error("formal input '{node}' has no parent index")]
    MissingParentIndex { node: String },

    #[error("parent index {index} of '{node}' does not name an input of container '{container}'")]
    BadParentIndex {
        node: String,
        container: String,
        index: u32,
    },

    #[error("output collector '{node}' input {index} has no producer")]
    UnconnectedOutput { node: String, index: u32 },

    #[error("resolution from '{node}' exceeded {depth} nesting levels")]
    NestingTooDeep { node: String, depth: usize },

    #[error("resolution from '{node}' revisits input {index} of '{container}'")]
    ResolutionCycle {
        node: String,
        container: String,
        index: u32,
    },

    #[error("failed to insert address copy between {producer:?} and {consumer:?}: {source}")]
    Insert {
        producer: OutPort,
        consumer: InPort,
        #[source]
        source: GraphError,
    },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("verification failed: {0}")]
    Verify(String),
}

impl PassError {
    /// Name of the node the failure is about, for diagnostics.
    pub fn node_name(&self) -> Option<&str> {
        match self {
            PassError::MissingParentIndex { node }
            | PassError::BadParentIndex { node, .. }
            | PassError::UnconnectedOutput { node, .. }
            | PassError::NestingTooDeep { node, .. }
            | PassError::ResolutionCycle { node, .. } => Some(node),
            PassError::Graph(GraphError::InputAlreadyConnected { node, .. })
            | PassError::Graph(GraphError::PortOutOfRange { node, .. }) => Some(node),
            _ => None,
        }
    }
}

/// Failure while reading or writing a graph document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("malformed graph document: {0}")]
    Json(#[from] serde_json::Error),

    #[error("graph '{graph}': duplicate node name '{node}'")]
    DuplicateNode { graph: String, node: String },

    #[error("graph '{graph}': unknown node '{node}' in edge")]
    UnknownNode { graph: String, node: String },

    #[error("graph '{graph}': bad port reference '{port}' (expected `node:index`)")]
    BadPortRef { graph: String, port: String },

    #[error(transparent)]
    Graph(#[from] GraphError),
}
