// dot.rs — Graphviz DOT output for graph hierarchies
//
// Renders a ModelGraph as nested clusters, one per subgraph, suitable for
// `dot` and other Graphviz layout engines.
//
// Preconditions: `model` satisfies the hierarchy invariants (see verify.rs).
// Postconditions: returns a valid DOT string representing the hierarchy.
// Failure modes: none (pure string formatting; stale handles are skipped).
// Side effects: none.

use std::fmt::Write;

use crate::graph::{op_types, GraphId, ModelGraph, Node, NodeId};
use crate::hierarchy::{is_constant, is_container, is_formal_input, is_stream_join, parent_input};

/// Emit the model as a Graphviz DOT string.
pub fn emit_dot(model: &ModelGraph) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph model {{").unwrap();
    writeln!(buf, "    rankdir=LR;").unwrap();
    writeln!(buf, "    compound=true;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();

    write_graph(&mut buf, model, model.root(), "    ");

    // Formal inputs are drawn bound to the container input they stand for.
    let mut bindings = Vec::new();
    for node in model.nodes().filter(|n| is_formal_input(n)) {
        if let Ok(Some(port)) = parent_input(model, node.id) {
            bindings.push((port, node.id));
        }
    }
    if !bindings.is_empty() {
        writeln!(buf).unwrap();
        writeln!(buf, "    // Parent-index bindings").unwrap();
        for (port, formal) in bindings {
            writeln!(
                buf,
                "    n{} -> n{} [label=\"#{}\", style=dashed, color=gray50, constraint=false];",
                port.node.0, formal.0, port.index
            )
            .unwrap();
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Sanitize a name to valid DOT identifier characters.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn escape(label: &str) -> String {
    label.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Return DOT attributes string for a node.
fn node_attrs(node: &Node) -> String {
    let (shape, color) = if node.is_type(op_types::MEMCPY_ADDR_ASYNC) {
        ("box", "orange")
    } else if is_formal_input(node) {
        ("invhouse", "lightyellow")
    } else if is_constant(node) {
        ("note", "lightgray")
    } else if is_stream_join(node) {
        ("diamond", "lightgreen")
    } else if node.is_type(op_types::NET_OUTPUT) {
        ("house", "lightsalmon")
    } else if is_container(node) {
        ("box3d", "lavender")
    } else {
        ("box", "lightblue")
    };
    let stream = if node.desc.stream_id >= 0 {
        format!("\\ns{}", node.desc.stream_id)
    } else {
        String::new()
    };
    format!(
        "shape={shape}, style=filled, fillcolor={color}, label=\"{}\\n{}{stream}\"",
        escape(node.name()),
        escape(node.op_type())
    )
}

/// Write the nodes and edges of `graph`, with one nested cluster per subgraph.
fn write_graph(buf: &mut String, model: &ModelGraph, graph: GraphId, indent: &str) {
    let Ok(g) = model.graph(graph) else {
        return;
    };
    let nodes: Vec<&Node> = g.nodes().iter().filter_map(|&id| model.node(id).ok()).collect();

    for node in &nodes {
        writeln!(buf, "{indent}n{} [{}];", node.id.0, node_attrs(node)).unwrap();
    }
    for node in &nodes {
        write_in_edges(buf, model, node.id, indent);
    }

    let inner = format!("{indent}    ");
    for node in &nodes {
        for &sub in node.subgraphs() {
            let Ok(sg) = model.graph(sub) else {
                continue;
            };
            writeln!(buf).unwrap();
            writeln!(buf, "{indent}subgraph cluster_g{}_{} {{", sub.0, sanitize(&sg.name)).unwrap();
            writeln!(buf, "{inner}label=\"{} ({})\";", escape(&sg.name), escape(node.name())).unwrap();
            writeln!(buf, "{inner}style=rounded;").unwrap();
            writeln!(buf, "{inner}color=gray50;").unwrap();
            write_graph(buf, model, sub, &inner);
            writeln!(buf, "{indent}}}").unwrap();
        }
    }
}

fn write_in_edges(buf: &mut String, model: &ModelGraph, node: NodeId, indent: &str) {
    let Ok(ports) = model.in_ports(node) else {
        return;
    };
    for port in ports {
        if let Ok(Some(src)) = model.peer_out(port) {
            writeln!(
                buf,
                "{indent}n{} -> n{} [label=\"{}:{}\"];",
                src.node.0, node.0, src.index, port.index
            )
            .unwrap();
        }
    }
}
