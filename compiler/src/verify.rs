// verify.rs — Structural verification of the graph hierarchy
//
// Checks the invariants every pass relies on and that the copy-insertion pass
// must preserve. Runs before the rewrite (V1-V5) and after it (V1-V6), so a
// graph left behind by a failed pass can still be walked and reported on.
//
// Preconditions: none.
// Postconditions: returns a `GraphCert`; never mutates the model.
// Failure modes: none (violations are recorded in the certificate).
// Side effects: none.

use std::collections::HashMap;

use crate::error::PassError;
use crate::graph::{op_types, GraphId, InPort, ModelGraph, NodeId, OutPort};
use crate::hierarchy::{is_formal_input, parent_input};
use crate::pass::{GraphPass, PassId, PassReport, StageCert};
use crate::pipeline::PassContext;

/// At most this many violation messages are kept per certificate.
const MAX_REPORTED: usize = 16;

/// Outcome of verification. `v6` is only evaluated after rewriting.
#[derive(Debug, Clone, Default)]
pub struct GraphCert {
    pub v1_single_producer: bool,
    pub v2_intra_graph_edges: bool,
    pub v3_parent_links: bool,
    pub v4_parent_indices: bool,
    pub v5_node_ownership: bool,
    pub v6_copy_streams: Option<bool>,
    pub violations: Vec<String>,
}

impl StageCert for GraphCert {
    fn obligations(&self) -> Vec<(&'static str, bool)> {
        let mut obligations = vec![
            ("V1_single_producer", self.v1_single_producer),
            ("V2_intra_graph_edges", self.v2_intra_graph_edges),
            ("V3_parent_links", self.v3_parent_links),
            ("V4_parent_indices", self.v4_parent_indices),
            ("V5_node_ownership", self.v5_node_ownership),
        ];
        if let Some(ok) = self.v6_copy_streams {
            obligations.push(("V6_copy_streams", ok));
        }
        obligations
    }
}

struct Checker<'a> {
    model: &'a ModelGraph,
    violations: Vec<String>,
}

impl Checker<'_> {
    fn fail(&mut self, message: String) -> bool {
        if self.violations.len() < MAX_REPORTED {
            self.violations.push(message);
        }
        false
    }

    fn v1_v2(&mut self) -> (bool, bool) {
        let model = self.model;
        let mut single = true;
        let mut intra = true;
        for node in model.nodes() {
            for i in 0..node.in_count() {
                let dst = InPort::new(node.id, i);
                let Ok(Some(src)) = model.peer_out(dst) else {
                    continue;
                };
                match model.peer_ins(src) {
                    Ok(consumers) if consumers.contains(&dst) => {}
                    _ => {
                        single = self.fail(format!(
                            "'{}' input {} is not listed by its producer",
                            node.name(),
                            i
                        ));
                    }
                }
                match model.node(src.node) {
                    Ok(producer) if producer.owner == node.owner => {}
                    _ => {
                        intra = self.fail(format!(
                            "edge into '{}' input {} crosses a graph boundary",
                            node.name(),
                            i
                        ));
                    }
                }
            }
            for o in 0..node.out_count() {
                let src = OutPort::new(node.id, o);
                let Ok(consumers) = model.peer_ins(src) else {
                    continue;
                };
                for &dst in consumers {
                    if model.peer_out(dst).ok().flatten() != Some(src) {
                        single = self.fail(format!(
                            "'{}' output {} lists a consumer that does not point back",
                            node.name(),
                            o
                        ));
                    }
                }
            }
        }
        (single, intra)
    }

    fn v3(&mut self) -> bool {
        let model = self.model;
        let mut ok = true;
        for graph in model.graphs() {
            match (graph.parent_node(), graph.parent_graph()) {
                (None, None) => {
                    if graph.id != model.root() {
                        ok = self.fail(format!("graph '{}' is detached", graph.name));
                    }
                }
                (Some(parent), Some(parent_graph)) => match model.node(parent) {
                    Ok(p) if p.owner == parent_graph && p.subgraphs().contains(&graph.id) => {}
                    _ => {
                        ok = self.fail(format!(
                            "graph '{}' parent node is not in its parent graph",
                            graph.name
                        ));
                    }
                },
                _ => {
                    ok = self.fail(format!("graph '{}' has a half-set parent", graph.name));
                }
            }
        }
        ok
    }

    fn v4(&mut self) -> bool {
        let model = self.model;
        let mut ok = true;
        for node in model.nodes().filter(|n| is_formal_input(n)) {
            if let Err(e) = parent_input(model, node.id) {
                ok = self.fail(e.to_string());
            }
        }
        ok
    }

    fn v5(&mut self) -> bool {
        let model = self.model;
        let mut seen: HashMap<NodeId, GraphId> = HashMap::new();
        let mut ok = true;
        for graph in model.graphs() {
            for &id in graph.nodes() {
                if seen.insert(id, graph.id).is_some() {
                    ok = self.fail(format!("node {:?} is listed twice", id));
                }
                match model.node(id) {
                    Ok(n) if n.owner == graph.id => {}
                    _ => {
                        ok = self.fail(format!(
                            "node {:?} listed in '{}' is owned elsewhere",
                            id, graph.name
                        ));
                    }
                }
            }
        }
        if seen.len() != model.node_count() {
            ok = self.fail(format!(
                "{} nodes are not in any graph order",
                model.node_count() - seen.len()
            ));
        }
        ok
    }

    fn v6(&mut self) -> bool {
        let model = self.model;
        let mut ok = true;
        for copy in model
            .nodes()
            .filter(|n| n.is_type(op_types::MEMCPY_ADDR_ASYNC))
        {
            let fed = matches!(model.peer_out(InPort::new(copy.id, 0)), Ok(Some(_)));
            let consumers = model
                .peer_ins(OutPort::new(copy.id, 0))
                .map(|c| c.to_vec())
                .unwrap_or_default();
            if !fed || consumers.len() != 1 {
                ok = self.fail(format!("copy '{}' is not spliced into one edge", copy.name()));
                continue;
            }
            match model.node(consumers[0].node) {
                Ok(consumer) if consumer.desc.stream_id == copy.desc.stream_id => {}
                _ => {
                    ok = self.fail(format!(
                        "copy '{}' is not on its consumer's stream",
                        copy.name()
                    ));
                }
            }
        }
        ok
    }
}

/// Check V1-V5.
pub fn verify_graph(model: &ModelGraph) -> GraphCert {
    let mut checker = Checker {
        model,
        violations: Vec::new(),
    };
    let (v1, v2) = checker.v1_v2();
    let v3 = checker.v3();
    let v4 = checker.v4();
    let v5 = checker.v5();
    GraphCert {
        v1_single_producer: v1,
        v2_intra_graph_edges: v2,
        v3_parent_links: v3,
        v4_parent_indices: v4,
        v5_node_ownership: v5,
        v6_copy_streams: None,
        violations: checker.violations,
    }
}

/// Check V1-V6 on a rewritten model.
pub fn verify_rewired(model: &ModelGraph) -> GraphCert {
    let mut cert = verify_graph(model);
    let mut checker = Checker {
        model,
        violations: Vec::new(),
    };
    cert.v6_copy_streams = Some(checker.v6());
    cert.violations.extend(checker.violations);
    cert
}

/// Pipeline wrapper: fails when any obligation fails.
#[derive(Debug, Clone, Copy)]
pub struct VerifyPass {
    post: bool,
}

impl VerifyPass {
    pub fn pre() -> Self {
        VerifyPass { post: false }
    }

    pub fn post() -> Self {
        VerifyPass { post: true }
    }
}

impl GraphPass for VerifyPass {
    fn id(&self) -> PassId {
        if self.post {
            PassId::PostVerify
        } else {
            PassId::Verify
        }
    }

    fn run(&mut self, model: &mut ModelGraph, _ctx: &PassContext) -> Result<PassReport, PassError> {
        let cert = if self.post {
            verify_rewired(model)
        } else {
            verify_graph(model)
        };
        if !cert.all_pass() {
            let mut message = cert.failed().join(", ");
            if let Some(first) = cert.violations.first() {
                message.push_str(": ");
                message.push_str(first);
            }
            return Err(PassError::Verify(message));
        }
        Ok(PassReport::Verified {
            obligations: cert.obligations().len(),
        })
    }
}
