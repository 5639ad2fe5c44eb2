// Integration tests for address-copy insertion through the pass pipeline.
//
// Loads graph documents from `tests/fixtures/`, runs the pipeline through the
// library API, and checks where copies land, which streams they run on, and
// what happens to offsets and scheduling markers.

use std::path::{Path, PathBuf};

use acc::addr_copy::{AddrCopyPass, AddrCopyStats};
use acc::diag::codes;
use acc::graph::{
    attr_names, op_types, AttrValue, GraphId, InPort, ModelGraph, NodeId, OpDesc, OutPort, Stage,
    TensorDesc,
};
use acc::pass::{PassId, PassReport, StageCert};
use acc::pipeline::{run_pipeline, CompilationState, CompileOptions, PassContext};

// ── Test helpers ────────────────────────────────────────────────────────────

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn load_state(name: &str) -> CompilationState {
    let source = std::fs::read_to_string(fixture(name))
        .unwrap_or_else(|e| panic!("failed to read {}: {}", name, e));
    CompilationState::from_json(&source, &CompileOptions::default())
        .unwrap_or_else(|e| panic!("failed to load {}: {}", name, e))
}

fn compiled(name: &str) -> CompilationState {
    let mut state = load_state(name);
    run_pipeline(
        &mut state,
        PassId::PostVerify,
        &PassContext::default(),
        |_, _| {},
    )
    .unwrap_or_else(|e| {
        panic!(
            "pipeline failed in {:?}: {:?}",
            e.failing_pass, state.diagnostics
        )
    });
    state
}

fn node(m: &ModelGraph, graph: GraphId, name: &str) -> NodeId {
    m.find_node(graph, name)
        .unwrap_or_else(|| panic!("no node '{}' in graph {:?}", name, graph))
}

fn subgraph(m: &ModelGraph, container: NodeId) -> GraphId {
    m.node(container).unwrap().subgraphs()[0]
}

fn producer(m: &ModelGraph, consumer: NodeId, index: u32) -> NodeId {
    m.in_data_node(consumer, index).unwrap().unwrap()
}

fn names(m: &ModelGraph, graph: GraphId) -> Vec<String> {
    m.graph(graph)
        .unwrap()
        .nodes()
        .iter()
        .map(|&id| m.node(id).unwrap().name().to_string())
        .collect()
}

// ── Hierarchy fixture ───────────────────────────────────────────────────────

#[test]
fn hierarchy_gets_one_copy_per_call_site() {
    let state = compiled("hierarchy.json");
    assert_eq!(
        state.report(PassId::InsertAddrCopies),
        Some(&PassReport::AddrCopies(AddrCopyStats {
            join_copies: 1,
            known_copies: 1,
            output_copies: 2,
        }))
    );
    assert_eq!(state.model.node_count(), 14);
    assert_eq!(state.model.edge_count(), 12);
}

#[test]
fn unknown_call_copy_sits_before_the_container() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    let root = m.root();
    let x = node(m, root, "x");
    let call = node(m, root, "call");

    let copy = producer(m, call, 0);
    let copy_node = m.node(copy).unwrap();
    assert!(copy_node.is_type(op_types::MEMCPY_ADDR_ASYNC));
    assert_eq!(copy_node.name(), "x_MemcpyAddrAsync");
    assert_eq!(copy_node.owner, root);
    assert_eq!(copy_node.desc.stream_id, 0);
    assert_eq!(copy_node.desc.inputs[0].dtype, "float32");
    assert_eq!(copy_node.desc.outputs[0].shape, vec![8]);
    assert_eq!(producer(m, copy, 0), x);

    // The join inside the unknown-shape body still reads its formal input.
    let body = subgraph(m, call);
    let merge = node(m, body, "merge");
    assert_eq!(producer(m, merge, 0), node(m, body, "arg"));
}

#[test]
fn known_call_copy_sits_inside_the_body() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    let kcall = node(m, m.root(), "kcall");
    let kbody = subgraph(m, kcall);
    let switch = node(m, kbody, "switch");

    let copy = producer(m, switch, 0);
    let copy_node = m.node(copy).unwrap();
    assert!(copy_node.is_type(op_types::MEMCPY_ADDR_ASYNC));
    assert_eq!(copy_node.owner, kbody);
    assert_eq!(copy_node.desc.stream_id, 5);
    assert_eq!(names(m, kbody), vec!["karg", "karg_MemcpyAddrAsync", "switch"]);
    // The container's own input is left alone.
    assert_eq!(producer(m, kcall, 0), node(m, m.root(), "x"));
}

#[test]
fn root_output_copies_move_const_offsets() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    let root = m.root();
    let netout = node(m, root, "netout");
    let out = m.node(netout).unwrap();

    let const_copy = producer(m, netout, 0);
    let data_copy = producer(m, netout, 1);
    assert_eq!(m.node(const_copy).unwrap().name(), "w_MemcpyAddrAsync");
    assert_eq!(m.node(data_copy).unwrap().name(), "x_MemcpyAddrAsync_1");
    assert_eq!(producer(m, netout, 2), node(m, root, "call"));

    assert_eq!(m.node(const_copy).unwrap().desc.inputs[0].data_offset, 1024);
    assert_eq!(out.desc.inputs[0].data_offset, 0);
    // Data-fed and compute-fed offsets stay where they were.
    assert_eq!(m.node(data_copy).unwrap().desc.inputs[0].data_offset, 0);
    assert_eq!(out.desc.inputs[1].data_offset, 2048);
    assert_eq!(out.desc.inputs[2].data_offset, 4096);

    assert_eq!(
        m.node(const_copy).unwrap().desc.attrs.get(attr_names::IS_INPUT_CONST),
        Some(&AttrValue::Bools(vec![true]))
    );
    assert_eq!(
        out.desc.attrs.get(attr_names::IS_INPUT_CONST),
        Some(&AttrValue::Bools(vec![false, false, false]))
    );
}

#[test]
fn copies_are_placed_right_after_their_producer() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    assert_eq!(
        names(m, m.root()),
        vec![
            "x",
            "x_MemcpyAddrAsync_1",
            "x_MemcpyAddrAsync",
            "w",
            "w_MemcpyAddrAsync",
            "call",
            "kcall",
            "netout",
        ]
    );
}

#[test]
fn connect_input_marker_follows_the_copy() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    let call = node(m, m.root(), "call");
    let copy = producer(m, call, 0);
    assert_eq!(
        m.node(copy).unwrap().desc.get_bool(attr_names::NODE_CONNECT_INPUT),
        Some(true)
    );
    assert_eq!(
        m.node(call).unwrap().desc.get_bool(attr_names::NODE_CONNECT_INPUT),
        Some(false)
    );
}

#[test]
fn producer_fan_out_is_preserved() {
    let state = compiled("hierarchy.json");
    let m = &state.model;
    let x = node(m, m.root(), "x");
    let consumers: Vec<String> = m
        .peer_ins(OutPort::new(x, 0))
        .unwrap()
        .iter()
        .map(|p| m.node(p.node).unwrap().name().to_string())
        .collect();
    assert_eq!(consumers.len(), 3);
    assert!(consumers.contains(&"kcall".to_string()));
    assert!(consumers.contains(&"x_MemcpyAddrAsync".to_string()));
    assert!(consumers.contains(&"x_MemcpyAddrAsync_1".to_string()));
}

#[test]
fn rewritten_hierarchy_verifies() {
    let state = compiled("hierarchy.json");
    let cert = acc::verify::verify_rewired(&state.model);
    assert!(cert.all_pass(), "failed: {:?}", cert.violations);
}

// ── Idempotence ─────────────────────────────────────────────────────────────

#[test]
fn second_run_changes_nothing() {
    let mut state = compiled("hierarchy.json");
    let nodes = state.model.node_count();
    let edges = state.model.edge_count();
    let stats = AddrCopyPass::new().run_on(&mut state.model).unwrap();
    assert_eq!(stats.total(), 0);
    assert_eq!(state.model.node_count(), nodes);
    assert_eq!(state.model.edge_count(), edges);
}

#[test]
fn rewritten_document_reloads_and_stays_put() {
    let state = compiled("hierarchy.json");
    let text = acc::load::to_json(&state.model).unwrap();
    let mut reloaded = CompilationState::from_json(&text, &CompileOptions::default()).unwrap();
    run_pipeline(
        &mut reloaded,
        PassId::PostVerify,
        &PassContext::default(),
        |_, _| {},
    )
    .unwrap();
    assert_eq!(
        reloaded.report(PassId::InsertAddrCopies),
        Some(&PassReport::AddrCopies(AddrCopyStats::default()))
    );
    assert_eq!(reloaded.model.node_count(), state.model.node_count());
}

// ── Edge cases and failures ─────────────────────────────────────────────────

#[test]
fn empty_constant_output_is_not_copied() {
    let state = compiled("empty_output.json");
    let m = &state.model;
    let netout = node(m, m.root(), "netout");
    assert_eq!(producer(m, netout, 0), node(m, m.root(), "k"));
    assert_eq!(m.node(netout).unwrap().desc.inputs[0].data_offset, 64);
    assert_eq!(m.node_count(), 2);
}

#[test]
fn missing_parent_index_stops_before_rewrite() {
    let mut state = load_state("missing_parent_index.json");
    let before = state.model.node_count();
    let err = run_pipeline(
        &mut state,
        PassId::PostVerify,
        &PassContext::default(),
        |_, _| {},
    )
    .unwrap_err();
    assert_eq!(err.failing_pass, PassId::Verify);
    assert_eq!(state.diagnostics.len(), 1);
    assert_eq!(state.diagnostics[0].code, Some(codes::E0400));
    assert!(state.diagnostics[0].message.contains("V4_parent_indices"));
    assert_eq!(state.model.node_count(), before);
}

#[test]
fn pass_reports_missing_parent_index_when_run_directly() {
    let mut state = load_state("missing_parent_index.json");
    let err = AddrCopyPass::new().run_on(&mut state.model).unwrap_err();
    assert_eq!(err.node_name(), Some("arg"));
    let diag = acc::diag::Diagnostic::from_pass_error(&err);
    assert_eq!(diag.code, Some(codes::E0200));
}

#[test]
fn unstaged_model_is_refused_unless_waived() {
    let mut state = load_state("unstaged.json");
    let err = run_pipeline(
        &mut state,
        PassId::PostVerify,
        &PassContext::default(),
        |_, _| {},
    )
    .unwrap_err();
    assert_eq!(err.failing_pass, PassId::InsertAddrCopies);
    assert_eq!(state.model.node_count(), 2);

    let mut state = load_state("unstaged.json");
    let ctx = PassContext::new(
        CompileOptions {
            require_stages: false,
            ..Default::default()
        },
        1,
    );
    run_pipeline(&mut state, PassId::PostVerify, &ctx, |_, _| {}).unwrap();
    let sw = node(&state.model, state.model.root(), "sw");
    let copy = producer(&state.model, sw, 0);
    assert_eq!(state.model.node(copy).unwrap().desc.stream_id, 3);
    assert_eq!(
        state.model.peer_ins(OutPort::new(copy, 0)).unwrap(),
        &[InPort::new(sw, 0)]
    );
}

#[test]
fn tight_nesting_bound_fails_the_insertion_pass() {
    let mut state = load_state("hierarchy.json");
    let ctx = PassContext::new(
        CompileOptions {
            max_nesting_depth: Some(0),
            ..Default::default()
        },
        1,
    );
    let err = run_pipeline(&mut state, PassId::PostVerify, &ctx, |_, _| {}).unwrap_err();
    assert_eq!(err.failing_pass, PassId::InsertAddrCopies);
    assert_eq!(state.diagnostics[0].code, Some(codes::E0202));
    assert_eq!(state.diagnostics[0].node.as_deref(), Some("arg"));
}

#[test]
fn rejected_insertion_fails_the_pass_with_mutation_code() {
    let mut m = ModelGraph::new("main");
    m.mark_stage(Stage::StreamAssign);
    m.mark_stage(Stage::MemOffsetAssign);
    let root = m.root();
    let x = m
        .add_node(
            root,
            OpDesc::new("x", op_types::DATA)
                .with_output(TensorDesc::new(vec![4]))
                .with_stream(0),
        )
        .unwrap();
    let sw = m
        .add_node(
            root,
            OpDesc::new("sw", op_types::STREAM_SWITCH_N)
                .with_input(TensorDesc::new(vec![4]))
                .with_output(TensorDesc::new(vec![4]))
                .with_stream(2),
        )
        .unwrap();
    m.add_edge(OutPort::new(x, 0), InPort::new(sw, 0)).unwrap();
    // The edge stays but the producer no longer describes its output, so
    // the copy cannot be built.
    m.desc_mut(x).unwrap().outputs.clear();

    let mut state = CompilationState::new(m);
    let err = run_pipeline(
        &mut state,
        PassId::PostVerify,
        &PassContext::default(),
        |_, _| {},
    )
    .unwrap_err();
    assert_eq!(err.failing_pass, PassId::InsertAddrCopies);
    assert!(state.has_error);
    assert_eq!(state.report(PassId::InsertAddrCopies), None);
    assert_eq!(state.diagnostics.len(), 1);
    assert_eq!(state.diagnostics[0].code, Some(codes::E0300));
    assert_eq!(state.diagnostics[0].causes.len(), 1);
    assert_eq!(state.model.node_count(), 2);
    assert_eq!(state.model.in_data_node(sw, 0).unwrap(), Some(x));
}
