use acc::addr_copy::AddrCopyPass;
use acc::graph::{
    attr_names, op_types, AttrValue, InPort, ModelGraph, OpDesc, OutPort, Stage, TensorDesc,
};
use acc::pass::PassId;
use acc::pipeline::{run_pipeline, CompilationState, PassContext};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

// KPI-aligned benchmark scenarios on synthetic hierarchies.

fn port() -> TensorDesc {
    TensorDesc::new(vec![64, 64])
}

fn unary(name: &str, op_type: &str, stream: i64) -> OpDesc {
    OpDesc::new(name, op_type)
        .with_input(port())
        .with_output(port())
        .with_stream(stream)
}

/// `width` root inputs, each reaching a join through `depth` nested calls,
/// plus a root output collector reading every input and one constant.
fn generate_hierarchy(width: usize, depth: usize) -> ModelGraph {
    let mut m = ModelGraph::new("bench");
    m.mark_stage(Stage::StreamAssign);
    m.mark_stage(Stage::MemOffsetAssign);
    let root = m.root();

    let mut out = OpDesc::new("netout", op_types::NET_OUTPUT).with_stream(0);
    for _ in 0..=width {
        out = out.with_input(port().with_offset(4096));
    }
    let k = m
        .add_node(
            root,
            OpDesc::new("k", op_types::CONST).with_output(port()).with_stream(0),
        )
        .unwrap();

    let mut inputs = Vec::with_capacity(width);
    for w in 0..width {
        let x = m
            .add_node(
                root,
                OpDesc::new(format!("x{w}"), op_types::DATA)
                    .with_output(port())
                    .with_stream(0),
            )
            .unwrap();
        inputs.push(x);
        let mut container = m
            .add_node(root, unary(&format!("call{w}_0"), op_types::PARTITIONED_CALL, 0))
            .unwrap();
        m.add_edge(OutPort::new(x, 0), InPort::new(container, 0))
            .unwrap();
        for level in 1..=depth {
            let body = m.add_subgraph(container, format!("body{w}_{level}")).unwrap();
            let arg = m
                .add_node(
                    body,
                    OpDesc::new(format!("arg{w}_{level}"), op_types::DATA)
                        .with_output(port())
                        .with_attr(attr_names::PARENT_NODE_INDEX, AttrValue::Int(0)),
                )
                .unwrap();
            let (name, op_type) = if level == depth {
                (format!("merge{w}"), op_types::STREAM_MERGE)
            } else {
                (format!("call{w}_{level}"), op_types::PARTITIONED_CALL)
            };
            let next = m
                .add_node(body, unary(&name, op_type, (w % 8) as i64))
                .unwrap();
            m.add_edge(OutPort::new(arg, 0), InPort::new(next, 0))
                .unwrap();
            container = next;
        }
    }

    let out = m.add_node(root, out).unwrap();
    m.add_edge(OutPort::new(k, 0), InPort::new(out, 0)).unwrap();
    for (i, &x) in inputs.iter().enumerate() {
        m.add_edge(OutPort::new(x, 0), InPort::new(out, i as u32 + 1))
            .unwrap();
    }
    m
}

// KPI: copy-insertion latency by hierarchy width.
fn bench_kpi_insert_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/insert_addr_copies_width");
    for width in [4usize, 32, 256] {
        let model = generate_hierarchy(width, 3);
        group.bench_with_input(BenchmarkId::from_parameter(width), &model, |b, model| {
            b.iter_batched(
                || model.clone(),
                |mut m| {
                    let stats = AddrCopyPass::new().run_on(&mut m).unwrap();
                    black_box(stats);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// KPI: copy-insertion latency by nesting depth.
fn bench_kpi_insert_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("kpi/insert_addr_copies_depth");
    for depth in [1usize, 8, 32] {
        let model = generate_hierarchy(16, depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &model, |b, model| {
            b.iter_batched(
                || model.clone(),
                |mut m| {
                    let stats = AddrCopyPass::new().run_on(&mut m).unwrap();
                    black_box(stats);
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

// KPI: full pipeline (verify -> insert -> post-verify).
fn bench_kpi_full_pipeline(c: &mut Criterion) {
    let model = generate_hierarchy(64, 4);
    let ctx = PassContext::default();
    c.bench_function("kpi/full_pipeline", |b| {
        b.iter_batched(
            || CompilationState::new(model.clone()),
            |mut state| {
                run_pipeline(&mut state, PassId::PostVerify, &ctx, |_, _| {}).unwrap();
                black_box(state.model.node_count());
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(
    benches,
    bench_kpi_insert_width,
    bench_kpi_insert_depth,
    bench_kpi_full_pipeline
);
criterion_main!(benches);
