// addr_copy.rs — Address-stabilizing copy insertion across graph boundaries
//
// Values consumed by stream-multiplexing joins, or read directly by the root
// graph's output collector, must be observed through an address that stays
// valid while the consumer runs. Where a formal input (or a constant feeding
// the root output) does not give that guarantee, a `MemcpyAddrAsync` node is
// spliced into the edge on the consumer's stream.
//
// Preconditions: stream ids and memory offsets are assigned; hierarchy
//                invariants hold (see verify.rs).
// Postconditions: every qualifying edge passes through exactly one copy node;
//                 offsets of constant-fed root outputs travel with the edge.
// Failure modes: missing/invalid parent index, unconnected root output,
//                a resolution loop or an exceeded nesting cap, failed graph
//                mutation → `PassError`.
//                Completed insertions are not undone.
// Side effects: none beyond the graph mutation.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::error::{GraphError, PassError};
use crate::graph::{
    attr_names, op_types, AttrValue, EdgeRewire, InPort, ModelGraph, NodeId, OpDesc, OutPort,
};
use crate::hierarchy::{
    hosting_container, is_constant, is_control_flow_container, is_formal_input, is_known_call,
    is_root_graph, is_stream_join, is_variable_backed, parent_index, require_parent_index,
};
use crate::pass::{GraphPass, PassId, PassReport};
use crate::pipeline::PassContext;

/// An existing data edge that may receive a copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub producer: OutPort,
    pub consumer: InPort,
}

/// Where copies are needed for one formal-input edge. Each branch is
/// resolved independently; `None` means nothing to insert on that branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Edge from a root-graph formal input into the outermost container.
    pub non_dynamic: Option<Crossing>,
    /// Edge from a formal input inside a statically shaped call.
    pub known: Option<Crossing>,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.non_dynamic.is_none() && self.known.is_none()
    }
}

/// Counts of inserted copy nodes by call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddrCopyStats {
    pub join_copies: usize,
    pub known_copies: usize,
    pub output_copies: usize,
}

impl AddrCopyStats {
    pub fn total(&self) -> usize {
        self.join_copies + self.known_copies + self.output_copies
    }
}

/// The copy-insertion pass. Holds no per-edge traversal state.
#[derive(Debug, Clone)]
pub struct AddrCopyPass {
    max_depth: Option<usize>,
}

impl Default for AddrCopyPass {
    fn default() -> Self {
        Self::new()
    }
}

impl AddrCopyPass {
    /// Resolution climbs as far as the hierarchy goes.
    pub fn new() -> Self {
        AddrCopyPass { max_depth: None }
    }

    /// Fail any resolution that needs more than `max_depth` climbs.
    pub fn with_max_depth(max_depth: usize) -> Self {
        AddrCopyPass {
            max_depth: Some(max_depth),
        }
    }

    /// Visit every node of the hierarchy (snapshot taken before any insertion)
    /// and insert copies where needed.
    pub fn run_on(&self, model: &mut ModelGraph) -> Result<AddrCopyStats, PassError> {
        let mut stats = AddrCopyStats::default();
        let order = model.all_nodes(model.root())?;
        for id in order {
            let node = model.node(id)?;
            if is_stream_join(node) {
                self.handle_join(model, id, &mut stats)?;
            } else if node.is_type(op_types::NET_OUTPUT) && is_root_graph(model, node.owner)? {
                handle_root_output(model, id, &mut stats)?;
            }
        }
        Ok(stats)
    }

    fn handle_join(
        &self,
        model: &mut ModelGraph,
        join: NodeId,
        stats: &mut AddrCopyStats,
    ) -> Result<(), PassError> {
        debug!("checking join inputs of '{}'", model.node(join)?.name());
        for port in model.in_ports(join)? {
            let Some(src) = model.peer_out(port)? else {
                continue;
            };
            let producer = model.node(src.node)?;
            if !is_formal_input(producer) {
                continue;
            }
            let crossing = Crossing {
                producer: src,
                consumer: port,
            };
            if is_root_graph(model, producer.owner)? {
                debug!("'{}' is a root input, copying in place", producer.name());
                insert_addr_copy(model, crossing)?;
                stats.join_copies += 1;
                continue;
            }

            let resolution = resolve_crossing(model, crossing, self.max_depth)?;
            if resolution.is_empty() {
                debug!("'{}' needs no copy", producer.name());
            }
            if let Some(c) = resolution.non_dynamic {
                insert_addr_copy(model, c)?;
                stats.join_copies += 1;
            }
            if let Some(c) = resolution.known {
                insert_addr_copy(model, c)?;
                stats.known_copies += 1;
            }
        }
        Ok(())
    }
}

fn handle_root_output(
    model: &mut ModelGraph,
    output: NodeId,
    stats: &mut AddrCopyStats,
) -> Result<(), PassError> {
    debug!("checking root output '{}'", model.node(output)?.name());
    for port in model.in_ports(output)? {
        let Some(src) = model.peer_out(port)? else {
            return Err(PassError::UnconnectedOutput {
                node: model.node(output)?.name().to_string(),
                index: port.index,
            });
        };
        let producer = model.node(src.node)?;
        let from_const = is_constant(producer);
        if !from_const && !is_formal_input(producer) {
            continue;
        }
        if model.output_desc(src)?.has_zero_dim() {
            debug!("'{}' output {} is empty, no copy", producer.name(), src.index);
            continue;
        }

        let copy = insert_addr_copy(
            model,
            Crossing {
                producer: src,
                consumer: port,
            },
        )?;
        stats.output_copies += 1;

        // Offsets were assigned before this pass; move the constant's
        // offset onto the edge it was computed for.
        if from_const {
            let offset = model.input_desc_mut(port)?.data_offset;
            model.input_desc_mut(InPort::new(copy, 0))?.data_offset = offset;
            model.input_desc_mut(port)?.data_offset = 0;
            info!(
                "moved const offset {} to '{}'",
                offset,
                model.node(copy)?.name()
            );
        }
    }
    model.update_is_input_const(output)?;
    Ok(())
}

impl GraphPass for AddrCopyPass {
    fn id(&self) -> PassId {
        PassId::InsertAddrCopies
    }

    fn run(&mut self, model: &mut ModelGraph, ctx: &PassContext) -> Result<PassReport, PassError> {
        self.max_depth = ctx.options.max_nesting_depth;
        let stats = self.run_on(model)?;
        Ok(PassReport::AddrCopies(stats))
    }
}

// ── Resolution ──────────────────────────────────────────────────────────────

/// Climb from a formal-input edge inside a subgraph to the edge(s) that need
/// a copy. Dead ends yield an empty `Resolution`, not an error.
///
/// Each step visits one container input; revisiting one is a
/// `ResolutionCycle`. `max_depth`, when set, caps the number of steps.
pub fn resolve_crossing(
    model: &ModelGraph,
    start: Crossing,
    max_depth: Option<usize>,
) -> Result<Resolution, PassError> {
    let formal = model.node(start.producer.node)?;
    let mut index = require_parent_index(formal)?;
    let mut index_owner = formal.id;
    let Some(mut container) = hosting_container(model, formal.id)? else {
        return Ok(Resolution::default());
    };
    let mut known_candidate = start;
    let mut visited: HashSet<(NodeId, u32)> = HashSet::new();

    loop {
        if let Some(cap) = max_depth {
            if visited.len() >= cap {
                return Err(PassError::NestingTooDeep {
                    node: formal.name().to_string(),
                    depth: cap,
                });
            }
        }
        let host = model.node(container)?;
        if !visited.insert((container, index)) {
            return Err(PassError::ResolutionCycle {
                node: formal.name().to_string(),
                container: host.name().to_string(),
                index,
            });
        }
        if is_known_call(host) {
            let candidate = model.node(known_candidate.producer.node)?;
            if is_variable_backed(candidate) {
                debug!("'{}' is variable-backed, no copy", candidate.name());
                return Ok(Resolution::default());
            }
            return Ok(Resolution {
                non_dynamic: None,
                known: Some(known_candidate),
            });
        }

        if index >= host.in_count() {
            return Err(PassError::BadParentIndex {
                node: model.node(index_owner)?.name().to_string(),
                container: host.name().to_string(),
                index,
            });
        }
        let host_in = InPort::new(container, index);
        let Some(src) = model.peer_out(host_in)? else {
            warn!("input {} of '{}' is unconnected", index, host.name());
            return Ok(Resolution::default());
        };
        let producer = model.node(src.node)?;
        debug!("'{}' input {} fed by '{}'", host.name(), index, producer.name());

        if is_formal_input(producer) {
            let crossing = Crossing {
                producer: src,
                consumer: host_in,
            };
            if is_root_graph(model, producer.owner)? {
                return Ok(Resolution {
                    non_dynamic: Some(crossing),
                    known: None,
                });
            }
            known_candidate = crossing;
            index = require_parent_index(producer)?;
            index_owner = producer.id;
            match hosting_container(model, producer.id)? {
                Some(next) => container = next,
                None => return Ok(Resolution::default()),
            }
        } else if is_control_flow_container(producer) {
            let Some(next_index) = parent_index(host) else {
                warn!(
                    "'{}' is fed by container '{}' but has no parent index",
                    host.name(),
                    producer.name()
                );
                return Ok(Resolution::default());
            };
            index = next_index;
            index_owner = container;
            container = producer.id;
        } else {
            return Ok(Resolution::default());
        }
    }
}

// ── Insertion ───────────────────────────────────────────────────────────────

/// Splice a copy node into `crossing`: created right after the producer in
/// the producer's graph, on the consumer's stream. The edge is checked
/// before anything is created and the three edge operations are applied as
/// one validated rewire.
pub fn insert_addr_copy(model: &mut ModelGraph, crossing: Crossing) -> Result<NodeId, PassError> {
    let wrap = |source: GraphError| PassError::Insert {
        producer: crossing.producer,
        consumer: crossing.consumer,
        source,
    };
    model
        .check_edge(crossing.producer, crossing.consumer)
        .map_err(wrap)?;

    let producer = model.node(crossing.producer.node)?;
    let consumer = model.node(crossing.consumer.node)?;
    let graph = producer.owner;
    let stream_id = consumer.desc.stream_id;
    let marked = consumer.desc.get_bool(attr_names::NODE_CONNECT_INPUT) == Some(true);
    let base = format!("{}_{}", producer.name(), op_types::MEMCPY_ADDR_ASYNC);
    let port_desc = model.output_desc(crossing.producer).map_err(wrap)?.clone();
    let name = model.unique_name(graph, &base)?;

    let desc = OpDesc::new(name, op_types::MEMCPY_ADDR_ASYNC)
        .with_input(port_desc.clone())
        .with_output(port_desc)
        .with_stream(stream_id);
    let copy = model
        .add_node_after(graph, desc, crossing.producer.node)
        .map_err(wrap)?;

    model
        .apply_rewire(&EdgeRewire {
            remove: (crossing.producer, crossing.consumer),
            add: vec![
                (crossing.producer, InPort::new(copy, 0)),
                (OutPort::new(copy, 0), crossing.consumer),
            ],
        })
        .map_err(wrap)?;

    if marked {
        model
            .desc_mut(crossing.consumer.node)?
            .set_attr(attr_names::NODE_CONNECT_INPUT, AttrValue::Bool(false));
        model
            .desc_mut(copy)?
            .set_attr(attr_names::NODE_CONNECT_INPUT, AttrValue::Bool(true));
    }
    model.update_is_input_const(copy)?;
    model.update_is_input_const(crossing.consumer.node)?;

    info!(
        "inserted '{}' between '{}' and '{}' on stream {}",
        model.node(copy)?.name(),
        model.node(crossing.producer.node)?.name(),
        model.node(crossing.consumer.node)?.name(),
        stream_id
    );
    Ok(copy)
}

// ── Tests ───────────────────────────────────────────────────────────────────
