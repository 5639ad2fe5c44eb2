// pass.rs — Pass descriptor module: metadata, dependency resolution, pass trait
//
// Declares the graph passes run by the pipeline, their dependency edges, and
// the upstream stages each one assumes has already happened. Used by the
// pipeline runner to compute the minimal pass list for a `--stop-after` target.

use std::collections::HashSet;

use crate::addr_copy::AddrCopyStats;
use crate::error::PassError;
use crate::graph::{ModelGraph, Stage};
use crate::pipeline::PassContext;

// ── Pass identifiers ───────────────────────────────────────────────────────

/// Identifies each graph pass (document loading is outside the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    Verify,
    InsertAddrCopies,
    PostVerify,
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a graph pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/log output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose results this pass relies on).
    pub inputs: &'static [PassId],
    /// Upstream compile stages that must have completed on the model.
    pub requires_stages: &'static [Stage],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::Verify => PassDescriptor {
            name: "verify",
            inputs: &[],
            requires_stages: &[],
            invariants: "V1-V5 hold on the input hierarchy",
        },
        PassId::InsertAddrCopies => PassDescriptor {
            name: "insert_addr_copies",
            inputs: &[PassId::Verify],
            requires_stages: &[Stage::StreamAssign, Stage::MemOffsetAssign],
            invariants: "join and root-output inputs observe stable addresses",
        },
        PassId::PostVerify => PassDescriptor {
            name: "post_verify",
            inputs: &[PassId::InsertAddrCopies],
            requires_stages: &[],
            invariants: "V1-V6 hold on the rewritten hierarchy",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All pass IDs in declaration order.
pub const ALL_PASSES: [PassId; 3] = [PassId::Verify, PassId::InsertAddrCopies, PassId::PostVerify];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Pass interface ─────────────────────────────────────────────────────────

/// What a pass reports on success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassReport {
    Verified { obligations: usize },
    AddrCopies(AddrCopyStats),
}

impl PassReport {
    /// Whether the pass changed the graph.
    pub fn changed(&self) -> bool {
        match self {
            PassReport::Verified { .. } => false,
            PassReport::AddrCopies(stats) => stats.total() > 0,
        }
    }
}

/// A graph transformation or check. Passes take the whole model and an
/// explicit context; they keep no state across runs.
pub trait GraphPass {
    fn id(&self) -> PassId;

    fn name(&self) -> &'static str {
        descriptor(self.id()).name
    }

    fn run(&mut self, model: &mut ModelGraph, ctx: &PassContext) -> Result<PassReport, PassError>;
}

/// A verification certificate: named obligations, each pass/fail.
pub trait StageCert {
    fn obligations(&self) -> Vec<(&'static str, bool)>;

    fn all_pass(&self) -> bool {
        self.obligations().iter().all(|(_, ok)| *ok)
    }

    fn failed(&self) -> Vec<&'static str> {
        self.obligations()
            .into_iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| name)
            .collect()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
