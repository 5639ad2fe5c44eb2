// pipeline.rs — Compilation state and pass orchestration
//
// Holds the model under compilation, the per-pass reports and accumulated
// diagnostics, and runs the minimal set of passes for a given terminal PassId.
//
// Preconditions: the model was loaded (see load.rs) and carries the stage marks
//                of everything that ran upstream.
// Postconditions: every pass in `required_passes(terminal)` has reported, or
//                 has_error is set and the failing pass is named.
// Failure modes: a pass returning `PassError`; a pass scheduled before a stage
//                it requires.
// Side effects: calls on_pass_complete callback after each pass for immediate display.

use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::addr_copy::AddrCopyPass;
use crate::diag::codes;
use crate::diag::{DiagLevel, Diagnostic};
use crate::error::LoadError;
use crate::graph::ModelGraph;
use crate::pass::{descriptor, required_passes, GraphPass, PassId, PassReport};
use crate::verify::VerifyPass;

// ── Options and context ────────────────────────────────────────────────────

/// Knobs shared by all passes of one compile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Optional cap on boundary climbs during copy resolution. Without it
    /// resolution follows the hierarchy to its end.
    pub max_nesting_depth: Option<usize>,
    /// Refuse to run a pass whose upstream stages are not marked on the model.
    pub require_stages: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            max_nesting_depth: None,
            require_stages: true,
        }
    }
}

/// Read-only context handed to every pass. Replaces ambient per-thread state.
#[derive(Debug, Clone, Default)]
pub struct PassContext {
    pub options: CompileOptions,
    pub session_id: u64,
}

impl PassContext {
    pub fn new(options: CompileOptions, session_id: u64) -> Self {
        PassContext {
            options,
            session_id,
        }
    }
}

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw graph document.
/// `options_fingerprint`: SHA-256 of the options that affect pass output.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub options_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    pub fn options_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.options_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"options_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.options_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from the document text and compile options.
pub fn compute_provenance(source: &str, options: &CompileOptions) -> Provenance {
    let cap = match options.max_nesting_depth {
        Some(depth) => depth.to_string(),
        None => "none".to_string(),
    };
    let canonical = format!(
        "max_nesting_depth={};require_stages={}",
        cap, options.require_stages
    );
    Provenance {
        source_hash: sha256(source.as_bytes()),
        options_fingerprint: sha256(canonical.as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Compilation state ──────────────────────────────────────────────────────

/// Holds the model, pass reports, and accumulated diagnostics.
pub struct CompilationState {
    pub model: ModelGraph,
    pub reports: Vec<(PassId, PassReport)>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl CompilationState {
    pub fn new(model: ModelGraph) -> Self {
        Self {
            model,
            reports: Vec::new(),
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }

    /// Load a JSON graph document and record its provenance.
    pub fn from_json(source: &str, options: &CompileOptions) -> Result<Self, LoadError> {
        let model = crate::load::from_json(source)?;
        let mut state = Self::new(model);
        state.provenance = Some(compute_provenance(source, options));
        Ok(state)
    }

    /// Report of `pass`, if it ran.
    pub fn report(&self, pass: PassId) -> Option<&PassReport> {
        self.reports
            .iter()
            .find(|(id, _)| *id == pass)
            .map(|(_, r)| r)
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `CompilationState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

fn has_error_diags(diags: &[Diagnostic]) -> bool {
    diags.iter().any(|d| d.level == DiagLevel::Error)
}

/// Per-pass post-processing: callback, accumulate, log, error check.
fn finish_pass_core(
    all_diags: &mut Vec<Diagnostic>,
    has_error: &mut bool,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: Duration,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = has_error_diags(&diags);
    all_diags.extend(diags);
    debug!(
        "{} complete, {:.1}ms",
        descriptor(pass_id).name,
        elapsed.as_secs_f64() * 1000.0
    );
    if is_err {
        *has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

/// Diagnostics for upstream stages `pass_id` needs but the model lacks.
fn missing_stage_diags(model: &ModelGraph, pass_id: PassId) -> Vec<Diagnostic> {
    let desc = descriptor(pass_id);
    desc.requires_stages
        .iter()
        .filter(|stage| !model.has_stage(**stage))
        .map(|stage| {
            Diagnostic::new(
                DiagLevel::Error,
                format!("{} requires {} to have run", desc.name, stage),
            )
            .with_code(codes::E0100)
            .with_hint("list the stage under `stages` in the graph document, or pass --assume-stages")
        })
        .collect()
}

/// Construct the pass object for `id`.
pub fn instantiate(id: PassId) -> Box<dyn GraphPass> {
    match id {
        PassId::Verify => Box::new(VerifyPass::pre()),
        PassId::InsertAddrCopies => Box::new(AddrCopyPass::new()),
        PassId::PostVerify => Box::new(VerifyPass::post()),
    }
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: stage check → execute → on_pass_complete(callback) → error check.
///
/// Preconditions: `state.model` is loaded.
/// Postconditions: every pass in `required_passes(terminal)` has a report,
///   or `state.has_error` is true.
/// Failure modes: any pass returning an error or scheduled before its stages.
///   Changes made by a failing pass before it failed stay in the model.
/// Side effects: calls `on_pass_complete` after each pass for immediate diagnostic display.
pub fn run_pipeline(
    state: &mut CompilationState,
    terminal: PassId,
    ctx: &PassContext,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);
    debug!(session = ctx.session_id, "running {} passes", passes.len());

    for pass_id in passes {
        if ctx.options.require_stages {
            let diags = missing_stage_diags(&state.model, pass_id);
            if !diags.is_empty() {
                finish_pass_core(
                    &mut state.diagnostics,
                    &mut state.has_error,
                    pass_id,
                    diags,
                    Duration::ZERO,
                    &mut on_pass_complete,
                )?;
            }
        }

        let mut pass = instantiate(pass_id);
        let t = Instant::now();
        let result = pass.run(&mut state.model, ctx);
        let elapsed = t.elapsed();

        let diags = match result {
            Ok(report) => {
                if report.changed() {
                    info!("{}: {:?}", pass.name(), report);
                }
                state.reports.push((pass_id, report));
                Vec::new()
            }
            Err(e) => vec![Diagnostic::from_pass_error(&e)],
        };
        finish_pass_core(
            &mut state.diagnostics,
            &mut state.has_error,
            pass_id,
            diags,
            elapsed,
            &mut on_pass_complete,
        )?;
    }
    Ok(())
}
