use clap::Parser;
use std::path::PathBuf;

use acc::diag::Diagnostic;
use acc::pass::{descriptor, PassId, PassReport};
use acc::pipeline::{run_pipeline, CompilationState, CompileOptions, PassContext};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EmitStage {
    Json,
    Dot,
    Summary,
    BuildInfo,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum StopAfter {
    Verify,
    InsertAddrCopies,
    PostVerify,
}

impl From<StopAfter> for PassId {
    fn from(s: StopAfter) -> Self {
        match s {
            StopAfter::Verify => PassId::Verify,
            StopAfter::InsertAddrCopies => PassId::InsertAddrCopies,
            StopAfter::PostVerify => PassId::PostVerify,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "acc",
    version,
    about = "Accelerator graph compiler — inserts address-stabilizing copies into stream-assigned graph hierarchies"
)]
struct Cli {
    /// Input graph document (JSON)
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Output form
    #[arg(long, value_enum, default_value_t = EmitStage::Json)]
    emit: EmitStage,

    /// Last pass to run
    #[arg(long, value_enum, default_value_t = StopAfter::PostVerify)]
    stop_after: StopAfter,

    /// Cap on subgraph boundaries climbed while resolving one edge
    #[arg(long)]
    max_nesting_depth: Option<usize>,

    /// Treat upstream stages as done even if the document does not list them
    #[arg(long)]
    assume_stages: bool,

    /// Print pass progress and timing
    #[arg(long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "acc=debug" } else { "acc=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn summary(state: &CompilationState) -> String {
    let mut out = state.model.to_string();
    for (pass, report) in &state.reports {
        let name = descriptor(*pass).name;
        match report {
            PassReport::Verified { obligations } => {
                out.push_str(&format!("{name}: {obligations} obligations hold\n"));
            }
            PassReport::AddrCopies(stats) => {
                out.push_str(&format!(
                    "{name}: {} copies ({} join, {} known, {} output)\n",
                    stats.total(),
                    stats.join_copies,
                    stats.known_copies,
                    stats.output_copies
                ));
            }
        }
    }
    out
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let options = CompileOptions {
        max_nesting_depth: cli.max_nesting_depth,
        require_stages: !cli.assume_stages,
    };

    // ── Read and load source ──
    let source = match std::fs::read_to_string(&cli.source) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("acc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    let mut state = match CompilationState::from_json(&source, &options) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("acc: error: {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };
    tracing::debug!("loaded {}", state.model.to_string().trim_end());

    // ── Run passes ──
    let ctx = PassContext::new(options, std::process::id() as u64);
    let print_diags = |_: PassId, diags: &[Diagnostic]| {
        for d in diags {
            eprintln!("acc: {}", d);
        }
    };
    if let Err(e) = run_pipeline(&mut state, cli.stop_after.into(), &ctx, print_diags) {
        eprintln!(
            "acc: compilation failed in {}",
            descriptor(e.failing_pass).name
        );
        std::process::exit(1);
    }

    // ── Emit ──
    let text = match cli.emit {
        EmitStage::Json => match acc::load::to_json(&state.model) {
            Ok(t) => t,
            Err(e) => {
                eprintln!("acc: error: {}", e);
                std::process::exit(1);
            }
        },
        EmitStage::Dot => acc::dot::emit_dot(&state.model),
        EmitStage::Summary => summary(&state),
        EmitStage::BuildInfo => match &state.provenance {
            Some(p) => p.to_json(),
            None => acc::pipeline::compute_provenance(&source, &ctx.options).to_json(),
        },
    };

    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, text) {
                eprintln!("acc: error: {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{}", text),
    }
}
