//! `streammem` – streaming-memory verification runs.
//!
//! Subcommands:
//!
//! - `run` – drive an inference unit over the frames under `data_root`,
//!   dumping every artifact and the evolving memory to `<frame>/out/`.
//! - `compare` – diff two provenance tags' dumps frame by frame.
//! - `init-config` – write a default TOML config to start from.
//!
//! Configuration precedence is file < `STREAMMEM_*` env < command-line flag.
//! Configuration errors exit with status 2 before any frame runs; Ctrl-C
//! stops the run after the frame in flight has been written.

mod config;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use streammem_dump::{ArtifactWriter, compare_dumps};
use streammem_runtime::{
    DirFrameSource, FrameRunner, InferenceUnit, ReplayInference, RunSummary, SyntheticInference, init_tracing,
};
use streammem_types::StreamError;
use tracing::{info, warn};

use config::{RunConfig, UnitKind};

#[derive(Parser, Debug)]
#[command(name = "streammem", version, about = "Streaming temporal-memory verification runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the frame loop and dump every artifact.
    Run(RunArgs),
    /// Compare two provenance tags' dumps.
    Compare(CompareArgs),
    /// Write a default config file.
    InitConfig {
        #[arg(default_value = "streammem.toml")]
        path: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// TOML config file; missing means all defaults.
    #[arg(long, default_value = "streammem.toml")]
    config: PathBuf,
    #[arg(long)]
    data_root: Option<PathBuf>,
    #[arg(long)]
    num_frames: Option<usize>,
    #[arg(long)]
    tag: Option<String>,
    #[arg(long, value_enum)]
    unit: Option<UnitKind>,
    #[arg(long)]
    replay_tag: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long)]
    deterministic: bool,
    #[arg(long)]
    manifest: Option<PathBuf>,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, num_args = 1..)]
    eval: Vec<String>,
    #[arg(long)]
    format_only: bool,
    #[arg(long)]
    show: bool,
    #[arg(long)]
    show_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompareArgs {
    /// A frame directory, a frame's `out/`, or a root holding frame directories.
    root: PathBuf,
    #[arg(long, default_value = "rs")]
    left: String,
    #[arg(long, default_value = "pth")]
    right: String,
    /// Absolute tolerance per element.
    #[arg(long, default_value_t = 0.0)]
    tolerance: f32,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing("streammem");

    let result = match cli.command {
        Commands::Run(args) => run(args),
        Commands::Compare(args) => compare(args),
        Commands::InitConfig { path } => init_config(&path),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            ExitCode::from(exit_status(&e))
        }
    }
}

fn exit_status(err: &StreamError) -> u8 {
    match err {
        StreamError::Config(_) => 2,
        StreamError::Cancelled { .. } => 130,
        _ => 1,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// run
// ─────────────────────────────────────────────────────────────────────────────

fn resolve_config(args: &RunArgs) -> Result<RunConfig, StreamError> {
    let mut cfg = config::load_from(&args.config)?.unwrap_or_default();
    config::apply_env_overrides(&mut cfg);

    if let Some(v) = &args.data_root {
        cfg.data_root = v.clone();
    }
    if let Some(v) = args.num_frames {
        cfg.num_frames = v;
    }
    if let Some(v) = &args.tag {
        cfg.provenance_tag = v.clone();
    }
    if let Some(v) = args.unit {
        cfg.unit = v;
    }
    if let Some(v) = &args.replay_tag {
        cfg.replay_tag = v.clone();
    }
    if let Some(v) = args.seed {
        cfg.seed = v;
    }
    if let Some(v) = &args.manifest {
        cfg.manifest = Some(v.clone());
    }
    if let Some(v) = &args.out {
        cfg.out = Some(v.clone());
    }
    if let Some(v) = &args.show_dir {
        cfg.show_dir = Some(v.clone());
    }
    if !args.eval.is_empty() {
        cfg.eval = args.eval.clone();
    }
    cfg.deterministic |= args.deterministic;
    cfg.format_only |= args.format_only;
    cfg.show |= args.show;

    cfg.validate()?;
    Ok(cfg)
}

fn run(args: RunArgs) -> Result<ExitCode, StreamError> {
    let cfg = resolve_config(&args)?;
    if cfg.out.is_some() || !cfg.eval.is_empty() || cfg.format_only || cfg.show || cfg.show_dir.is_some() {
        warn!("result files, evaluation and visualisation are not produced by this tool; only dumps are written");
    }
    if !cfg.dump {
        return Ok(ExitCode::SUCCESS);
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("{}", "⚠  Ctrl-C received – stopping after the current frame …".yellow().bold());
        flag.store(true, Ordering::Release);
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the run cannot be interrupted cleanly");
    }

    info!(
        data_root = %cfg.data_root.display(),
        frames = cfg.num_frames,
        unit = %cfg.unit,
        seed = cfg.seed,
        deterministic = cfg.deterministic,
        "configuration resolved"
    );
    let mut source = DirFrameSource::open(&cfg.data_root, cfg.num_frames)?;

    let summary = match cfg.unit {
        UnitKind::Synthetic => {
            let unit = SyntheticInference::new(cfg.head(), cfg.pc_range(), cfg.seed)?;
            execute(&cfg, unit, &mut source, shutdown)?
        }
        UnitKind::Replay => execute(&cfg, ReplayInference::new(cfg.replay_tag.clone()), &mut source, shutdown)?,
    };

    print_summary(&cfg, &summary);
    Ok(ExitCode::SUCCESS)
}

fn execute<U: InferenceUnit>(
    cfg: &RunConfig,
    unit: U,
    source: &mut DirFrameSource,
    shutdown: Arc<AtomicBool>,
) -> Result<RunSummary, StreamError> {
    let mut runner = FrameRunner::new(cfg.runner_config(), unit)?.with_shutdown(shutdown);
    let result = runner.run(source);
    if let Err(e) = &result {
        let last = runner.bank().last_committed();
        warn!(
            error = %e,
            completed = runner.completed(),
            live_memory = last.live_count(),
            "run aborted; memory bank holds the last committed frame"
        );
    }
    result
}

fn print_summary(cfg: &RunConfig, summary: &RunSummary) {
    println!();
    println!(
        "  {} {} frame(s), {} artifact(s) tagged `{}`",
        "✓".green().bold(),
        summary.frames.len(),
        summary.artifact_count(),
        cfg.provenance_tag.bold()
    );
    for f in &summary.frames {
        println!(
            "    frame {:>3}  {:>3} live  {:>7.1} ms  {}",
            f.index,
            f.live_memory,
            f.elapsed.as_secs_f64() * 1e3,
            f.output_dir.display().to_string().dimmed()
        );
    }
    println!("  run {} → {}", summary.manifest.run_id, cfg.manifest_path().display());
}

// ─────────────────────────────────────────────────────────────────────────────
// compare
// ─────────────────────────────────────────────────────────────────────────────

/// Artifact directories under `root`, sorted.
fn artifact_dirs(root: &Path) -> Result<Vec<PathBuf>, StreamError> {
    if root.file_name().is_some_and(|n| n == streammem_dump::naming::ARTIFACT_SUBDIR) {
        return Ok(vec![root.to_path_buf()]);
    }
    let own = ArtifactWriter::artifact_dir(root);
    if own.is_dir() {
        return Ok(vec![own]);
    }
    let entries =
        fs::read_dir(root).map_err(|e| StreamError::Source(format!("cannot list `{}`: {e}", root.display())))?;
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| ArtifactWriter::artifact_dir(&e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn compare(args: CompareArgs) -> Result<ExitCode, StreamError> {
    let dirs = artifact_dirs(&args.root)?;
    if dirs.is_empty() {
        return Err(StreamError::Source(format!("no artifact directories under `{}`", args.root.display())));
    }

    let mut failed = 0usize;
    for dir in &dirs {
        let report =
            compare_dumps(dir, &args.left, &args.right, args.tolerance).map_err(|e| StreamError::Source(e.to_string()))?;
        let frame = dir.parent().unwrap_or(dir).display().to_string();
        if report.is_clean() {
            println!("  {} {} ({} artifacts)", "ok".green().bold(), frame, report.diffs.len());
        } else {
            failed += 1;
            println!("  {} {}", "FAIL".red().bold(), frame);
            for line in report.to_string().lines().filter(|l| !l.starts_with("ok")) {
                println!("      {line}");
            }
        }
    }

    println!();
    if failed == 0 {
        println!("  {} `{}` and `{}` agree on {} frame(s)", "✓".green().bold(), args.left, args.right, dirs.len());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("  {} {failed} of {} frame(s) differ", "✗".red().bold(), dirs.len());
        Ok(ExitCode::FAILURE)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init-config
// ─────────────────────────────────────────────────────────────────────────────

fn init_config(path: &Path) -> Result<ExitCode, StreamError> {
    if path.exists() {
        return Err(StreamError::Config(format!("`{}` already exists", path.display())));
    }
    config::save_to(&RunConfig::default(), path)?;
    println!("  {} Config written to {}", "✓".green().bold(), path.display().to_string().bold());
    Ok(ExitCode::SUCCESS)
}
